//! **RecordingCycle**: bounded-duration microphone captures, one at a time.
//!
//! A cycle acquires the microphone, captures for a fixed window (default 4s), releases
//! the device and yields the clip. [`RecordingLoop`] keeps a "recording should be
//! active" flag and runs exactly one cycle per trigger, after a short grace delay so
//! the tail of the previous playback is not recorded.

use crate::audio::{CaptureStream, Microphone};
use crate::clip::CapturedClip;
use crate::error::VoiceResult;
use crate::vad::{clip_has_speech, VadConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

/// Configuration for recording cycles
#[derive(Debug, Clone)]
pub struct RecordingConfig {
    /// Capture window per cycle (default: 4000ms)
    pub duration: Duration,
    /// Delay between a trigger and the start of capture (default: 500ms)
    pub grace: Duration,
    /// Clips whose encoded size is below this are discarded (default: 1000 bytes)
    pub min_clip_bytes: usize,
    /// When set, clips without detected speech are discarded as near-silent
    pub speech_gate: Option<VadConfig>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_millis(4000),
            grace: Duration::from_millis(500),
            min_clip_bytes: 1000,
            speech_gate: Some(VadConfig::default()),
        }
    }
}

/// How a completed cycle ended.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// A clip worth transcribing.
    Captured(CapturedClip),
    /// Empty or near-silent; no transcription should be attempted.
    Discarded { bytes: usize },
}

/// Events reported by [`RecordingLoop`], tagged with the cycle id passed to the trigger.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// The microphone was acquired and capture began.
    Started { cycle: u64 },
    Captured { cycle: u64, clip: CapturedClip },
    Discarded { cycle: u64, bytes: usize },
    /// The microphone could not be acquired; the loop stays idle until the next trigger.
    Unavailable { cycle: u64, reason: String },
}

impl CaptureEvent {
    pub fn cycle(&self) -> u64 {
        match self {
            CaptureEvent::Started { cycle }
            | CaptureEvent::Captured { cycle, .. }
            | CaptureEvent::Discarded { cycle, .. }
            | CaptureEvent::Unavailable { cycle, .. } => *cycle,
        }
    }
}

/// One bounded capture at a time over a shared microphone.
pub struct RecordingCycle {
    microphone: Arc<dyn Microphone>,
    config: RecordingConfig,
    remaining_tx: Arc<watch::Sender<u32>>,
    exclusive: Arc<tokio::sync::Mutex<()>>,
}

impl RecordingCycle {
    pub fn new(microphone: Arc<dyn Microphone>, config: RecordingConfig) -> Self {
        let (remaining_tx, _) = watch::channel(0);
        Self {
            microphone,
            config,
            remaining_tx: Arc::new(remaining_tx),
            exclusive: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn config(&self) -> &RecordingConfig {
        &self.config
    }

    /// Seconds left in the current capture window, for display. 0 when not capturing.
    pub fn remaining_seconds(&self) -> watch::Receiver<u32> {
        self.remaining_tx.subscribe()
    }

    /// Acquire the microphone and begin capturing.
    ///
    /// Waits for any other capture to release the device first. Dropping the returned
    /// [`ActiveCapture`] releases the microphone.
    pub async fn start(&self) -> VoiceResult<ActiveCapture> {
        let guard = Arc::clone(&self.exclusive).lock_owned().await;
        let stream = self.microphone.acquire().await?;
        let seconds = self.config.duration.as_millis().div_ceil(1000) as u32;
        self.remaining_tx.send_replace(seconds);
        info!("🎙️ capture started ({}s window)", seconds);
        Ok(ActiveCapture {
            stream: Some(stream),
            config: self.config.clone(),
            remaining_tx: Arc::clone(&self.remaining_tx),
            _guard: guard,
        })
    }
}

/// A capture in progress. Holds the microphone until completed or dropped.
pub struct ActiveCapture {
    stream: Option<Box<dyn CaptureStream>>,
    config: RecordingConfig,
    remaining_tx: Arc<watch::Sender<u32>>,
    _guard: OwnedMutexGuard<()>,
}

impl ActiveCapture {
    /// Wait out the capture window, release the microphone, then judge the clip.
    pub async fn complete(mut self) -> CycleOutcome {
        let started = Instant::now();
        let deadline = started + self.config.duration;
        let mut countdown = interval_at(started + Duration::from_secs(1), Duration::from_secs(1));
        loop {
            tokio::select! {
                biased;
                _ = sleep_until(deadline) => break,
                _ = countdown.tick() => {
                    self.remaining_tx.send_modify(|s| *s = s.saturating_sub(1));
                }
            }
        }

        let clip = match self.stream.take() {
            Some(stream) => stream.finish(),
            None => CapturedClip::new(Vec::new(), 0),
        };
        self.remaining_tx.send_replace(0);

        let bytes = clip.encoded_len();
        if clip.samples.is_empty() || bytes < self.config.min_clip_bytes {
            debug!(bytes, "clip below minimum size, discarded");
            return CycleOutcome::Discarded { bytes };
        }

        if let Some(gate) = self.config.speech_gate.clone() {
            let checked = clip.clone();
            match tokio::task::spawn_blocking(move || clip_has_speech(&checked, &gate)).await {
                Ok(Ok(false)) => {
                    debug!(bytes, "clip has no speech, discarded");
                    return CycleOutcome::Discarded { bytes };
                }
                Ok(Ok(true)) => {}
                Ok(Err(e)) => warn!("speech gate failed, keeping clip: {}", e),
                Err(e) => warn!("speech gate task failed, keeping clip: {}", e),
            }
        }

        CycleOutcome::Captured(clip)
    }
}

impl Drop for ActiveCapture {
    fn drop(&mut self) {
        if self.stream.take().is_some() {
            self.remaining_tx.send_replace(0);
            debug!("capture abandoned, microphone released");
        }
    }
}

/// Drives recording cycles on demand while the loop is active.
pub struct RecordingLoop {
    cycle: Arc<RecordingCycle>,
    active: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
    events_tx: mpsc::UnboundedSender<CaptureEvent>,
}

impl RecordingLoop {
    pub fn new(cycle: RecordingCycle) -> (Self, mpsc::UnboundedReceiver<CaptureEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let recording_loop = Self {
            cycle: Arc::new(cycle),
            active: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
            events_tx,
        };
        (recording_loop, events_rx)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn remaining_seconds(&self) -> watch::Receiver<u32> {
        self.cycle.remaining_seconds()
    }

    /// Mark recording as active and schedule the first cycle. No-op if already active.
    pub fn start_loop(&self, cycle: u64) {
        if self.active.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("🔁 recording loop started");
        self.trigger_next_cycle(cycle);
    }

    /// Deactivate the loop and abort any pending or in-flight capture.
    pub fn stop_loop(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            info!("⏹️ recording loop stopped");
        }
        self.cancel_cycle();
    }

    /// Request exactly one more cycle, tagged `cycle`, after the grace delay.
    ///
    /// Any earlier pending or running cycle is aborted first; the microphone lock
    /// guarantees the replacement cannot capture until the old one has released it.
    pub fn trigger_next_cycle(&self, cycle: u64) {
        if !self.is_active() {
            debug!(cycle, "trigger ignored, recording loop inactive");
            return;
        }
        let recorder = Arc::clone(&self.cycle);
        let active = Arc::clone(&self.active);
        let events = self.events_tx.clone();
        let handle = tokio::spawn(async move {
            sleep(recorder.config().grace).await;
            if !active.load(Ordering::SeqCst) {
                return;
            }
            let capture = match recorder.start().await {
                Ok(capture) => capture,
                Err(e) => {
                    warn!(cycle, "microphone unavailable: {}", e);
                    let _ = events.send(CaptureEvent::Unavailable {
                        cycle,
                        reason: e.to_string(),
                    });
                    return;
                }
            };
            let _ = events.send(CaptureEvent::Started { cycle });
            let event = match capture.complete().await {
                CycleOutcome::Captured(clip) => CaptureEvent::Captured { cycle, clip },
                CycleOutcome::Discarded { bytes } => CaptureEvent::Discarded { cycle, bytes },
            };
            let _ = events.send(event);
        });
        if let Ok(mut slot) = self.task.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
    }

    /// Abort the pending or running cycle without changing the active flag.
    pub fn cancel_cycle(&self) {
        if let Ok(mut slot) = self.task.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for RecordingLoop {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        self.cancel_cycle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VoiceError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct FakeMic {
        open: Arc<AtomicUsize>,
        max_open: Arc<AtomicUsize>,
        acquired: AtomicUsize,
        deny: bool,
        samples: usize,
    }

    struct FakeStream {
        open: Arc<AtomicUsize>,
        samples: usize,
    }

    impl CaptureStream for FakeStream {
        fn finish(self: Box<Self>) -> CapturedClip {
            CapturedClip::new(vec![0.1; self.samples], 16000)
        }
    }

    impl Drop for FakeStream {
        fn drop(&mut self) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Microphone for FakeMic {
        async fn acquire(&self) -> VoiceResult<Box<dyn CaptureStream>> {
            if self.deny {
                return Err(VoiceError::CaptureUnavailable("permission denied".into()));
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_open.fetch_max(now, Ordering::SeqCst);
            Ok(Box::new(FakeStream {
                open: Arc::clone(&self.open),
                samples: self.samples,
            }))
        }
    }

    fn config() -> RecordingConfig {
        RecordingConfig {
            speech_gate: None,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cycle_captures_for_window_and_releases() {
        let mic = Arc::new(FakeMic {
            samples: 16000,
            ..Default::default()
        });
        let cycle = RecordingCycle::new(mic.clone(), config());
        let remaining = cycle.remaining_seconds();

        let capture = cycle.start().await.unwrap();
        assert_eq!(*remaining.borrow(), 4);
        assert_eq!(mic.open.load(Ordering::SeqCst), 1);

        let before = Instant::now();
        let outcome = capture.complete().await;
        assert_eq!(before.elapsed(), Duration::from_millis(4000));
        assert!(matches!(outcome, CycleOutcome::Captured(_)));
        assert_eq!(mic.open.load(Ordering::SeqCst), 0);
        assert_eq!(*remaining.borrow(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_clip_is_discarded() {
        let mic = Arc::new(FakeMic::default());
        let cycle = RecordingCycle::new(mic, config());
        let outcome = cycle.start().await.unwrap().complete().await;
        assert!(matches!(outcome, CycleOutcome::Discarded { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn denied_microphone_fails_start() {
        let mic = Arc::new(FakeMic {
            deny: true,
            ..Default::default()
        });
        let cycle = RecordingCycle::new(mic, config());
        assert!(matches!(
            cycle.start().await,
            Err(VoiceError::CaptureUnavailable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn loop_waits_for_grace_then_reports_clip() {
        let mic = Arc::new(FakeMic {
            samples: 16000,
            ..Default::default()
        });
        let (recorder, mut events) = RecordingLoop::new(RecordingCycle::new(mic.clone(), config()));

        let before = Instant::now();
        recorder.start_loop(7);
        let started = events.recv().await.unwrap();
        assert!(matches!(started, CaptureEvent::Started { cycle: 7 }));
        assert_eq!(before.elapsed(), Duration::from_millis(500));

        let done = events.recv().await.unwrap();
        assert!(matches!(done, CaptureEvent::Captured { cycle: 7, .. }));
        assert_eq!(mic.open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_loop_releases_microphone_mid_capture() {
        let mic = Arc::new(FakeMic {
            samples: 16000,
            ..Default::default()
        });
        let (recorder, mut events) = RecordingLoop::new(RecordingCycle::new(mic.clone(), config()));
        recorder.start_loop(1);
        assert!(matches!(events.recv().await, Some(CaptureEvent::Started { .. })));
        assert_eq!(mic.open.load(Ordering::SeqCst), 1);

        recorder.stop_loop();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(mic.open.load(Ordering::SeqCst), 0);
        assert!(!recorder.is_active());

        sleep(Duration::from_secs(10)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn retrigger_never_overlaps_captures() {
        let mic = Arc::new(FakeMic {
            samples: 16000,
            ..Default::default()
        });
        let (recorder, mut events) = RecordingLoop::new(RecordingCycle::new(mic.clone(), config()));
        recorder.start_loop(1);
        assert!(matches!(events.recv().await, Some(CaptureEvent::Started { cycle: 1 })));
        recorder.trigger_next_cycle(2);
        recorder.trigger_next_cycle(3);

        loop {
            match events.recv().await.unwrap() {
                CaptureEvent::Captured { cycle: 3, .. } => break,
                CaptureEvent::Started { cycle } => assert_eq!(cycle, 3),
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(mic.max_open.load(Ordering::SeqCst), 1);
        assert_eq!(mic.open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_microphone_leaves_loop_idle() {
        let mic = Arc::new(FakeMic {
            deny: true,
            ..Default::default()
        });
        let (recorder, mut events) = RecordingLoop::new(RecordingCycle::new(mic.clone(), config()));
        recorder.start_loop(4);
        let event = events.recv().await.unwrap();
        assert!(matches!(event, CaptureEvent::Unavailable { cycle: 4, .. }));

        sleep(Duration::from_secs(30)).await;
        assert!(events.try_recv().is_err());
        assert!(recorder.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_without_active_loop_is_ignored() {
        let mic = Arc::new(FakeMic::default());
        let (recorder, mut events) = RecordingLoop::new(RecordingCycle::new(mic.clone(), config()));
        recorder.trigger_next_cycle(1);
        sleep(Duration::from_secs(5)).await;
        assert!(events.try_recv().is_err());
        assert_eq!(mic.acquired.load(Ordering::SeqCst), 0);
    }
}
