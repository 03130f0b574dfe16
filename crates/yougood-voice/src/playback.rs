//! Speaker side: reply playback and the ringtone.
//!
//! Both share one [`AudioOutput`]. Its `rodio::OutputStream` is `!Send`, so a dedicated
//! thread owns it for as long as any handle is alive.

use crate::clip::SpeechAudio;
use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use rodio::source::SineWave;
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Plays synthesized replies.
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Play the audio and resolve when it has finished or was stopped.
    async fn play(&self, audio: SpeechAudio) -> VoiceResult<()>;
    /// Cut off whatever is playing. `play` then resolves.
    fn stop(&self);
}

/// Rings while a call is presented.
pub trait Ringer: Send + Sync {
    fn start(&self, ringtone: &str);
    fn stop(&self);
}

struct OutputInner {
    handle: OutputStreamHandle,
    _keepalive: std_mpsc::Sender<()>,
}

/// Handle to the default output device.
#[derive(Clone)]
pub struct AudioOutput {
    inner: Arc<OutputInner>,
}

impl AudioOutput {
    /// Open the default output device.
    pub fn open() -> VoiceResult<Self> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<VoiceResult<OutputStreamHandle>>();
        let (keepalive_tx, keepalive_rx) = std_mpsc::channel::<()>();
        thread::spawn(move || match OutputStream::try_default() {
            Ok((stream, handle)) => {
                let _ = ready_tx.send(Ok(handle));
                // Returns once every AudioOutput clone is dropped.
                let _ = keepalive_rx.recv();
                drop(stream);
                debug!("output stream released");
            }
            Err(e) => {
                let _ = ready_tx.send(Err(VoiceError::AudioDevice(e.to_string())));
            }
        });
        let handle = ready_rx
            .recv()
            .map_err(|_| VoiceError::AudioDevice("output thread exited".to_string()))??;
        info!("🔈 output device ready");
        Ok(Self {
            inner: Arc::new(OutputInner {
                handle,
                _keepalive: keepalive_tx,
            }),
        })
    }

    fn new_sink(&self) -> VoiceResult<Sink> {
        Sink::try_new(&self.inner.handle).map_err(|e| VoiceError::Playback(e.to_string()))
    }
}

/// Reply playback through rodio. One sink per reply; `stop` drops the current one.
///
/// `stop` also bumps a generation counter. A `play` that began under an older
/// generation discards its sink instead of registering it.
pub struct RodioPlayback {
    output: AudioOutput,
    current: Mutex<Option<Arc<Sink>>>,
    generation: AtomicU64,
}

impl RodioPlayback {
    pub fn new(output: AudioOutput) -> Self {
        Self {
            output,
            current: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl PlaybackSink for RodioPlayback {
    async fn play(&self, audio: SpeechAudio) -> VoiceResult<()> {
        if audio.is_empty() {
            return Ok(());
        }
        let generation = self.generation.load(Ordering::SeqCst);
        let cursor = Cursor::new(audio.bytes.as_ref().clone());
        let source = rodio::Decoder::new(cursor)
            .map_err(|e| VoiceError::Playback(format!("Decode failed: {}", e)))?;
        let sink = Arc::new(self.output.new_sink()?);
        sink.append(source.convert_samples::<f32>());
        if let Ok(mut current) = self.current.lock() {
            if self.generation.load(Ordering::SeqCst) != generation {
                sink.stop();
                debug!("playback stopped before it started");
                return Ok(());
            }
            if let Some(previous) = current.replace(Arc::clone(&sink)) {
                previous.stop();
            }
        }
        let waiter = Arc::clone(&sink);
        tokio::task::spawn_blocking(move || waiter.sleep_until_end())
            .await
            .map_err(|e| VoiceError::Playback(e.to_string()))?;
        if let Ok(mut current) = self.current.lock() {
            if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, &sink)) {
                *current = None;
            }
        }
        Ok(())
    }

    fn stop(&self) {
        if let Ok(mut current) = self.current.lock() {
            self.generation.fetch_add(1, Ordering::SeqCst);
            if let Some(sink) = current.take() {
                sink.stop();
                info!("playback stopped");
            }
        }
    }
}

/// Playback for hosts without a speaker: every reply "finishes" immediately.
#[derive(Debug, Default)]
pub struct SilentPlayback;

#[async_trait]
impl PlaybackSink for SilentPlayback {
    async fn play(&self, _audio: SpeechAudio) -> VoiceResult<()> {
        Ok(())
    }

    fn stop(&self) {}
}

/// Tone pattern for a ringtone id. `None` means no sound (vibrate / silent).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TonePattern {
    pub frequency: f32,
    pub on: Duration,
    pub off: Duration,
    pub volume: f32,
}

/// Known ringtone ids. Unknown ids ring like `classic`.
pub const RINGTONE_IDS: [&str; 6] = ["classic", "modern", "urgent", "subtle", "vibrate", "silent"];

pub fn tone_pattern(ringtone: &str) -> Option<TonePattern> {
    let (frequency, on_ms, off_ms, volume) = match ringtone {
        "vibrate" | "silent" => return None,
        "modern" => (880.0, 600, 900, 0.15),
        "urgent" => (1000.0, 300, 300, 0.2),
        "subtle" => (520.0, 800, 2500, 0.08),
        _ => (440.0, 1000, 2000, 0.2),
    };
    Some(TonePattern {
        frequency,
        on: Duration::from_millis(on_ms),
        off: Duration::from_millis(off_ms),
        volume,
    })
}

/// Ringer that loops a generated tone until stopped.
pub struct ToneRinger {
    output: AudioOutput,
    sink: Mutex<Option<Sink>>,
}

impl ToneRinger {
    pub fn new(output: AudioOutput) -> Self {
        Self {
            output,
            sink: Mutex::new(None),
        }
    }
}

impl Ringer for ToneRinger {
    fn start(&self, ringtone: &str) {
        self.stop();
        let Some(pattern) = tone_pattern(ringtone) else {
            debug!(ringtone, "ringtone has no tone");
            return;
        };
        let sink = match self.output.new_sink() {
            Ok(sink) => sink,
            Err(e) => {
                debug!("ringer unavailable: {}", e);
                return;
            }
        };
        let tone = SineWave::new(pattern.frequency)
            .take_duration(pattern.on)
            .amplify(pattern.volume)
            .delay(pattern.off)
            .repeat_infinite();
        sink.append(tone);
        if let Ok(mut slot) = self.sink.lock() {
            *slot = Some(sink);
        }
    }

    fn stop(&self) {
        if let Ok(mut slot) = self.sink.lock() {
            if let Some(sink) = slot.take() {
                sink.stop();
            }
        }
    }
}

/// Ringer that makes no sound.
#[derive(Debug, Default)]
pub struct NoopRinger;

impl Ringer for NoopRinger {
    fn start(&self, _ringtone: &str) {}
    fn stop(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_and_vibrate_have_no_tone() {
        assert!(tone_pattern("silent").is_none());
        assert!(tone_pattern("vibrate").is_none());
    }

    #[test]
    fn unknown_ringtone_rings_classic() {
        assert_eq!(tone_pattern("does-not-exist"), tone_pattern("classic"));
        assert!(RINGTONE_IDS.iter().filter(|id| tone_pattern(id).is_some()).count() == 4);
    }

    #[tokio::test]
    async fn silent_playback_finishes_immediately() {
        let sink = SilentPlayback;
        sink.play(SpeechAudio::new(vec![1, 2, 3], "audio/mpeg"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rodio_playback_smoke() {
        // Skipped on machines without an output device.
        if let Ok(output) = AudioOutput::open() {
            let playback = RodioPlayback::new(output);
            playback.play(SpeechAudio::new(Vec::new(), "audio/mpeg")).await.unwrap();
            assert!(playback.play(SpeechAudio::new(vec![0u8; 16], "audio/mpeg")).await.is_err());
        }
    }
}
