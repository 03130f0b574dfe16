//! **CallService**: the async runtime around [`CallController`].
//!
//! One tokio task owns the controller and is the only place session state changes.
//! It multiplexes:
//! - commands from any number of [`CallHandle`]s
//! - a one-second ticker driving the lifecycle timers and the call clock
//! - completions from spawned gateway, synthesis and playback tasks
//! - capture events from the recording loop
//!
//! After every input it executes the resulting effects and publishes a fresh
//! [`CallSnapshot`].

use crate::config::LifecycleConfig;
use crate::controller::{CallController, CallSnapshot};
use crate::effect::{CallNotification, Completion, Effect};
use crate::error::{CoreError, CoreResult};
use crate::model::{CallConfig, CallPhase};
use crate::persona::PersonaRegistry;
use crate::reply::ReplyService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use yougood_voice::{
    CaptureEvent, NoopRinger, PlaybackSink, RecordingCycle, RecordingLoop, Ringer, SilentPlayback,
    SttBackend, TtsBackend,
};

const NOTIFICATION_CAPACITY: usize = 64;

/// Collaborators wired into the runtime. `None` gateways fall back as described on
/// each field.
pub struct CallServiceParts {
    pub personas: Arc<PersonaRegistry>,
    pub lifecycle: LifecycleConfig,
    pub replies: Arc<ReplyService>,
    /// No STT: spoken input is off and callers type.
    pub stt: Option<Arc<dyn SttBackend>>,
    /// No TTS: replies are text-only messages.
    pub tts: Option<Arc<dyn TtsBackend>>,
    pub playback: Arc<dyn PlaybackSink>,
    pub ringer: Arc<dyn Ringer>,
    /// No microphone: spoken input is off.
    pub recorder: Option<RecordingCycle>,
}

impl CallServiceParts {
    /// Text-only wiring: fallback or gateway replies, no audio in or out.
    pub fn text_only(personas: Arc<PersonaRegistry>, lifecycle: LifecycleConfig, replies: Arc<ReplyService>) -> Self {
        Self {
            personas,
            lifecycle,
            replies,
            stt: None,
            tts: None,
            playback: Arc::new(SilentPlayback),
            ringer: Arc::new(NoopRinger),
            recorder: None,
        }
    }
}

enum Command {
    Arm(CallConfig, oneshot::Sender<CoreResult<()>>),
    CancelWaiting,
    Answer,
    Decline,
    EndCall,
    Submit(String),
    PinCheck(String),
    PinDigit(char),
    PinDelete,
    Override,
    Shutdown,
}

/// Cloneable front door to a running [`CallService`].
#[derive(Clone)]
pub struct CallHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<CallSnapshot>,
    notifications: broadcast::Sender<CallNotification>,
    recording_seconds: Option<watch::Receiver<u32>>,
}

impl CallHandle {
    fn send(&self, command: Command) -> CoreResult<()> {
        self.commands.send(command).map_err(|_| CoreError::ServiceClosed)
    }

    /// Validate and arm a call.
    pub async fn arm(&self, config: CallConfig) -> CoreResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Arm(config, tx))?;
        rx.await.map_err(|_| CoreError::ServiceClosed)?
    }

    pub fn cancel_waiting(&self) -> CoreResult<()> {
        self.send(Command::CancelWaiting)
    }

    pub fn answer(&self) -> CoreResult<()> {
        self.send(Command::Answer)
    }

    pub fn decline(&self) -> CoreResult<()> {
        self.send(Command::Decline)
    }

    pub fn end_call(&self) -> CoreResult<()> {
        self.send(Command::EndCall)
    }

    pub fn submit_caller_turn(&self, text: impl Into<String>) -> CoreResult<()> {
        self.send(Command::Submit(text.into()))
    }

    pub fn request_pin_check(&self, pin: impl Into<String>) -> CoreResult<()> {
        self.send(Command::PinCheck(pin.into()))
    }

    pub fn press_pin_digit(&self, digit: char) -> CoreResult<()> {
        self.send(Command::PinDigit(digit))
    }

    pub fn delete_pin_digit(&self) -> CoreResult<()> {
        self.send(Command::PinDelete)
    }

    pub fn emergency_override(&self) -> CoreResult<()> {
        self.send(Command::Override)
    }

    pub fn shutdown(&self) -> CoreResult<()> {
        self.send(Command::Shutdown)
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch_snapshot(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallNotification> {
        self.notifications.subscribe()
    }

    /// Countdown of the current capture window, when a microphone is wired.
    pub fn recording_seconds(&self) -> Option<watch::Receiver<u32>> {
        self.recording_seconds.clone()
    }

    /// Wait until a published snapshot satisfies `pred`.
    pub async fn wait_for(&self, mut pred: impl FnMut(&CallSnapshot) -> bool) -> CoreResult<CallSnapshot> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(|s| pred(s))
            .await
            .map_err(|_| CoreError::ServiceClosed)?;
        Ok(snapshot.clone())
    }
}

pub struct CallService {
    controller: CallController,
    replies: Arc<ReplyService>,
    stt: Option<Arc<dyn SttBackend>>,
    tts: Option<Arc<dyn TtsBackend>>,
    playback: Arc<dyn PlaybackSink>,
    ringer: Arc<dyn Ringer>,
    recording: Option<RecordingLoop>,
    /// The task playing the current reply, aborted on `StopPlayback`.
    playing: Option<JoinHandle<()>>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    snapshot_tx: watch::Sender<CallSnapshot>,
    notify_tx: broadcast::Sender<CallNotification>,
}

impl CallService {
    /// Start the runtime task. It runs until `shutdown` or until every handle is dropped.
    pub fn spawn(parts: CallServiceParts) -> (CallHandle, JoinHandle<()>) {
        let listen = parts.recorder.is_some() && parts.stt.is_some();
        let (recording, capture_rx) = match parts.recorder.filter(|_| listen) {
            Some(cycle) => {
                let (recording, rx) = RecordingLoop::new(cycle);
                (Some(recording), Some(rx))
            }
            None => (None, None),
        };
        info!(listen, "call service starting");

        let controller = CallController::new(parts.personas, parts.lifecycle, listen);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(controller.snapshot());
        let (notify_tx, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let recording_seconds = recording.as_ref().map(RecordingLoop::remaining_seconds);

        let handle = CallHandle {
            commands: commands_tx,
            snapshot: snapshot_rx,
            notifications: notify_tx.clone(),
            recording_seconds,
        };

        let service = Self {
            controller,
            replies: parts.replies,
            stt: parts.stt,
            tts: parts.tts,
            playback: parts.playback,
            ringer: parts.ringer,
            recording,
            playing: None,
            completions_tx,
            snapshot_tx,
            notify_tx,
        };
        let task = tokio::spawn(service.run(commands_rx, completions_rx, capture_rx));
        (handle, task)
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
        mut captures: Option<mpsc::UnboundedReceiver<CaptureEvent>>,
    ) {
        let period = Duration::from_secs(1);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    match command {
                        Command::Shutdown => break,
                        Command::Arm(config, reply) => {
                            let result = self.controller.arm(config).map(|effects| {
                                // Countdown seconds start from the arm.
                                ticker.reset();
                                self.apply(effects);
                            });
                            let _ = reply.send(result);
                        }
                        other => {
                            let before = self.controller.phase();
                            let effects = self.dispatch(other);
                            if before != CallPhase::Connected && self.controller.phase() == CallPhase::Connected {
                                // The call clock counts whole seconds from the answer.
                                ticker.reset();
                            }
                            self.apply(effects);
                        }
                    }
                }
                _ = ticker.tick() => {
                    let effects = self.controller.tick();
                    self.apply(effects);
                }
                Some(completion) = completions.recv() => {
                    let effects = self.controller.complete(completion);
                    self.apply(effects);
                }
                Some(event) = next_capture(&mut captures) => {
                    let effects = self.controller.on_capture(event);
                    self.apply(effects);
                }
            }
            self.snapshot_tx.send_replace(self.controller.snapshot());
        }

        let effects = self.controller.emergency_override();
        self.apply(effects);
        self.snapshot_tx.send_replace(self.controller.snapshot());
        info!("call service stopped");
    }

    fn dispatch(&mut self, command: Command) -> Vec<Effect> {
        let c = &mut self.controller;
        match command {
            Command::CancelWaiting => c.cancel_waiting(),
            Command::Answer => c.answer(),
            Command::Decline => c.decline(),
            Command::EndCall => c.end_call(),
            Command::Submit(text) => c.submit_caller_turn(&text),
            Command::PinCheck(pin) => c.request_pin_check(&pin),
            Command::PinDigit(digit) => c.press_pin_digit(digit),
            Command::PinDelete => {
                c.delete_pin_digit();
                Vec::new()
            }
            Command::Override => c.emergency_override(),
            Command::Arm(..) | Command::Shutdown => Vec::new(),
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::StartRinging { ringtone } => self.ringer.start(&ringtone),
                Effect::StopRinging => self.ringer.stop(),
                Effect::Listen { ticket } => {
                    if let Some(recording) = &self.recording {
                        if recording.is_active() {
                            recording.trigger_next_cycle(ticket.0);
                        } else {
                            recording.start_loop(ticket.0);
                        }
                    }
                }
                Effect::CancelCapture => {
                    if let Some(recording) = &self.recording {
                        recording.cancel_cycle();
                    }
                }
                Effect::StopListening => {
                    if let Some(recording) = &self.recording {
                        recording.stop_loop();
                    }
                }
                Effect::Transcribe { ticket, clip } => {
                    let stt = self.stt.clone();
                    let done = self.completions_tx.clone();
                    tokio::spawn(async move {
                        let text = match stt {
                            Some(stt) => match stt.transcribe(&clip).await {
                                Ok(text) => Some(text),
                                Err(e) => {
                                    warn!(%ticket, "transcription failed: {}", e);
                                    None
                                }
                            },
                            None => None,
                        };
                        let _ = done.send(Completion::Transcript { ticket, text });
                    });
                }
                Effect::RequestReply { ticket, request } => {
                    let replies = Arc::clone(&self.replies);
                    let done = self.completions_tx.clone();
                    tokio::spawn(async move {
                        let reply = replies.reply(&request).await;
                        let _ = done.send(Completion::Reply { ticket, text: reply.text });
                    });
                }
                Effect::Synthesize { ticket, text, voice_id } => {
                    let tts = self.tts.clone();
                    let done = self.completions_tx.clone();
                    tokio::spawn(async move {
                        let audio = match tts {
                            Some(tts) => match tts.synthesize(&text, &voice_id).await {
                                Ok(audio) => Some(audio),
                                Err(e) => {
                                    warn!(%ticket, "speech synthesis failed: {}", e);
                                    None
                                }
                            },
                            None => None,
                        };
                        let _ = done.send(Completion::Speech { ticket, text, audio });
                    });
                }
                Effect::Play { ticket, audio } => {
                    let playback = Arc::clone(&self.playback);
                    let done = self.completions_tx.clone();
                    let task = tokio::spawn(async move {
                        if let Err(e) = playback.play(audio).await {
                            warn!(%ticket, "playback failed: {}", e);
                        }
                        let _ = done.send(Completion::PlaybackFinished { ticket });
                    });
                    if let Some(previous) = self.playing.replace(task) {
                        previous.abort();
                    }
                }
                Effect::StopPlayback => {
                    // A play task that has not reached the sink yet must never get there.
                    if let Some(task) = self.playing.take() {
                        task.abort();
                    }
                    self.playback.stop();
                }
                Effect::Notify(notification) => {
                    debug!(?notification, "notify");
                    let _ = self.notify_tx.send(notification);
                }
            }
        }
    }
}

async fn next_capture(captures: &mut Option<mpsc::UnboundedReceiver<CaptureEvent>>) -> Option<CaptureEvent> {
    match captures {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
