//! What the controller asks the runtime to do, and what the runtime reports back.

use crate::model::{CallPhase, Message};
use crate::reply::ReplyRequest;
use serde::Serialize;
use std::fmt;
use yougood_voice::{CapturedClip, SpeechAudio};

/// Tag for one asynchronous step. A completion is applied only if its ticket is the
/// one the engine is currently waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Ticket(pub u64);

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Side effects produced by a transition. The controller performs no IO itself.
#[derive(Debug, Clone)]
pub enum Effect {
    StartRinging { ringtone: String },
    StopRinging,
    /// Run one recording cycle (starting the loop if needed), tagged with `ticket`.
    Listen { ticket: Ticket },
    /// Abort the pending or running capture; the loop stays active.
    CancelCapture,
    /// Stop the recording loop and release the microphone.
    StopListening,
    Transcribe { ticket: Ticket, clip: CapturedClip },
    RequestReply { ticket: Ticket, request: ReplyRequest },
    Synthesize { ticket: Ticket, text: String, voice_id: String },
    Play { ticket: Ticket, audio: SpeechAudio },
    StopPlayback,
    Notify(CallNotification),
}

/// Results of the asynchronous steps started by [`Effect`]s.
#[derive(Debug, Clone)]
pub enum Completion {
    /// `None` when transcription failed.
    Transcript { ticket: Ticket, text: Option<String> },
    /// Already resolved against the fallback policy; never an error.
    Reply { ticket: Ticket, text: String },
    /// `None` when synthesis failed; the line is still shown as text.
    Speech { ticket: Ticket, text: String, audio: Option<SpeechAudio> },
    /// Playback ended, was stopped, or failed.
    PlaybackFinished { ticket: Ticket },
}

impl Completion {
    pub fn ticket(&self) -> Ticket {
        match self {
            Completion::Transcript { ticket, .. }
            | Completion::Reply { ticket, .. }
            | Completion::Speech { ticket, .. }
            | Completion::PlaybackFinished { ticket } => *ticket,
        }
    }
}

/// Events for the presentation layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallNotification {
    PhaseChanged { from: CallPhase, to: CallPhase },
    MessageAppended { message: Message },
    /// The receiver finished speaking; the next recording cycle may start.
    TurnComplete,
    /// Non-fatal: the call goes on and typed input still works.
    MicrophoneUnavailable { reason: String },
    PinRejected { attempts_remaining: u32 },
    PinAccepted,
}
