//! yougood-core: call lifecycle, turn-taking and saved plans for a simulated incoming call.
//!
//! The [`CallController`] is a pure state machine; [`CallService`] wraps it in a tokio
//! task and carries out its effects against the `yougood-voice` backends.

mod config;
mod controller;
mod effect;
mod engine;
mod error;
mod fallback;
mod model;
mod persona;
mod pin;
mod presets;
mod reply;
mod service;
mod timers;

// Configuration
pub use config::{AppConfig, LifecycleConfig, RecordingSettings, CONFIG_PATH_ENV};
pub use error::{CoreError, CoreResult};

// Call model and personas
pub use model::{
    CallConfig, CallPhase, Intensity, Message, Role, TimerPreset, TurnState, PIN_MAX_LEN, PIN_MIN_LEN,
    TIMER_PRESETS,
};
pub use persona::{FallbackLines, Persona, PersonaRegistry, DEFAULT_PERSONA};

// State machine
pub use controller::{CallController, CallSession, CallSnapshot};
pub use effect::{CallNotification, Completion, Effect, Ticket};
pub use engine::{TurnActivity, TurnContext, TurnEngine};
pub use pin::{PinOutcome, PinPad};
pub use timers::{TimerKind, TimerSet};

// Replies
pub use fallback::{classify, fallback_reply, opening_line, FallbackKind};
pub use reply::{
    ChatTurn, OpenAiChatGateway, Reply, ReplyGateway, ReplyRequest, ReplyService, ReplySource, OPENING_PROMPT,
};

// Runtime and storage
pub use presets::{PresetStore, SavedPlan};
pub use service::{CallHandle, CallService, CallServiceParts};
