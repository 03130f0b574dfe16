//! # YouGood Voice - the audio edge of a fake incoming call
//!
//! Everything that touches a device or a speech API lives here; the call engine in
//! `yougood-core` only sees the traits.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Recording Loop                           │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐       │
//! │  │  Microphone  │→ │  4s window   │→ │ Speech gate  │→ clip │
//! │  │    (cpal)    │  │ (one at once)│  │ (WebRTC VAD) │       │
//! │  └──────────────┘  └──────────────┘  └──────────────┘       │
//! │                                                              │
//! │  clip → SttBackend → text      text → TtsBackend → audio     │
//! │                                                              │
//! │  ┌──────────────┐                    ┌──────────────┐       │
//! │  │ PlaybackSink │                    │    Ringer    │       │
//! │  │   (rodio)    │                    │ (rodio tone) │       │
//! │  └──────────────┘                    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod clip;
pub mod error;
pub mod playback;
pub mod recording;
pub mod stt;
pub mod tts;
pub mod vad;

pub use audio::{AudioConfig, CaptureStream, CpalMicrophone, Microphone};
pub use clip::{pcm_f32_to_wav, CapturedClip, SpeechAudio};
pub use error::{VoiceError, VoiceResult};
pub use playback::{
    tone_pattern, AudioOutput, NoopRinger, PlaybackSink, Ringer, RodioPlayback, SilentPlayback,
    ToneRinger, TonePattern, RINGTONE_IDS,
};
pub use recording::{
    ActiveCapture, CaptureEvent, CycleOutcome, RecordingConfig, RecordingCycle, RecordingLoop,
};
pub use stt::{create_best_stt, ElevenLabsStt, OpenAiStt, PlaceholderStt, SttBackend};
#[cfg(feature = "whisper")]
pub use stt::WhisperStt;
pub use tts::{
    create_best_tts, ElevenLabsTts, OpenAiTts, PlaceholderTts, TtsBackend, VoiceCatalog, VoiceInfo,
};
pub use vad::{clip_has_speech, VadConfig, VadDetector};
