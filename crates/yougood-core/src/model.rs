//! Call data model: phases, the armed configuration, the transcript and turn flags.

use crate::error::{CoreError, CoreResult};
use crate::persona::PersonaRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use yougood_voice::SpeechAudio;

/// Top-level call phase. Exactly one is current; only `CallController` changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallPhase {
    Idle,
    Waiting,
    Ringing,
    Connected,
    Ended,
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallPhase::Idle => "idle",
            CallPhase::Waiting => "waiting",
            CallPhase::Ringing => "ringing",
            CallPhase::Connected => "connected",
            CallPhase::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// `normal` rings once; `persistent` rings again after a decline or hang-up until the
/// PIN is entered or the call ceiling is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intensity {
    #[default]
    #[serde(alias = "medium")]
    Normal,
    #[serde(alias = "high")]
    Persistent,
}

/// Pre-call delay choices offered on the setup screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerPreset {
    pub label: &'static str,
    pub delay_secs: Option<u32>,
}

pub const TIMER_PRESETS: [TimerPreset; 5] = [
    TimerPreset { label: "Instant", delay_secs: None },
    TimerPreset { label: "30 sec", delay_secs: Some(30) },
    TimerPreset { label: "1 min", delay_secs: Some(60) },
    TimerPreset { label: "2 min", delay_secs: Some(120) },
    TimerPreset { label: "5 min", delay_secs: Some(300) },
];

pub const PIN_MIN_LEN: usize = 4;
pub const PIN_MAX_LEN: usize = 6;

/// Everything chosen at setup time. Read-only once armed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallConfig {
    pub persona_id: String,
    /// Empty means "use the persona's display name".
    #[serde(default)]
    pub caller_name: String,
    /// Empty means "use the persona's default voice".
    #[serde(default)]
    pub voice_id: String,
    #[serde(default = "default_ringtone")]
    pub ringtone: String,
    /// `None` or `Some(0)` rings immediately.
    #[serde(default)]
    pub delay_secs: Option<u32>,
    #[serde(default)]
    pub intensity: Intensity,
    pub safe_pin: String,
    #[serde(default)]
    pub plan_name: Option<String>,
}

fn default_ringtone() -> String {
    "classic".to_string()
}

impl CallConfig {
    pub fn new(persona_id: impl Into<String>, safe_pin: impl Into<String>) -> Self {
        Self {
            persona_id: persona_id.into(),
            caller_name: String::new(),
            voice_id: String::new(),
            ringtone: default_ringtone(),
            delay_secs: None,
            intensity: Intensity::Normal,
            safe_pin: safe_pin.into(),
            plan_name: None,
        }
    }

    pub fn with_delay(mut self, secs: u32) -> Self {
        self.delay_secs = Some(secs);
        self
    }

    pub fn with_intensity(mut self, intensity: Intensity) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn with_caller_name(mut self, name: impl Into<String>) -> Self {
        self.caller_name = name.into();
        self
    }

    pub fn with_voice(mut self, voice_id: impl Into<String>) -> Self {
        self.voice_id = voice_id.into();
        self
    }

    pub fn with_ringtone(mut self, ringtone: impl Into<String>) -> Self {
        self.ringtone = ringtone.into();
        self
    }

    /// Pre-call delay in seconds; 0 means immediate.
    pub fn delay(&self) -> u32 {
        self.delay_secs.unwrap_or(0)
    }

    pub fn is_persistent(&self) -> bool {
        self.intensity == Intensity::Persistent
    }

    /// PIN must be 4-6 ASCII digits and the persona must exist.
    pub fn validate(&self, personas: &PersonaRegistry) -> CoreResult<()> {
        let pin_len = self.safe_pin.len();
        if !(PIN_MIN_LEN..=PIN_MAX_LEN).contains(&pin_len)
            || !self.safe_pin.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(CoreError::InvalidConfig(format!(
                "safe PIN must be {}-{} digits",
                PIN_MIN_LEN, PIN_MAX_LEN
            )));
        }
        personas.resolve(&self.persona_id)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The user holding the phone.
    Caller,
    /// The simulated person on the other end.
    Receiver,
}

/// One line of the transcript. Append-only; the audio is attached at append time.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub audio: Option<SpeechAudio>,
}

impl Message {
    pub fn caller(text: impl Into<String>) -> Self {
        Self::new(Role::Caller, text.into(), None)
    }

    pub fn receiver(text: impl Into<String>, audio: Option<SpeechAudio>) -> Self {
        Self::new(Role::Receiver, text.into(), audio)
    }

    fn new(role: Role, text: String, audio: Option<SpeechAudio>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text,
            created_at: Utc::now(),
            audio,
        }
    }

    pub fn has_audio(&self) -> bool {
        self.audio.as_ref().is_some_and(|a| !a.is_empty())
    }
}

/// Turn flags as the presentation layer sees them. Derived from the engine's single
/// activity, so at most one of the four booleans is ever set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TurnState {
    pub is_recording: bool,
    pub is_transcribing: bool,
    pub is_thinking: bool,
    pub is_speaking: bool,
    pub current_speaker: Option<Role>,
}

impl TurnState {
    pub fn active_flags(&self) -> usize {
        [
            self.is_recording,
            self.is_transcribing,
            self.is_thinking,
            self.is_speaking,
        ]
        .iter()
        .filter(|f| **f)
        .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intensity_accepts_legacy_spellings() {
        let high: Intensity = serde_json::from_str("\"high\"").unwrap();
        let medium: Intensity = serde_json::from_str("\"medium\"").unwrap();
        assert_eq!(high, Intensity::Persistent);
        assert_eq!(medium, Intensity::Normal);
        assert_eq!(serde_json::to_string(&Intensity::Persistent).unwrap(), "\"persistent\"");
    }

    #[test]
    fn pin_validation() {
        let personas = PersonaRegistry::builtin();
        assert!(CallConfig::new("family", "1234").validate(&personas).is_ok());
        assert!(CallConfig::new("family", "123456").validate(&personas).is_ok());
        assert!(CallConfig::new("family", "123").validate(&personas).is_err());
        assert!(CallConfig::new("family", "1234567").validate(&personas).is_err());
        assert!(CallConfig::new("family", "12a4").validate(&personas).is_err());
        assert!(CallConfig::new("nobody", "1234").validate(&personas).is_err());
    }

    #[test]
    fn delay_none_and_zero_are_immediate() {
        assert_eq!(CallConfig::new("family", "1234").delay(), 0);
        assert_eq!(CallConfig::new("family", "1234").with_delay(0).delay(), 0);
        assert_eq!(TIMER_PRESETS[0].delay_secs, None);
        assert_eq!(TIMER_PRESETS[4].delay_secs, Some(300));
    }

    #[test]
    fn config_defaults_from_partial_json() {
        let config: CallConfig =
            serde_json::from_str(r#"{"persona_id":"social","safe_pin":"4321","intensity":"high"}"#)
                .unwrap();
        assert_eq!(config.ringtone, "classic");
        assert!(config.is_persistent());
        assert!(config.caller_name.is_empty());
    }
}
