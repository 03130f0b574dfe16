//! Application configuration: built-in defaults, then `config/yougood.toml`, then
//! `YOUGOOD__*` environment variables.
//!
//! Gateway credentials are not part of this file; each gateway reads its own
//! environment variables in `from_env`.

use crate::error::CoreResult;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use yougood_voice::{RecordingConfig, VadConfig};

/// Env var naming the config file. Default: `config/yougood.toml`.
pub const CONFIG_PATH_ENV: &str = "YOUGOOD_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/yougood.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory of the sled database holding saved plans.
    pub storage_path: String,
    /// Optional TOML file that replaces or extends the built-in personas.
    #[serde(default)]
    pub persona_file: Option<String>,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub recording: RecordingSettings,
}

/// Call lifecycle timing, in one-second ticks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Delay before a persistent-mode re-ring.
    pub inter_call_delay_secs: u32,
    /// How long `ended` is shown before returning to idle.
    pub ended_display_secs: u32,
    /// Maximum number of calls presented per arm in persistent mode.
    pub persistent_call_ceiling: u32,
    /// Attempts shown on the PIN pad after each arm.
    pub pin_attempts: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            inter_call_delay_secs: 7,
            ended_display_secs: 2,
            persistent_call_ceiling: 5,
            pin_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingSettings {
    pub duration_ms: u64,
    pub grace_ms: u64,
    /// Clips smaller than this (encoded WAV bytes) are never transcribed.
    pub min_clip_bytes: usize,
    /// Discard clips in which WebRTC VAD finds no speech.
    pub speech_gate: bool,
    /// WebRTC VAD aggressiveness, 0-3.
    #[serde(default = "default_vad_mode")]
    pub vad_mode: u8,
}

fn default_vad_mode() -> u8 {
    2
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            duration_ms: 4000,
            grace_ms: 500,
            min_clip_bytes: 1000,
            speech_gate: true,
            vad_mode: default_vad_mode(),
        }
    }
}

impl RecordingSettings {
    pub fn to_recording_config(&self) -> RecordingConfig {
        RecordingConfig {
            duration: Duration::from_millis(self.duration_ms),
            grace: Duration::from_millis(self.grace_ms),
            min_clip_bytes: self.min_clip_bytes,
            speech_gate: self.speech_gate.then(|| VadConfig {
                mode: self.vad_mode,
                ..VadConfig::default()
            }),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage_path: "./data/yougood".to_string(),
            persona_file: None,
            lifecycle: LifecycleConfig::default(),
            recording: RecordingSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load config from file and environment. Precedence: env > `YOUGOOD_CONFIG` file > defaults.
    pub fn load() -> CoreResult<Self> {
        let config_path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&config_path), true)
    }

    /// Load from an explicit file; a missing file is skipped.
    pub fn load_from(path: &Path, with_env: bool) -> CoreResult<Self> {
        let defaults = LifecycleConfig::default();
        let recording = RecordingSettings::default();
        let builder = config::Config::builder()
            .set_default("storage_path", "./data/yougood")?
            .set_default("lifecycle.inter_call_delay_secs", defaults.inter_call_delay_secs as i64)?
            .set_default("lifecycle.ended_display_secs", defaults.ended_display_secs as i64)?
            .set_default("lifecycle.persistent_call_ceiling", defaults.persistent_call_ceiling as i64)?
            .set_default("lifecycle.pin_attempts", defaults.pin_attempts as i64)?
            .set_default("recording.duration_ms", recording.duration_ms as i64)?
            .set_default("recording.grace_ms", recording.grace_ms as i64)?
            .set_default("recording.min_clip_bytes", recording.min_clip_bytes as i64)?
            .set_default("recording.speech_gate", recording.speech_gate)?
            .set_default("recording.vad_mode", recording.vad_mode as i64)?;

        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let builder = if with_env {
            builder.add_source(config::Environment::with_prefix("YOUGOOD").separator("__"))
        } else {
            builder
        };

        Ok(builder.build()?.try_deserialize()?)
    }
}
