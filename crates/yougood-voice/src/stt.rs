//! **Speech-to-Text (STT)**: turn a captured clip into the caller's words.
//!
//! Implement `SttBackend` for a remote API or a local model. An empty string means
//! "nothing was said"; the call engine treats it the same as a failed transcription.

use crate::clip::CapturedClip;
use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

const ELEVENLABS_API_BASE: &str = "https://api.elevenlabs.io/v1";

/// Backend for converting a captured clip to text.
#[async_trait]
pub trait SttBackend: Send + Sync {
    /// Transcribe one clip. Return an empty string if nothing was detected.
    async fn transcribe(&self, clip: &CapturedClip) -> VoiceResult<String>;
}

fn http_client(timeout: Duration) -> VoiceResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| VoiceError::Stt(e.to_string()))
}

fn env_key(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

/// Placeholder STT: returns a fixed string (empty by default). For demos and tests.
#[derive(Debug, Default)]
pub struct PlaceholderStt {
    pub response: Option<String>,
}

impl PlaceholderStt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(s: impl Into<String>) -> Self {
        Self {
            response: Some(s.into()),
        }
    }
}

#[async_trait]
impl SttBackend for PlaceholderStt {
    async fn transcribe(&self, _clip: &CapturedClip) -> VoiceResult<String> {
        Ok(self.response.clone().unwrap_or_default())
    }
}

/// ElevenLabs speech-to-text (`POST /v1/speech-to-text`, model `scribe_v1`).
#[derive(Debug, Clone)]
pub struct ElevenLabsStt {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    client: reqwest::Client,
}

impl ElevenLabsStt {
    /// Build from environment: `ELEVENLABS_API_KEY`, optional `ELEVENLABS_STT_MODEL`.
    pub fn from_env() -> VoiceResult<Self> {
        let api_key = env_key(&["ELEVENLABS_API_KEY"])
            .ok_or_else(|| VoiceError::Config("ElevenLabs STT requires ELEVENLABS_API_KEY".to_string()))?;
        let model = std::env::var("ELEVENLABS_STT_MODEL").unwrap_or_else(|_| "scribe_v1".to_string());
        Self::new(ELEVENLABS_API_BASE, api_key, model)
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> VoiceResult<Self> {
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client: http_client(Duration::from_secs(30))?,
        })
    }
}

#[async_trait]
impl SttBackend for ElevenLabsStt {
    async fn transcribe(&self, clip: &CapturedClip) -> VoiceResult<String> {
        if clip.samples.is_empty() {
            return Ok(String::new());
        }
        let url = format!("{}/speech-to-text", self.base_url.trim_end_matches('/'));
        let part = reqwest::multipart::Part::bytes(clip.to_wav())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model_id", self.model.clone());
        let res = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Stt(format!("ElevenLabs STT error {}: {}", status, body)));
        }
        let json: serde_json::Value = res.json().await.map_err(|e| VoiceError::Stt(e.to_string()))?;
        Ok(transcript_text(&json))
    }
}

/// OpenAI-compatible transcription API (OpenAI Whisper, OpenRouter, local servers).
/// Uses `STT_API_URL` (e.g. https://api.openai.com/v1), `STT_API_KEY`, and `STT_MODEL` (default whisper-1).
#[derive(Debug, Clone)]
pub struct OpenAiStt {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    client: reqwest::Client,
}

impl OpenAiStt {
    /// Build from environment: STT_API_URL, STT_API_KEY (or OPENAI_API_KEY), STT_MODEL.
    pub fn from_env() -> VoiceResult<Self> {
        let base_url = std::env::var("STT_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = env_key(&["STT_API_KEY", "OPENAI_API_KEY"])
            .ok_or_else(|| VoiceError::Config("STT requires STT_API_KEY or OPENAI_API_KEY".to_string()))?;
        let model = std::env::var("STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        Self::new(base_url, api_key, model)
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> VoiceResult<Self> {
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client: http_client(Duration::from_secs(30))?,
        })
    }
}

#[async_trait]
impl SttBackend for OpenAiStt {
    async fn transcribe(&self, clip: &CapturedClip) -> VoiceResult<String> {
        if clip.samples.is_empty() {
            return Ok(String::new());
        }
        let url = format!("{}/audio/transcriptions", self.base_url.trim_end_matches('/'));
        let part = reqwest::multipart::Part::bytes(clip.to_wav())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Stt(format!("STT API error {}: {}", status, body)));
        }
        let json: serde_json::Value = res.json().await.map_err(|e| VoiceError::Stt(e.to_string()))?;
        Ok(transcript_text(&json))
    }
}

/// Both APIs answer `{"text": "..."}`; a missing field is an empty transcript.
fn transcript_text(json: &serde_json::Value) -> String {
    json.get("text")
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .trim()
        .to_string()
}

// -----------------------------------------------------------------------------
// Local Whisper STT (optional feature). Requires whisper.cpp/ggml.
// -----------------------------------------------------------------------------
#[cfg(feature = "whisper")]
mod whisper_stt {
    use super::*;
    use std::sync::{Arc, Mutex};
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    /// Local Whisper STT: loads a ggml model (e.g. ggml-base.en.bin) and runs inference
    /// on a blocking thread. Clips must be 16 kHz mono.
    pub struct WhisperStt {
        state: Arc<Mutex<whisper_rs::WhisperState>>,
        #[allow(dead_code)]
        context: WhisperContext,
    }

    impl WhisperStt {
        pub fn new(model_path: &str) -> VoiceResult<Self> {
            let params = WhisperContextParameters::default();
            let context = WhisperContext::new_with_params(model_path, params)
                .map_err(|e| VoiceError::Stt(format!("Whisper load failed: {}", e)))?;
            let state = context
                .create_state()
                .map_err(|e| VoiceError::Stt(format!("Whisper state init failed: {}", e)))?;
            Ok(Self {
                state: Arc::new(Mutex::new(state)),
                context,
            })
        }

        /// Build from env: `WHISPER_MODEL_PATH` must point to a .bin model file.
        pub fn from_env() -> VoiceResult<Self> {
            let path = std::env::var("WHISPER_MODEL_PATH")
                .map_err(|_| VoiceError::Config("WHISPER_MODEL_PATH not set".to_string()))?;
            let path = path.trim();
            if path.is_empty() {
                return Err(VoiceError::Config("WHISPER_MODEL_PATH is empty".to_string()));
            }
            Self::new(path)
        }
    }

    #[async_trait]
    impl SttBackend for WhisperStt {
        async fn transcribe(&self, clip: &CapturedClip) -> VoiceResult<String> {
            if clip.samples.is_empty() {
                return Ok(String::new());
            }
            if clip.sample_rate != 16000 {
                return Err(VoiceError::Stt(format!(
                    "Whisper expects 16 kHz; got {} Hz",
                    clip.sample_rate
                )));
            }
            let state = Arc::clone(&self.state);
            let samples = clip.samples.clone();
            tokio::task::spawn_blocking(move || {
                let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
                params.set_print_progress(false);
                params.set_print_realtime(false);
                params.set_no_timestamps(true);
                params.set_language(Some("en"));

                let mut state = state
                    .lock()
                    .map_err(|e| VoiceError::Stt(format!("Whisper lock poisoned: {}", e)))?;
                state
                    .full(params, &samples)
                    .map_err(|e| VoiceError::Stt(format!("Whisper inference failed: {}", e)))?;
                let text = state
                    .as_iter()
                    .filter_map(|seg| seg.to_str().ok().map(str::to_string))
                    .collect::<Vec<_>>()
                    .join(" ");
                Ok(text.trim().to_string())
            })
            .await
            .map_err(|e| VoiceError::Stt(format!("Whisper task failed: {}", e)))?
        }
    }
}

#[cfg(feature = "whisper")]
pub use whisper_stt::WhisperStt;

/// Create the best available STT backend from environment.
/// Priority: (1) WhisperStt if `WHISPER_MODEL_PATH` is set and loads (requires `whisper` feature),
/// (2) ElevenLabsStt if `ELEVENLABS_API_KEY` is set, (3) OpenAiStt if `STT_API_KEY`/`OPENAI_API_KEY`
/// is set. `None` means no speech recognition; the call continues with typed input only.
pub fn create_best_stt() -> Option<Box<dyn SttBackend>> {
    #[cfg(feature = "whisper")]
    {
        if let Ok(w) = WhisperStt::from_env() {
            info!("STT: local Whisper");
            return Some(Box::new(w));
        }
    }
    if let Ok(eleven) = ElevenLabsStt::from_env() {
        info!("STT: ElevenLabs ({})", eleven.model);
        return Some(Box::new(eleven));
    }
    if let Ok(open) = OpenAiStt::from_env() {
        info!("STT: OpenAI-compatible ({})", open.model);
        return Some(Box::new(open));
    }
    info!("STT: none configured, typed input only");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn placeholder_defaults_to_empty() {
        let stt = PlaceholderStt::new();
        let clip = CapturedClip::new(vec![0.0; 480], 16000);
        assert_eq!(stt.transcribe(&clip).await.unwrap(), "");
    }

    #[tokio::test]
    async fn placeholder_with_response() {
        let stt = PlaceholderStt::with_response("hello world");
        let clip = CapturedClip::new(vec![], 16000);
        assert_eq!(stt.transcribe(&clip).await.unwrap(), "hello world");
    }

    #[tokio::test]
    async fn remote_backends_skip_empty_clips() {
        let stt = OpenAiStt::new("http://127.0.0.1:9", "key", "whisper-1").unwrap();
        let clip = CapturedClip::new(vec![], 16000);
        assert_eq!(stt.transcribe(&clip).await.unwrap(), "");
    }

    #[test]
    fn transcript_text_trims_and_defaults() {
        let json = serde_json::json!({ "text": "  on my way  " });
        assert_eq!(transcript_text(&json), "on my way");
        assert_eq!(transcript_text(&serde_json::json!({})), "");
    }
}
