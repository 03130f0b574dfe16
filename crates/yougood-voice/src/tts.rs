//! **Text-to-Speech (TTS)**: synthesize the caller's lines, and list the voices a
//! caller can be given.
//!
//! `SpeechAudio` comes back encoded (MP3 for both remote APIs); `PlaybackSink` decodes it.

use crate::clip::SpeechAudio;
use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

const ELEVENLABS_API_BASE: &str = "https://api.elevenlabs.io/v1";

/// Backend that turns text into encoded audio for one voice.
#[async_trait]
pub trait TtsBackend: Send + Sync {
    /// Synthesize text. Return empty audio to skip playback.
    async fn synthesize(&self, text: &str, voice_id: &str) -> VoiceResult<SpeechAudio>;
}

/// Placeholder TTS: returns empty audio so nothing plays. The reply is still shown as text.
#[derive(Debug, Default)]
pub struct PlaceholderTts;

#[async_trait]
impl TtsBackend for PlaceholderTts {
    async fn synthesize(&self, _text: &str, _voice_id: &str) -> VoiceResult<SpeechAudio> {
        Ok(SpeechAudio::new(Vec::new(), "audio/mpeg"))
    }
}

fn tts_client(timeout: Duration) -> VoiceResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| VoiceError::Tts(e.to_string()))
}

fn content_type(res: &reqwest::Response) -> String {
    res.headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("audio/mpeg")
        .to_string()
}

/// ElevenLabs TTS (`POST /v1/text-to-speech/{voice_id}`).
#[derive(Debug, Clone)]
pub struct ElevenLabsTts {
    pub base_url: String,
    pub api_key: String,
    /// Default `eleven_turbo_v2_5` (lowest latency).
    pub model: String,
    client: reqwest::Client,
}

impl ElevenLabsTts {
    /// Build from environment: `ELEVENLABS_API_KEY`, optional `ELEVENLABS_TTS_MODEL`.
    pub fn from_env() -> VoiceResult<Self> {
        let api_key = std::env::var("ELEVENLABS_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| VoiceError::Config("ElevenLabs TTS requires ELEVENLABS_API_KEY".to_string()))?;
        let model = std::env::var("ELEVENLABS_TTS_MODEL")
            .unwrap_or_else(|_| "eleven_turbo_v2_5".to_string());
        Self::new(ELEVENLABS_API_BASE, api_key.trim(), model)
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
            client: tts_client(Duration::from_secs(60))?,
        })
    }
}

#[async_trait]
impl TtsBackend for ElevenLabsTts {
    async fn synthesize(&self, text: &str, voice_id: &str) -> VoiceResult<SpeechAudio> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SpeechAudio::new(Vec::new(), "audio/mpeg"));
        }
        if voice_id.trim().is_empty() {
            return Err(VoiceError::Tts("no voice selected".to_string()));
        }
        let url = format!(
            "{}/text-to-speech/{}",
            self.base_url.trim_end_matches('/'),
            voice_id.trim()
        );
        let body = serde_json::json!({
            "text": text,
            "model_id": self.model,
        });
        let res = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header(reqwest::header::ACCEPT, "audio/mpeg")
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Tts(format!("ElevenLabs TTS error {}: {}", status, body)));
        }
        let content_type = content_type(&res);
        let bytes = res.bytes().await.map_err(|e| VoiceError::Tts(e.to_string()))?;
        Ok(SpeechAudio::new(bytes.to_vec(), content_type))
    }
}

/// OpenAI-compatible TTS (`/audio/speech`).
/// Uses `TTS_API_URL`, `TTS_API_KEY` (or `OPENAI_API_KEY`) and `TTS_MODEL` (default tts-1).
/// The persona voice id is passed through as the API `voice` (alloy, nova, shimmer, ...).
#[derive(Debug, Clone)]
pub struct OpenAiTts {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Used when the caller has no voice selected.
    pub default_voice: String,
    client: reqwest::Client,
}

impl OpenAiTts {
    pub fn from_env() -> VoiceResult<Self> {
        let base_url = std::env::var("TTS_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("TTS_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| VoiceError::Config("TTS requires TTS_API_KEY or OPENAI_API_KEY".to_string()))?;
        let model = std::env::var("TTS_MODEL").unwrap_or_else(|_| "tts-1".to_string());
        Self::new(base_url, api_key.trim(), model)
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
            default_voice: "shimmer".to_string(),
            client: tts_client(Duration::from_secs(60))?,
        })
    }

    pub fn with_default_voice(mut self, voice: impl Into<String>) -> Self {
        self.default_voice = voice.into();
        self
    }
}

#[async_trait]
impl TtsBackend for OpenAiTts {
    async fn synthesize(&self, text: &str, voice_id: &str) -> VoiceResult<SpeechAudio> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SpeechAudio::new(Vec::new(), "audio/mpeg"));
        }
        let voice = match voice_id.trim() {
            "" => self.default_voice.as_str(),
            v => v,
        };
        let url = format!("{}/audio/speech", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": voice,
        });
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Tts(format!("TTS API error {}: {}", status, body)));
        }
        let content_type = content_type(&res);
        let bytes = res.bytes().await.map_err(|e| VoiceError::Tts(e.to_string()))?;
        Ok(SpeechAudio::new(bytes.to_vec(), content_type))
    }
}

/// Create the best available TTS backend from environment.
/// Priority: ElevenLabs, then OpenAI-compatible, then `None` (replies are text only).
pub fn create_best_tts() -> Option<Box<dyn TtsBackend>> {
    if let Ok(eleven) = ElevenLabsTts::from_env() {
        info!("TTS: ElevenLabs ({})", eleven.model);
        return Some(Box::new(eleven));
    }
    if let Ok(open) = OpenAiTts::from_env() {
        info!("TTS: OpenAI-compatible ({})", open.model);
        return Some(Box::new(open));
    }
    info!("TTS: none configured, replies are text only");
    None
}

// -----------------------------------------------------------------------------
// Voice catalog
// -----------------------------------------------------------------------------

/// A selectable caller voice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceInfo {
    pub id: String,
    pub name: String,
    pub accent: String,
    pub gender: String,
}

#[derive(Debug, Deserialize)]
struct VoicesResponse {
    #[serde(default)]
    voices: Vec<ApiVoice>,
}

#[derive(Debug, Deserialize)]
struct ApiVoice {
    voice_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    labels: ApiVoiceLabels,
}

#[derive(Debug, Default, Deserialize)]
struct ApiVoiceLabels {
    accent: Option<String>,
    gender: Option<String>,
}

impl From<ApiVoice> for VoiceInfo {
    fn from(v: ApiVoice) -> Self {
        Self {
            id: v.voice_id,
            name: v.name,
            accent: v.labels.accent.unwrap_or_else(|| "Unknown".to_string()),
            gender: v.labels.gender.unwrap_or_else(|| "Unknown".to_string()),
        }
    }
}

/// Lists the voices available to the ElevenLabs account (`GET /v1/voices`).
#[derive(Debug, Clone)]
pub struct VoiceCatalog {
    pub base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl VoiceCatalog {
    pub fn from_env() -> VoiceResult<Self> {
        let api_key = std::env::var("ELEVENLABS_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| VoiceError::Config("voice catalog requires ELEVENLABS_API_KEY".to_string()))?;
        Self::new(ELEVENLABS_API_BASE, api_key.trim())
    }

    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> VoiceResult<Self> {
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: tts_client(Duration::from_secs(15))?,
        })
    }

    pub async fn list(&self) -> VoiceResult<Vec<VoiceInfo>> {
        let url = format!("{}/voices", self.base_url.trim_end_matches('/'));
        let res = self
            .client
            .get(&url)
            .header("xi-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Tts(format!("voice listing failed {}: {}", status, body)));
        }
        let body = res.text().await.map_err(|e| VoiceError::Tts(e.to_string()))?;
        parse_voices(&body)
    }
}

fn parse_voices(body: &str) -> VoiceResult<Vec<VoiceInfo>> {
    let parsed: VoicesResponse = serde_json::from_str(body)
        .map_err(|e| VoiceError::Tts(format!("invalid voice listing: {}", e)))?;
    Ok(parsed.voices.into_iter().map(VoiceInfo::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn placeholder_tts_returns_empty() {
        let tts = PlaceholderTts;
        let out = tts.synthesize("hello", "any").await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn blank_text_skips_the_request() {
        let tts = ElevenLabsTts::new("http://127.0.0.1:9", "key", "eleven_turbo_v2_5").unwrap();
        assert!(tts.synthesize("   ", "voice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn elevenlabs_requires_a_voice() {
        let tts = ElevenLabsTts::new("http://127.0.0.1:9", "key", "eleven_turbo_v2_5").unwrap();
        assert!(tts.synthesize("hi honey", "").await.is_err());
    }

    #[test]
    fn voice_listing_defaults_missing_labels() {
        let body = r#"{"voices":[
            {"voice_id":"abc","name":"Rachel","labels":{"accent":"american","gender":"female"}},
            {"voice_id":"def","name":"Clyde"}
        ]}"#;
        let voices = parse_voices(body).unwrap();
        assert_eq!(voices.len(), 2);
        assert_eq!(voices[0].accent, "american");
        assert_eq!(voices[1].id, "def");
        assert_eq!(voices[1].accent, "Unknown");
        assert_eq!(voices[1].gender, "Unknown");
    }

    #[test]
    fn voice_listing_rejects_garbage() {
        assert!(parse_voices("not json").is_err());
    }
}
