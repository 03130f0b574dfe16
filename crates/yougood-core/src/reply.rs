//! Reply generation: an OpenAI-compatible chat gateway behind a service that never fails.
//!
//! `ReplyService::reply` always returns a line. A missing credential, a transport error,
//! a non-success status or an unusable payload all fall back to the persona's canned
//! lines, so the caller never hears a broken call.

use crate::error::{CoreError, CoreResult};
use crate::fallback::fallback_reply;
use crate::model::{Message, Role};
use crate::persona::Persona;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Sent as the user's line when asking for the opener: the receiver picking up.
pub const OPENING_PROMPT: &str = "Hello?";

/// One transcript line as the gateway sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
}

impl From<&Message> for ChatTurn {
    fn from(m: &Message) -> Self {
        Self {
            role: m.role,
            text: m.text.clone(),
        }
    }
}

/// Input for one reply: who is speaking and everything said so far.
#[derive(Debug, Clone)]
pub struct ReplyRequest {
    pub persona: Arc<Persona>,
    pub transcript: Vec<ChatTurn>,
}

impl ReplyRequest {
    /// Text of the most recent caller line; empty for the opener.
    pub fn last_caller_text(&self) -> &str {
        self.transcript
            .iter()
            .rev()
            .find(|t| t.role == Role::Caller)
            .map(|t| t.text.as_str())
            .unwrap_or("")
    }
}

/// Backend that produces the next receiver line.
#[async_trait]
pub trait ReplyGateway: Send + Sync {
    async fn generate_reply(&self, system_prompt: &str, transcript: &[ChatTurn]) -> CoreResult<String>;
}

// OpenAI-compatible request/response
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

/// Chat completions against OpenAI or any compatible endpoint.
///
/// Env: `OPENAI_API_KEY` (required), `YOUGOOD_CHAT_API_URL`, `YOUGOOD_CHAT_MODEL`.
pub struct OpenAiChatGateway {
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiChatGateway {
    /// Returns `None` when no key is configured; the caller then runs on fallback lines.
    pub fn from_env() -> Option<Self> {
        let key = std::env::var("OPENAI_API_KEY").ok()?.trim().to_string();
        if key.is_empty() {
            return None;
        }
        let mut gateway = Self::new(key);
        if let Ok(url) = std::env::var("YOUGOOD_CHAT_API_URL") {
            gateway.base_url = url;
        }
        if let Ok(model) = std::env::var("YOUGOOD_CHAT_MODEL") {
            gateway = gateway.with_model(&model);
        }
        Some(gateway)
    }

    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: OPENAI_API_BASE.to_string(),
            api_key: api_key.trim().to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 30,
            temperature: 0.7,
            client,
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, system_prompt: &str, transcript: &[ChatTurn]) -> ChatRequest {
        let mut messages = vec![ChatMessage {
            role: "system".to_string(),
            content: system_prompt.to_string(),
        }];
        if transcript.is_empty() {
            messages.push(ChatMessage {
                role: "user".to_string(),
                content: OPENING_PROMPT.to_string(),
            });
        }
        messages.extend(transcript.iter().map(|turn| ChatMessage {
            role: match turn.role {
                Role::Caller => "user",
                Role::Receiver => "assistant",
            }
            .to_string(),
            content: turn.text.clone(),
        }));
        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
        }
    }
}

#[async_trait]
impl ReplyGateway for OpenAiChatGateway {
    async fn generate_reply(&self, system_prompt: &str, transcript: &[ChatTurn]) -> CoreResult<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = self.build_request(system_prompt, transcript);
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(CoreError::Gateway(format!("chat API error {}: {}", status, body)));
        }

        let parsed: ChatResponse = res
            .json()
            .await
            .map_err(|e| CoreError::Gateway(format!("chat response parse failed: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| CoreError::Gateway("chat response had no content".to_string()))
    }
}

/// Where a reply came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySource {
    Gateway,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub source: ReplySource,
}

/// Gateway first, canned lines otherwise.
pub struct ReplyService {
    gateway: Option<Arc<dyn ReplyGateway>>,
    rng: Mutex<StdRng>,
}

impl ReplyService {
    pub fn new(gateway: Option<Arc<dyn ReplyGateway>>) -> Self {
        match gateway {
            Some(_) => info!("Reply: chat gateway configured"),
            None => info!("Reply: no gateway configured, using fallback lines"),
        }
        Self {
            gateway,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic generic-line picks, for tests.
    pub fn with_seed(gateway: Option<Arc<dyn ReplyGateway>>, seed: u64) -> Self {
        Self {
            gateway,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn has_gateway(&self) -> bool {
        self.gateway.is_some()
    }

    pub async fn reply(&self, request: &ReplyRequest) -> Reply {
        if let Some(gateway) = &self.gateway {
            match gateway
                .generate_reply(&request.persona.system_prompt, &request.transcript)
                .await
            {
                Ok(text) if !text.trim().is_empty() => {
                    return Reply {
                        text: text.trim().to_string(),
                        source: ReplySource::Gateway,
                    };
                }
                Ok(_) => warn!(persona = %request.persona.id, "reply gateway returned empty text, using fallback"),
                Err(e) => warn!(persona = %request.persona.id, "reply gateway failed, using fallback: {}", e),
            }
        }
        let text = self.fallback(request);
        debug!(persona = %request.persona.id, "fallback reply: {}", text);
        Reply {
            text,
            source: ReplySource::Fallback,
        }
    }

    fn fallback(&self, request: &ReplyRequest) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        fallback_reply(&request.persona.fallback, request.last_caller_text(), &mut *rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::PersonaRegistry;

    struct FailingGateway;

    #[async_trait]
    impl ReplyGateway for FailingGateway {
        async fn generate_reply(&self, _: &str, _: &[ChatTurn]) -> CoreResult<String> {
            Err(CoreError::Gateway("503".to_string()))
        }
    }

    struct EchoGateway;

    #[async_trait]
    impl ReplyGateway for EchoGateway {
        async fn generate_reply(&self, system_prompt: &str, transcript: &[ChatTurn]) -> CoreResult<String> {
            Ok(format!(" {} / {} ", system_prompt.len(), transcript.len()))
        }
    }

    fn request(texts: &[(Role, &str)]) -> ReplyRequest {
        ReplyRequest {
            persona: PersonaRegistry::builtin().resolve("professional").unwrap(),
            transcript: texts
                .iter()
                .map(|(role, text)| ChatTurn {
                    role: *role,
                    text: text.to_string(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn no_gateway_uses_fallback() {
        let service = ReplyService::with_seed(None, 3);
        let reply = service.reply(&request(&[(Role::Caller, "hello?")])).await;
        assert_eq!(reply.source, ReplySource::Fallback);
        assert_eq!(reply.text, "Hey, server's down. Need you at the office.");
    }

    #[tokio::test]
    async fn failing_gateway_falls_back_on_last_caller_line() {
        let service = ReplyService::with_seed(Some(Arc::new(FailingGateway)), 3);
        let reply = service
            .reply(&request(&[
                (Role::Receiver, "Hey, server's down."),
                (Role::Caller, "what happened"),
            ]))
            .await;
        assert_eq!(reply.source, ReplySource::Fallback);
        assert_eq!(reply.text, "Production crashed. Client demo in an hour.");
    }

    #[tokio::test]
    async fn opener_fallback_is_the_greeting() {
        let service = ReplyService::with_seed(Some(Arc::new(FailingGateway)), 3);
        let reply = service.reply(&request(&[])).await;
        assert_eq!(reply.text, "Hey, server's down. Need you at the office.");
    }

    #[tokio::test]
    async fn gateway_reply_is_trimmed() {
        let service = ReplyService::with_seed(Some(Arc::new(EchoGateway)), 3);
        let reply = service.reply(&request(&[(Role::Caller, "hi")])).await;
        assert_eq!(reply.source, ReplySource::Gateway);
        assert!(reply.text.ends_with("/ 1"));
    }

    #[test]
    fn request_maps_roles_and_adds_opener() {
        let gateway = OpenAiChatGateway::new("key".to_string());
        let opener = gateway.build_request("sys", &[]);
        assert_eq!(opener.messages.len(), 2);
        assert_eq!(opener.messages[1].content, OPENING_PROMPT);
        assert_eq!(opener.max_tokens, Some(30));

        let turns = request(&[(Role::Receiver, "a"), (Role::Caller, "b")]).transcript;
        let req = gateway.build_request("sys", &turns);
        let roles: Vec<&str> = req.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "assistant", "user"]);
    }
}
