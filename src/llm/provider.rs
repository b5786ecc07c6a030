//! One LLM backend. Normalizes tool-call schemas and vision
//! image-URL handling to this common shape; concrete vendor wiring is out of
//! scope and left to an adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub image_urls: Vec<String>,
}

/// A model reply. `reasoning_blob` is passed through opaquely and never
/// dropped even when unused downstream.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub reasoning_blob: Option<Value>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("rate limited")]
    RateLimited,
    #[error("transient: {0}")]
    Transient(String),
    #[error("all keys cooling down")]
    AllKeysCoolingDown,
    #[error("no models configured")]
    NoModelsConfigured,
    #[error("malformed response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn id(&self) -> &'static str;
    async fn complete(&self, model: &str, request: &ChatRequest, api_key: Option<&str>) -> Result<ChatResponse, LlmError>;
}

/// An OpenAI-compatible chat-completions endpoint, the common shape most
/// hosted and self-hosted providers in this router's chain speak.
pub struct OpenAiCompatProvider {
    id: &'static str,
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiCompatProvider {
    pub fn new(id: &'static str, client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            id,
            client,
            base_url: base_url.into(),
        }
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolSpec,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
    reasoning_content: Option<Value>,
}

#[derive(Deserialize)]
struct WireToolCall {
    function: WireToolCallFunction,
}

#[derive(Deserialize)]
struct WireToolCallFunction {
    name: String,
    arguments: String,
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn id(&self) -> &'static str {
        self.id
    }

    async fn complete(&self, model: &str, request: &ChatRequest, api_key: Option<&str>) -> Result<ChatResponse, LlmError> {
        let mut messages = request.messages.clone();
        if let Some(last) = messages.last_mut() {
            for url in &request.image_urls {
                last.content.push_str(&format!("\n[image: {url}]"));
            }
        }
        let wire = WireRequest {
            model,
            messages: &messages,
            tools: request
                .tools
                .iter()
                .map(|t| WireTool { kind: "function", function: t })
                .collect(),
        };
        let mut req = self.client.post(format!("{}/chat/completions", self.base_url)).json(&wire);
        if let Some(key) = api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(|e| LlmError::Transient(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited);
        }
        if !resp.status().is_success() {
            return Err(LlmError::Transient(format!("http {}", resp.status())));
        }
        let body: WireResponse = resp.json().await.map_err(|e| LlmError::Malformed(e.to_string()))?;
        let choice = body.choices.into_iter().next().ok_or_else(|| LlmError::Malformed("no choices".into()))?;
        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|tc| {
                let arguments = serde_json::from_str(&tc.function.arguments).unwrap_or(Value::Null);
                ToolCall {
                    name: tc.function.name,
                    arguments,
                }
            })
            .collect();
        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            reasoning_blob: choice.message.reasoning_content,
        })
    }
}
