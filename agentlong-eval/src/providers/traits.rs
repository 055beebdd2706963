//! Provider trait definitions for chat-completion clients

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::runner::rate_limiter::RateLimiter;

/// A message in a conversation.
///
/// Transcript messages may carry tool calls or tool results; those fields are
/// kept in `extra` and forwarded untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    #[serde(default)]
    pub content: Value,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl Message {
    fn with_role(role: &str, content: Value) -> Self {
        Self {
            role: role.to_string(),
            content,
            extra: IndexMap::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role("user", Value::String(content.into()))
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role("assistant", Value::String(content.into()))
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role("system", Value::String(content.into()))
    }

    /// User message whose content may be missing in the source record
    pub fn user_value(content: Value) -> Self {
        Self::with_role("user", content)
    }

    pub fn is_system(&self) -> bool {
        self.role == "system"
    }

    /// Text content, if the message has plain string content
    pub fn text(&self) -> Option<&str> {
        self.content.as_str()
    }
}

/// Request for a chat completion
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: Option<String>,
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub stream: bool,
    /// Additional body parameters merged into the request
    pub extra_params: IndexMap<String, Value>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            model: None,
            messages,
            max_tokens: None,
            temperature: None,
            stream: false,
            extra_params: IndexMap::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_extra_params(mut self, params: IndexMap<String, Value>) -> Self {
        self.extra_params = params;
        self
    }
}

/// Response from a provider. Streamed responses are assembled into one
/// final string before they get here.
#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub finish_reason: String,
    pub latency_ms: u64,
}

/// Error types for provider operations
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// Auth and configuration failures will not improve on retry
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::Config(_))
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// A model service the runner can send transcripts to
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Service name (e.g. "deepseek", "openai")
    fn name(&self) -> &str;

    /// Model used when the request does not name one
    fn default_model(&self) -> &str;

    /// Send a completion request
    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse>;

    /// Get the rate limiter for this provider
    fn rate_limiter(&self) -> &Arc<RateLimiter>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_keeps_tool_fields() {
        let raw = r#"{"role":"assistant","content":null,"tool_calls":[{"id":"c1","type":"function"}]}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.role, "assistant");
        assert!(msg.content.is_null());
        assert!(msg.extra.contains_key("tool_calls"));

        let back = serde_json::to_value(&msg).unwrap();
        assert_eq!(back["tool_calls"][0]["id"], "c1");
        assert!(back["content"].is_null());
    }

    #[test]
    fn test_config_errors_are_not_retryable() {
        assert!(!ProviderError::Config("bad key".into()).is_retryable());
        assert!(ProviderError::Timeout { timeout_ms: 10 }.is_retryable());
    }
}
