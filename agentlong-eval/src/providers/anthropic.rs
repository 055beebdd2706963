//! Anthropic Messages API client for Claude services

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;

use super::openai::{retry_after_ms, Credentials};
use super::traits::{
    CompletionRequest, CompletionResponse, LLMProvider, Message, ProviderError, ProviderResult,
};
use crate::config::ServiceConfig;
use crate::runner::rate_limiter::RateLimiter;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const CONTEXT_BETA: &str = "context-1m-2025-08-07";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Services routed to the Messages API: any name containing `claude`
pub fn is_claude_service(service: &str) -> bool {
    service.to_uppercase().contains("CLAUDE")
}

/// Claude client. Transcripts in chat-completions form are translated to
/// Messages API blocks on the way out.
pub struct AnthropicClient {
    service: String,
    api_key: String,
    base_url: String,
    http_client: Client,
    rate_limiter: Arc<RateLimiter>,
    default_model: String,
}

impl AnthropicClient {
    pub fn new(service: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let defaults = ServiceConfig::default();
        Self {
            service: service.into(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            http_client: Client::new(),
            rate_limiter: Arc::new(RateLimiter::new(defaults.rpm, defaults.tpm)),
            default_model: model.into(),
        }
    }

    /// Create from a config entry, reading unset fields from the environment.
    /// The base URL is optional here.
    pub fn from_config(service: &str, config: Option<&ServiceConfig>) -> ProviderResult<Self> {
        let credentials = Credentials::resolve(service, config)?;
        let mut client = Self::new(service, credentials.api_key, credentials.model);
        if let Some(url) = credentials.base_url {
            client = client.with_base_url(url);
        }
        if let Some(c) = config {
            client = client.with_rate_limits(c.rpm, c.tpm);
        }
        Ok(client)
    }

    /// Set custom base URL, with or without the trailing `/v1`
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set custom rate limits
    pub fn with_rate_limits(mut self, rpm: u32, tpm: u32) -> Self {
        self.rate_limiter = Arc::new(RateLimiter::new(rpm, tpm));
        self
    }

    fn messages_url(&self) -> String {
        if self.base_url.ends_with("/v1") {
            format!("{}/messages", self.base_url)
        } else {
            format!("{}/v1/messages", self.base_url)
        }
    }

    fn request_body(&self, request: &CompletionRequest) -> ProviderResult<Value> {
        let (system, messages) = convert_messages(&request.messages)?;

        let mut body = Map::new();
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        body.insert("model".into(), Value::String(model.to_string()));
        body.insert("messages".into(), Value::Array(messages));
        body.insert(
            "max_tokens".into(),
            Value::from(request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        );
        if let Some(temperature) = request.temperature {
            body.insert("temperature".into(), Value::from(temperature));
        }
        if let Some(system) = system {
            body.insert("system".into(), Value::String(system));
        }
        for (key, value) in &request.extra_params {
            body.insert(key.clone(), value.clone());
        }
        Ok(Value::Object(body))
    }
}

/// Split a chat-completions transcript into the Messages API `system` string
/// and message list.
///
/// - `system` messages are lifted out; the last one wins.
/// - `tool` messages become a user turn holding one `tool_result` block.
/// - assistant messages with `tool_calls` become `text` plus `tool_use`
///   blocks, with the JSON-encoded arguments decoded into `input`.
pub fn convert_messages(messages: &[Message]) -> ProviderResult<(Option<String>, Vec<Value>)> {
    let mut system = None;
    let mut converted = Vec::with_capacity(messages.len());

    for msg in messages {
        if msg.is_system() {
            system = Some(content_text(&msg.content));
            continue;
        }

        if msg.role == "tool" {
            let tool_use_id = msg
                .extra
                .get("tool_call_id")
                .and_then(Value::as_str)
                .ok_or_else(|| ProviderError::Parse("tool message without tool_call_id".to_string()))?;
            converted.push(json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": content_text(&msg.content),
                }],
            }));
            continue;
        }

        let calls = msg
            .extra
            .get("tool_calls")
            .and_then(Value::as_array)
            .filter(|calls| !calls.is_empty());
        match calls {
            Some(calls) => {
                let mut blocks = Vec::with_capacity(calls.len() + 1);
                let text = content_text(&msg.content);
                if !text.is_empty() {
                    blocks.push(json!({"type": "text", "text": text}));
                }
                for call in calls {
                    blocks.push(tool_use_block(call)?);
                }
                converted.push(json!({"role": "assistant", "content": blocks}));
            }
            None => converted.push(json!({
                "role": msg.role,
                "content": content_text(&msg.content),
            })),
        }
    }

    Ok((system, converted))
}

fn tool_use_block(call: &Value) -> ProviderResult<Value> {
    let id = call["id"].as_str().unwrap_or_default();
    let function = &call["function"];
    let name = function["name"]
        .as_str()
        .ok_or_else(|| ProviderError::Parse(format!("tool call {} has no function name", id)))?;
    let input = match &function["arguments"] {
        Value::String(raw) if raw.trim().is_empty() => json!({}),
        Value::String(raw) => serde_json::from_str(raw)
            .map_err(|e| ProviderError::Parse(format!("tool call {} arguments: {}", id, e)))?,
        Value::Null => json!({}),
        other => other.clone(),
    };
    Ok(json!({"type": "tool_use", "id": id, "name": name, "input": input}))
}

fn content_text(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    model: String,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Deserialize)]
struct AnthropicError {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

#[async_trait]
impl LLMProvider for AnthropicClient {
    fn name(&self) -> &str {
        &self.service
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse> {
        self.rate_limiter.acquire().await;

        let start = Instant::now();
        let body = self.request_body(request)?;
        if request.stream {
            tracing::debug!("{}: streaming not used for the Messages API", self.service);
        }

        let response = self
            .http_client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("anthropic-beta", CONTEXT_BETA)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let latency_ms = start.elapsed().as_millis() as u64;
        let status = response.status();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry_after_ms(response.headers()),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<AnthropicError>(&body) {
                Ok(error) => error.error.message,
                Err(_) => format!("HTTP {}: {}", status.as_u16(), body),
            };
            if status == 401 || status == 403 {
                return Err(ProviderError::Config(format!(
                    "{} auth error ({}): {}",
                    self.service,
                    status.as_u16(),
                    message
                )));
            }
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let api_response: MessagesResponse = response.json().await?;
        self.rate_limiter
            .record_tokens(api_response.usage.input_tokens + api_response.usage.output_tokens)
            .await;

        let content = api_response
            .content
            .iter()
            .filter(|block| block.content_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<String>();

        Ok(CompletionResponse {
            content,
            model: api_response.model,
            input_tokens: api_response.usage.input_tokens,
            output_tokens: api_response.usage.output_tokens,
            finish_reason: api_response.stop_reason.unwrap_or_else(|| "unknown".to_string()),
            latency_ms,
        })
    }

    fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }
}
