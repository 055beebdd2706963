//! Client for OpenAI-compatible chat-completions endpoints

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;

use super::traits::{CompletionRequest, CompletionResponse, LLMProvider, ProviderError, ProviderResult};
use crate::config::ServiceConfig;
use crate::runner::rate_limiter::RateLimiter;

/// Credentials for a named service: config entry first, then
/// `{SERVICE}_API_KEY`, `{SERVICE}_BASE_URL` and `{SERVICE}_MODEL_NAME`
pub(crate) struct Credentials {
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
}

impl Credentials {
    pub fn resolve(service: &str, config: Option<&ServiceConfig>) -> ProviderResult<Self> {
        let prefix = env_prefix(service);
        let key_var = config
            .and_then(|c| c.api_key_env.clone())
            .unwrap_or_else(|| format!("{}_API_KEY", prefix));
        let api_key = std::env::var(&key_var)
            .map_err(|_| ProviderError::Config(format!("{} not set", key_var)))?;

        let base_url = config
            .and_then(|c| c.base_url.clone())
            .or_else(|| std::env::var(format!("{}_BASE_URL", prefix)).ok());

        let model = config
            .and_then(|c| c.model.clone())
            .or_else(|| std::env::var(format!("{}_MODEL_NAME", prefix)).ok())
            .ok_or_else(|| {
                ProviderError::Config(format!("No model for service {} ({}_MODEL_NAME)", service, prefix))
            })?;

        Ok(Self {
            api_key,
            base_url,
            model,
        })
    }
}

/// `retry-after` header in milliseconds, 60 s when absent
pub(crate) fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> u64 {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(60)
        .saturating_mul(1000)
}

/// Any service that speaks `POST {base_url}/chat/completions`
pub struct ChatCompletionsClient {
    service: String,
    api_key: String,
    base_url: String,
    http_client: Client,
    rate_limiter: Arc<RateLimiter>,
    default_model: String,
}

/// Environment variable prefix for a service name, e.g. `deep-seek` -> `DEEP_SEEK`
pub fn env_prefix(service: &str) -> String {
    service.to_uppercase().replace('-', "_")
}

impl ChatCompletionsClient {
    pub fn new(
        service: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let defaults = ServiceConfig::default();
        Self {
            service: service.into(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client: Client::new(),
            rate_limiter: Arc::new(RateLimiter::new(defaults.rpm, defaults.tpm)),
            default_model: model.into(),
        }
    }

    /// Create from `{SERVICE}_API_KEY`, `{SERVICE}_BASE_URL` and
    /// `{SERVICE}_MODEL_NAME`
    pub fn from_env(service: &str) -> ProviderResult<Self> {
        Self::from_config(service, None)
    }

    /// Create from a config entry, reading unset fields from the environment
    pub fn from_config(service: &str, config: Option<&ServiceConfig>) -> ProviderResult<Self> {
        let credentials = Credentials::resolve(service, config)?;
        let base_url = credentials.base_url.ok_or_else(|| {
            ProviderError::Config(format!(
                "No base_url for service {} ({}_BASE_URL)",
                service,
                env_prefix(service)
            ))
        })?;

        let mut client = Self::new(service, credentials.api_key, base_url, credentials.model);
        if let Some(c) = config {
            client = client.with_rate_limits(c.rpm, c.tpm);
        }
        Ok(client)
    }

    /// Set custom rate limits
    pub fn with_rate_limits(mut self, rpm: u32, tpm: u32) -> Self {
        self.rate_limiter = Arc::new(RateLimiter::new(rpm, tpm));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_body(&self, request: &CompletionRequest) -> ProviderResult<Value> {
        let mut body = Map::new();
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        body.insert("model".into(), Value::String(model.to_string()));
        body.insert(
            "messages".into(),
            serde_json::to_value(&request.messages).map_err(|e| ProviderError::Parse(e.to_string()))?,
        );
        if let Some(temperature) = request.temperature {
            body.insert("temperature".into(), Value::from(temperature));
        }
        body.insert("stream".into(), Value::Bool(request.stream));
        if let Some(max_tokens) = request.max_tokens {
            body.insert("max_tokens".into(), Value::from(max_tokens));
        }
        for (key, value) in &request.extra_params {
            body.insert(key.clone(), value.clone());
        }
        Ok(Value::Object(body))
    }

    async fn read_blocking(&self, response: reqwest::Response) -> ProviderResult<CompletionResponse> {
        let api_response: ChatResponse = response.json().await?;
        let (content, finish_reason) = api_response
            .choices
            .into_iter()
            .next()
            .map(|c| (c.message.content.unwrap_or_default(), c.finish_reason))
            .unwrap_or_default();
        let usage = api_response.usage.unwrap_or_default();

        Ok(CompletionResponse {
            content,
            model: api_response.model.unwrap_or_default(),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            finish_reason: finish_reason.unwrap_or_else(|| "unknown".to_string()),
            latency_ms: 0,
        })
    }

    async fn read_stream(&self, mut response: reqwest::Response) -> ProviderResult<CompletionResponse> {
        let mut stream = StreamAccumulator::default();
        while let Some(chunk) = response.chunk().await? {
            stream.feed(&chunk);
            if stream.done {
                break;
            }
        }
        stream.finish();
        Ok(stream.into_response())
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    model: Option<String>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    model: Option<String>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

/// Assembles server-sent `data:` events into one response. Lines that are
/// not valid JSON are skipped.
#[derive(Default)]
struct StreamAccumulator {
    pending: Vec<u8>,
    content: String,
    model: Option<String>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    done: bool,
}

impl StreamAccumulator {
    fn feed(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.handle_line(&String::from_utf8_lossy(&line));
            if self.done {
                return;
            }
        }
    }

    /// Handle a trailing event that had no newline
    fn finish(&mut self) {
        if !self.done && !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.handle_line(&String::from_utf8_lossy(&line));
        }
    }

    fn handle_line(&mut self, line: &str) {
        let Some(data) = line.trim().strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.done = true;
            return;
        }
        let chunk: StreamChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!("Skipping stream event: {}", e);
                return;
            }
        };
        if chunk.model.is_some() {
            self.model = chunk.model;
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
        if let Some(choice) = chunk.choices.into_iter().next() {
            if let Some(text) = choice.delta.content {
                self.content.push_str(&text);
            }
            if choice.finish_reason.is_some() {
                self.finish_reason = choice.finish_reason;
            }
        }
    }

    fn into_response(self) -> CompletionResponse {
        let usage = self.usage.unwrap_or_default();
        CompletionResponse {
            content: self.content,
            model: self.model.unwrap_or_default(),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            finish_reason: self.finish_reason.unwrap_or_else(|| "unknown".to_string()),
            latency_ms: 0,
        }
    }
}

#[async_trait]
impl LLMProvider for ChatCompletionsClient {
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
        tracing::debug!("Sending request to {}/chat/completions", self.base_url);

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();

        if status == 429 {
            let retry_after = retry_after_ms(response.headers());

            // 429 also signals an exhausted quota, which retrying will not fix
            let body = response.text().await.unwrap_or_default();
            if let Ok(error) = serde_json::from_str::<ApiError>(&body) {
                let error_type = error.error.error_type.as_deref().unwrap_or("");
                if error_type == "insufficient_quota" || error.error.message.contains("exceeded your current quota") {
                    return Err(ProviderError::Config(format!(
                        "{} quota exceeded: {}",
                        self.service, error.error.message
                    )));
                }
                tracing::debug!("Rate limited (type={}): {}", error_type, error.error.message);
            }

            return Err(ProviderError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ApiError>(&body) {
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

        let mut completion = if request.stream {
            self.read_stream(response).await?
        } else {
            self.read_blocking(response).await?
        };
        completion.latency_ms = start.elapsed().as_millis() as u64;
        if completion.model.is_empty() {
            completion.model = body["model"].as_str().unwrap_or_default().to_string();
        }

        self.rate_limiter
            .record_tokens(completion.input_tokens + completion.output_tokens)
            .await;

        Ok(completion)
    }

    fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }
}
