//! Model services

pub mod anthropic;
pub mod openai;
pub mod traits;

pub use anthropic::{convert_messages, is_claude_service, AnthropicClient};
pub use openai::{env_prefix, ChatCompletionsClient};
pub use traits::{
    CompletionRequest, CompletionResponse, LLMProvider, Message, ProviderError, ProviderResult,
};

use crate::config::Config;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Create the client for a named service, applying settings from config.
/// Services whose name contains `claude` use the Messages API; all others
/// use chat completions.
pub fn create_provider(service: &str, config: &Config) -> ProviderResult<Arc<dyn LLMProvider>> {
    let settings = config.get_service(service);
    let client: Arc<dyn LLMProvider> = if is_claude_service(service) {
        Arc::new(AnthropicClient::from_config(service, settings)?)
    } else {
        Arc::new(ChatCompletionsClient::from_config(service, settings)?)
    };
    tracing::info!("Using service {} (model {})", service, client.default_model());
    Ok(client)
}

/// Services configured in the environment: every `{SERVICE}_API_KEY` that
/// also has `{SERVICE}_BASE_URL` and `{SERVICE}_MODEL_NAME`
pub fn list_env_services() -> Vec<String> {
    let vars: BTreeSet<String> = std::env::vars().map(|(key, _)| key).collect();
    vars.iter()
        .filter_map(|key| key.strip_suffix("_API_KEY"))
        .filter(|prefix| !prefix.is_empty())
        .filter(|prefix| {
            vars.contains(&format!("{}_BASE_URL", prefix))
                && vars.contains(&format!("{}_MODEL_NAME", prefix))
        })
        .map(str::to_string)
        .collect()
}

/// Services from the config file and the environment, sorted
pub fn list_services(config: &Config) -> Vec<String> {
    let mut services: BTreeSet<String> = config.services.keys().cloned().collect();
    let configured: BTreeSet<String> = services.iter().map(|s| env_prefix(s)).collect();
    services.extend(
        list_env_services()
            .into_iter()
            .filter(|name| !configured.contains(name)),
    );
    services.into_iter().collect()
}
