//! Configuration management for the evaluation harness
//!
//! Loads service endpoints and run settings from TOML files. Anything not
//! set in the file falls back to `{SERVICE}_API_KEY`, `{SERVICE}_BASE_URL`
//! and `{SERVICE}_MODEL_NAME` environment variables.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::analysis::DEFAULT_ANSWER_TAG;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub services: HashMap<String, ServiceConfig>,
    #[serde(default)]
    pub runner: RunnerSettings,
    #[serde(default)]
    pub evaluation: EvaluationSettings,
}

/// A model service: an OpenAI-compatible endpoint, or the Messages API
/// for services whose name contains `claude`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Environment variable holding the API key; defaults to `{SERVICE}_API_KEY`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Requests per minute
    #[serde(default = "default_rpm")]
    pub rpm: u32,
    /// Tokens per minute
    #[serde(default = "default_tpm")]
    pub tpm: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_key_env: None,
            base_url: None,
            model: None,
            rpm: default_rpm(),
            tpm: default_tpm(),
        }
    }
}

/// Settings for the `run` command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Service used when the command line does not name one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(default = "default_true")]
    pub resume: bool,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Extra request body fields, passed through verbatim
    #[serde(default)]
    pub extra_params: IndexMap<String, Value>,
}

/// Settings for answer extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSettings {
    #[serde(default = "default_answer_tag")]
    pub answer_tag: String,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            answer_tag: default_answer_tag(),
        }
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_rpm() -> u32 { 60 }
fn default_tpm() -> u32 { 1_000_000 }
fn default_temperature() -> f32 { 0.7 }
fn default_workers() -> usize { 1 }
fn default_retry_count() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 1000 }
fn default_max_retry_delay_ms() -> u64 { 60_000 }
fn default_timeout_ms() -> u64 { 1_200_000 }
fn default_answer_tag() -> String { DEFAULT_ANSWER_TAG.to_string() }

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            service: None,
            temperature: default_temperature(),
            max_tokens: None,
            workers: default_workers(),
            stream: true,
            resume: true,
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            timeout_ms: default_timeout_ms(),
            extra_params: IndexMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load from default config location or return defaults
    pub fn load_or_default() -> Self {
        let config_paths = ["config/eval.toml", "../config/eval.toml"];

        for path in &config_paths {
            if !Path::new(path).exists() {
                continue;
            }
            match Self::from_file(path) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", path);
                    return config;
                }
                Err(e) => tracing::warn!("Ignoring {}: {}", path, e),
            }
        }

        tracing::debug!("Using default configuration");
        Self::default()
    }

    /// Save configuration to a TOML file
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Sample file written by `init-config`
    pub fn sample() -> Self {
        let mut services = HashMap::new();
        services.insert(
            "openai".to_string(),
            ServiceConfig {
                base_url: Some("https://api.openai.com/v1".to_string()),
                model: Some("gpt-4o".to_string()),
                rpm: 500,
                tpm: 2_000_000,
                ..Default::default()
            },
        );
        services.insert(
            "deepseek".to_string(),
            ServiceConfig {
                base_url: Some("https://api.deepseek.com/v1".to_string()),
                model: Some("deepseek-chat".to_string()),
                ..Default::default()
            },
        );
        services.insert(
            "claude".to_string(),
            ServiceConfig {
                model: Some("claude-sonnet-4-5".to_string()),
                rpm: 50,
                tpm: 400_000,
                ..Default::default()
            },
        );

        Self {
            services,
            runner: RunnerSettings {
                service: Some("openai".to_string()),
                ..Default::default()
            },
            evaluation: EvaluationSettings::default(),
        }
    }

    /// Get a specific service config. Lookup ignores case.
    pub fn get_service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.get(name).or_else(|| {
            self.services
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, service)| service)
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.services.is_empty());
        assert_eq!(config.runner.workers, 1);
        assert!(config.runner.stream);
        assert_eq!(config.evaluation.answer_tag, "answer");
    }

    #[test]
    fn test_parse_toml_config() {
        let toml = r#"
[services.deepseek]
base_url = "https://api.deepseek.com/v1"
model = "deepseek-chat"
rpm = 100

[runner]
service = "deepseek"
workers = 8
stream = false

[runner.extra_params]
top_p = 0.9

[evaluation]
answer_tag = "final"
"#;
        let config = Config::from_toml(toml).unwrap();
        let service = config.get_service("DeepSeek").unwrap();
        assert_eq!(service.model.as_deref(), Some("deepseek-chat"));
        assert_eq!(service.rpm, 100);
        assert_eq!(service.tpm, default_tpm());
        assert_eq!(config.runner.workers, 8);
        assert!(!config.runner.stream);
        assert!(config.runner.resume);
        assert_eq!(config.runner.extra_params["top_p"], serde_json::json!(0.9));
        assert_eq!(config.evaluation.answer_tag, "final");
    }

    #[test]
    fn test_sample_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config/eval.toml");
        Config::sample().save_toml(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.runner.service.as_deref(), Some("openai"));
        assert!(loaded.services.contains_key("deepseek"));
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        assert!(matches!(
            Config::from_toml("[runner\nworkers = 2"),
            Err(ConfigError::Parse(_))
        ));
    }
}
