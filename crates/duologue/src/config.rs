use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::Path;

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

use crate::llm::{ModelProfile, ProviderRegistry};
use crate::prompt::{Participant, PromptTemplate};
use crate::relay::TEMPERATURE_RANGE;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    /// Model registry entries. Empty means the built-in table.
    #[serde(default)]
    pub models: Vec<ModelProfile>,
    /// Persona text per role (`ai_left`, `ai_right`).
    #[serde(default)]
    pub personas: HashMap<String, String>,
    #[serde(default)]
    pub prompt_template: PromptTemplate,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Ok(serde_saphyr::from_str(&contents)?)
    }

    /// Build the model registry described by this config.
    pub fn registry(&self) -> Result<ProviderRegistry, ConfigError> {
        if self.models.is_empty() {
            return Ok(ProviderRegistry::builtin());
        }
        ProviderRegistry::new(self.models.clone()).map_err(ConfigError::Invalid)
    }

    /// Check cross-field constraints and return the registry.
    pub fn validate(&self) -> Result<ProviderRegistry, ConfigError> {
        let registry = self.registry()?;
        let chat = &self.chat;

        if !TEMPERATURE_RANGE.contains(&chat.temperature) {
            return Err(ConfigError::Invalid(format!(
                "chat.temperature must be between 0 and 2, got {}",
                chat.temperature
            )));
        }
        if chat.max_tokens == 0 {
            return Err(ConfigError::Invalid(
                "chat.max_tokens must be positive".to_string(),
            ));
        }
        if !registry.contains(&chat.default_model) {
            return Err(ConfigError::Invalid(format!(
                "chat.default_model '{}' is not a configured model",
                chat.default_model
            )));
        }
        for (role, model) in &chat.role_models {
            role.parse::<Participant>()
                .map_err(|e| ConfigError::Invalid(format!("chat.role_models: {e}")))?;
            if !registry.contains(model) {
                return Err(ConfigError::Invalid(format!(
                    "chat.role_models.{role} '{model}' is not a configured model"
                )));
            }
        }

        Ok(registry)
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_keep_alive_interval")]
    pub keep_alive_interval_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
            keep_alive_interval_seconds: default_keep_alive_interval(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_request_timeout() -> u64 {
    300
}

fn default_keep_alive_interval() -> u64 {
    15
}

// ============================================================================
// ChatConfig
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Model used when neither the request nor `role_models` names one.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Model per role; consulted before `default_model`.
    #[serde(default = "default_role_models")]
    pub role_models: BTreeMap<String, String>,
    /// Maximum number of history entries forwarded upstream.
    #[serde(default = "default_history_length")]
    pub history_length: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Turns per round in the browser UI; passed through to `/get_config`.
    #[serde(default = "default_rounds")]
    pub default_rounds: u32,
    #[serde(default = "default_chat_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            role_models: default_role_models(),
            history_length: default_history_length(),
            temperature: default_temperature(),
            default_rounds: default_rounds(),
            max_tokens: default_chat_max_tokens(),
        }
    }
}

impl ChatConfig {
    /// Model for `role`, falling back to `default_model`.
    pub fn model_for(&self, role: Participant) -> &str {
        self.role_models
            .get(role.as_str())
            .unwrap_or(&self.default_model)
    }
}

fn default_model() -> String {
    "grok-2-latest".to_string()
}

fn default_role_models() -> BTreeMap<String, String> {
    [Participant::Left, Participant::Right]
        .into_iter()
        .map(|p| (p.as_str().to_string(), default_model()))
        .collect()
}

fn default_history_length() -> usize {
    50
}

fn default_temperature() -> f32 {
    1.3
}

fn default_rounds() -> u32 {
    2
}

fn default_chat_max_tokens() -> u32 {
    2000
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.request_timeout_seconds, 300);
        assert_eq!(config.server.keep_alive_interval_seconds, 15);
        assert_eq!(config.chat.default_model, "grok-2-latest");
        assert_eq!(config.chat.history_length, 50);
        assert_eq!(config.chat.temperature, 1.3);
        assert_eq!(config.chat.default_rounds, 2);
        assert_eq!(config.chat.max_tokens, 2000);
        assert_eq!(config.chat.model_for(Participant::Left), "grok-2-latest");
        assert!(config.models.is_empty());
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_missing_file_returns_defaults() {
        let tmp_dir = TempDir::new().unwrap();
        let missing_path = tmp_dir.path().join("missing-config.yaml");
        let config = Config::load(&missing_path).await.unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.chat.default_model, "grok-2-latest");
    }

    #[tokio::test]
    async fn test_load_valid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server:
  host: "0.0.0.0"
  port: 3000
chat:
  default_model: "deepseek-chat"
  role_models:
    ai_left: "deepseek-chat"
    ai_right: "local-llama"
  history_length: 20
  temperature: 0.9
models:
  - id: "deepseek-chat"
    api_key_env: "DEEPSEEK_API_KEY"
    base_url: "https://api.deepseek.com"
  - id: "local-llama"
    api_key_env: "LOCAL_KEY"
    base_url: "http://127.0.0.1:11434/v1"
    timeout_seconds: 120
    max_tokens: 512
personas:
  ai_left: "You are a sailor."
  ai_right: "You are a lighthouse keeper."
prompt_template: "{{persona}}\nSetting: {{world_setting}}"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.request_timeout_seconds, 300); // default
        assert_eq!(config.chat.history_length, 20);
        assert_eq!(config.chat.temperature, 0.9);
        assert_eq!(config.chat.max_tokens, 2000); // default
        assert_eq!(config.chat.model_for(Participant::Right), "local-llama");
        assert_eq!(config.personas["ai_left"], "You are a sailor.");
        assert_eq!(
            config.prompt_template.as_str(),
            "{persona}\nSetting: {world_setting}"
        );

        let registry = config.validate().unwrap();
        let local = registry.lookup("local-llama").unwrap();
        assert_eq!(local.timeout_seconds, 120);
        assert_eq!(local.max_tokens, 512);
        assert!(registry.lookup("grok-2-latest").is_err());
    }

    #[tokio::test]
    async fn test_load_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = Config::load(file.path()).await;
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_default_model() {
        let config = Config {
            chat: ChatConfig {
                default_model: "gpt-unknown".to_string(),
                ..ChatConfig::default()
            },
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("gpt-unknown"));
    }

    #[test]
    fn test_validate_rejects_unknown_role() {
        let mut role_models = default_role_models();
        role_models.insert("ai_center".to_string(), "grok-2-latest".to_string());
        let config = Config {
            chat: ChatConfig {
                role_models,
                ..ChatConfig::default()
            },
            ..Config::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("ai_center"));
    }

    #[test]
    fn test_validate_rejects_temperature_out_of_range() {
        let config = Config {
            chat: ChatConfig {
                temperature: 2.5,
                ..ChatConfig::default()
            },
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_model_for_falls_back_to_default() {
        let chat = ChatConfig {
            default_model: "deepseek-chat".to_string(),
            role_models: BTreeMap::new(),
            ..ChatConfig::default()
        };
        assert_eq!(chat.model_for(Participant::Right), "deepseek-chat");
    }

    #[test]
    fn test_config_error_display() {
        let io_error = ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "test",
        ));
        assert!(io_error.to_string().contains("failed to read config file"));
    }
}
