//! Model registry: static connection parameters per model identifier.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Connection parameters for one upstream model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Model identifier sent upstream (e.g. `deepseek-chat`).
    pub id: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Base URL of the OpenAI-compatible endpoint.
    pub base_url: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl ModelProfile {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    fn builtin(id: &str, api_key_env: &str, base_url: &str) -> Self {
        Self {
            id: id.to_string(),
            api_key_env: api_key_env.to_string(),
            base_url: base_url.to_string(),
            timeout_seconds: default_timeout_seconds(),
            max_tokens: default_max_tokens(),
        }
    }

    /// Check the profile for values that would only fail at request time.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("model id must not be empty".to_string());
        }
        if self.api_key_env.trim().is_empty() {
            return Err(format!("model '{}': api_key_env must not be empty", self.id));
        }
        let url = Url::parse(&self.base_url)
            .map_err(|e| format!("model '{}': invalid base_url: {e}", self.id))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!(
                "model '{}': base_url must be http or https, got '{}'",
                self.id,
                url.scheme()
            ));
        }
        if self.timeout_seconds == 0 {
            return Err(format!("model '{}': timeout_seconds must be positive", self.id));
        }
        if self.max_tokens == 0 {
            return Err(format!("model '{}': max_tokens must be positive", self.id));
        }
        Ok(())
    }
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_max_tokens() -> u32 {
    2000
}

/// Lookup of a model identifier that the registry does not know.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported model: {0}")]
pub struct UnsupportedModel(pub String);

/// Immutable mapping from model identifier to [`ModelProfile`].
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    profiles: Vec<ModelProfile>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProviderRegistry {
    /// Build a registry from validated profiles.
    ///
    /// Later duplicates of an identifier are rejected.
    pub fn new(profiles: Vec<ModelProfile>) -> Result<Self, String> {
        for (i, profile) in profiles.iter().enumerate() {
            profile.validate()?;
            if profiles[..i].iter().any(|p| p.id == profile.id) {
                return Err(format!("duplicate model id '{}'", profile.id));
            }
        }
        Ok(Self { profiles })
    }

    /// The models this relay ships with.
    pub fn builtin() -> Self {
        Self {
            profiles: vec![
                ModelProfile::builtin(
                    "deepseek-chat",
                    "DEEPSEEK_API_KEY",
                    "https://api.deepseek.com",
                ),
                ModelProfile::builtin(
                    "deepseek-reasoner",
                    "DEEPSEEK_API_KEY",
                    "https://api.deepseek.com",
                ),
                ModelProfile::builtin("grok-2-latest", "GROK_API_KEY", "https://api.x.ai/v1"),
            ],
        }
    }

    pub fn lookup(&self, model: &str) -> Result<&ModelProfile, UnsupportedModel> {
        self.profiles
            .iter()
            .find(|p| p.id == model)
            .ok_or_else(|| UnsupportedModel(model.to_string()))
    }

    pub fn contains(&self, model: &str) -> bool {
        self.lookup(model).is_ok()
    }

    /// Model identifiers in registration order.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.profiles.iter().map(|p| p.id.as_str())
    }
}
