//! Client factory: model identifier -> ready-to-use provider connection.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client;
use tracing::{debug, warn};

use super::openai::OpenAICompatibleProvider;
use super::provider::LLMProvider;
use super::registry::{ModelProfile, ProviderRegistry};
use crate::error::RelayError;

/// Where API keys come from.
pub trait CredentialSource: Send + Sync {
    /// Value of the named credential, if set.
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads credentials from the process environment at lookup time.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl CredentialSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// A resolved connection for a single call.
pub struct ConnectionHandle {
    pub profile: ModelProfile,
    pub provider: Arc<dyn LLMProvider>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

/// Resolves model identifiers into [`ConnectionHandle`]s.
#[derive(Clone)]
pub struct ClientFactory {
    registry: Arc<ProviderRegistry>,
    credentials: Arc<dyn CredentialSource>,
}

impl ClientFactory {
    pub fn new(registry: Arc<ProviderRegistry>, credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            registry,
            credentials,
        }
    }

    /// Factory over the process environment.
    pub fn from_env(registry: Arc<ProviderRegistry>) -> Self {
        Self::new(registry, Arc::new(EnvCredentials))
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Resolve `model` to a connection.
    ///
    /// Unknown models fail with `UnsupportedModel` before any credential is
    /// read. A missing or blank credential fails with `Configuration` naming
    /// the variable.
    pub fn resolve(&self, model: &str) -> Result<ConnectionHandle, RelayError> {
        let profile = self.registry.lookup(model).inspect_err(|e| {
            warn!(model, error = %e, "Rejected unsupported model");
        })?;

        let api_key = self
            .credentials
            .get(&profile.api_key_env)
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                warn!(model, env = %profile.api_key_env, "API key not set");
                RelayError::Configuration(format!(
                    "API key for {model} is not set (environment variable: {})",
                    profile.api_key_env
                ))
            })?;

        let client = Client::builder()
            .connect_timeout(profile.timeout())
            .read_timeout(profile.timeout())
            .build()
            .map_err(|e| RelayError::Configuration(format!("failed to build HTTP client: {e}")))?;

        debug!(model, base_url = %profile.base_url, "Resolved model connection");

        let provider =
            OpenAICompatibleProvider::new(client, profile.base_url.clone(), Some(api_key));

        Ok(ConnectionHandle {
            profile: profile.clone(),
            provider: Arc::new(provider),
        })
    }
}
