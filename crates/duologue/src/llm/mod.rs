//! Upstream LLM access: model registry, client factory and the
//! OpenAI-compatible chat completions client.

mod error;
mod factory;
mod openai;
mod provider;
mod registry;
mod types;

pub use error::LLMError;
pub use factory::{ClientFactory, ConnectionHandle, CredentialSource, EnvCredentials};
pub use openai::OpenAICompatibleProvider;
pub use provider::LLMProvider;
pub use registry::{ModelProfile, ProviderRegistry, UnsupportedModel};
pub use types::{ChatRequest, ChatResponse, ChatStream, Choice, Message, Role, StreamEvent, Usage};
