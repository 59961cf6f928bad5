//! LLM provider trait.

use async_trait::async_trait;

use super::error::LLMError;
use super::types::{ChatRequest, ChatResponse, ChatStream};

/// A chat completions backend.
///
/// `chat_stream` resolves once the upstream has accepted the request; the
/// returned stream then yields content deltas until a `Done` event or an error.
/// Dropping the stream must release the upstream connection.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Make a single-shot chat completion request.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError>;

    /// Make a streaming chat completion request.
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LLMError>;
}
