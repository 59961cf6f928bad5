//! Streaming relay: drives one upstream completion and re-frames it as
//! [`RelayEvent`]s.
//!
//! A relay stream yields zero or more `Content` events followed by exactly one
//! terminal `Done` or `Error`, then ends. Upstream items are pulled only when
//! the consumer polls, and dropping the stream drops the upstream response.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use futures::future::BoxFuture;
use futures::stream::FusedStream;
use tracing::{Instrument, Span, debug, info, info_span, warn};
use ulid::Ulid;

use crate::error::RelayError;
use crate::llm::{
    ChatRequest, ChatStream, LLMError, LLMProvider, Message, ModelProfile, StreamEvent,
};

/// Inclusive temperature range accepted by the upstream APIs.
pub const TEMPERATURE_RANGE: std::ops::RangeInclusive<f32> = 0.0..=2.0;

// ============================================================================
// Request / events
// ============================================================================

/// Everything needed for one upstream call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub model: ModelProfile,
    /// Overrides the profile's `max_tokens` when set.
    pub max_tokens: Option<u32>,
    pub streaming: bool,
}

impl GenerationRequest {
    /// Reject arguments the upstream would refuse, before any I/O.
    pub fn validate(&self) -> Result<(), RelayError> {
        if !self.temperature.is_finite() || !TEMPERATURE_RANGE.contains(&self.temperature) {
            return Err(RelayError::InvalidArgument(format!(
                "temperature must be between 0 and 2, got {}",
                self.temperature
            )));
        }
        if self.max_tokens == Some(0) {
            return Err(RelayError::InvalidArgument(
                "max_tokens must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn effective_max_tokens(&self) -> u32 {
        self.max_tokens.unwrap_or(self.model.max_tokens)
    }

    fn to_chat_request(&self) -> ChatRequest {
        ChatRequest {
            model: self.model.id.clone(),
            messages: self.messages.clone(),
            temperature: Some(self.temperature),
            max_tokens: Some(self.effective_max_tokens()),
        }
    }
}

/// One item of relay output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Content(String),
    Done,
    Error(String),
}

impl RelayEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RelayEvent::Content(_))
    }

    /// Payload of the SSE `data:` field for this event.
    pub fn into_sse_data(self) -> String {
        match self {
            RelayEvent::Content(text) => text,
            RelayEvent::Done => "[DONE]".to_string(),
            RelayEvent::Error(message) => format!("[ERROR] {message}"),
        }
    }
}

/// Result of [`generate`]: a lazy stream or the full text.
pub enum Generation {
    Stream(RelayStream),
    Text(String),
}

// ============================================================================
// Entry points
// ============================================================================

/// Dispatch on `request.streaming`.
pub async fn generate(
    provider: Arc<dyn LLMProvider>,
    request: GenerationRequest,
) -> Result<Generation, RelayError> {
    if request.streaming {
        stream(provider, request).map(Generation::Stream)
    } else {
        complete(provider, request).await.map(Generation::Text)
    }
}

/// Start a streaming relay.
///
/// Only validation errors are returned here; everything after that, including
/// failure to connect, arrives as the stream's terminal `Error` event.
pub fn stream(
    provider: Arc<dyn LLMProvider>,
    request: GenerationRequest,
) -> Result<RelayStream, RelayError> {
    let idle_timeout = request.model.timeout();
    stream_with_idle_timeout(provider, request, idle_timeout)
}

pub(crate) fn stream_with_idle_timeout(
    provider: Arc<dyn LLMProvider>,
    request: GenerationRequest,
    idle_timeout: Duration,
) -> Result<RelayStream, RelayError> {
    request.validate()?;
    Ok(RelayStream::new(provider, &request, idle_timeout))
}

/// Non-streaming variant: await the whole completion.
pub async fn complete(
    provider: Arc<dyn LLMProvider>,
    request: GenerationRequest,
) -> Result<String, RelayError> {
    request.validate()?;

    let span = request_span(&request);
    async move {
        let response = provider
            .chat(request.to_chat_request())
            .await
            .map_err(RelayError::from)
            .inspect_err(|e| warn!(error = %e, "Completion failed"))?;

        let content = response.into_content().unwrap_or_default();
        info!(chars = content.len(), "Completion finished");
        Ok(content)
    }
    .instrument(span)
    .await
}

fn request_span(request: &GenerationRequest) -> Span {
    info_span!(
        "relay",
        request_id = %Ulid::new(),
        model = %request.model.id,
        messages = request.messages.len(),
    )
}

// ============================================================================
// RelayStream
// ============================================================================

enum State {
    Connecting(BoxFuture<'static, Result<ChatStream, LLMError>>),
    Streaming(ChatStream),
    Finished,
}

/// Lazy relay output for one call. See the module docs for the event contract.
pub struct RelayStream {
    state: State,
    idle_timeout: Duration,
    chunks: usize,
    span: Span,
}

impl RelayStream {
    fn new(
        provider: Arc<dyn LLMProvider>,
        request: &GenerationRequest,
        idle_timeout: Duration,
    ) -> Self {
        let span = request_span(request);
        let chat_request = request.to_chat_request();

        let connect = async move {
            match tokio::time::timeout(idle_timeout, provider.chat_stream(chat_request)).await {
                Ok(result) => result,
                Err(_elapsed) => Err(LLMError::IdleTimeout(idle_timeout)),
            }
        };

        Self {
            state: State::Connecting(Box::pin(connect)),
            idle_timeout,
            chunks: 0,
            span,
        }
    }

    /// Number of `Content` events emitted so far.
    pub fn chunks(&self) -> usize {
        self.chunks
    }
}

/// Bound the gap between upstream items; an elapsed gap becomes an error.
fn with_idle_timeout(stream: ChatStream, idle_timeout: Duration) -> ChatStream {
    let timed = tokio_stream::StreamExt::timeout(stream, idle_timeout);
    Box::pin(tokio_stream::StreamExt::map(timed, move |item| match item {
        Ok(result) => result,
        Err(_elapsed) => Err(LLMError::IdleTimeout(idle_timeout)),
    }))
}

impl Stream for RelayStream {
    type Item = RelayEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let _enter = this.span.enter();

        loop {
            match &mut this.state {
                State::Finished => return Poll::Ready(None),

                State::Connecting(connect) => match connect.as_mut().poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Ok(upstream)) => {
                        debug!("Upstream stream opened");
                        this.state =
                            State::Streaming(with_idle_timeout(upstream, this.idle_timeout));
                    }
                    Poll::Ready(Err(e)) => {
                        this.state = State::Finished;
                        return Poll::Ready(Some(fail(e.into(), this.chunks)));
                    }
                },

                State::Streaming(upstream) => match upstream.as_mut().poll_next(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Some(Ok(StreamEvent::Token(text)))) => {
                        if text.is_empty() {
                            continue;
                        }
                        this.chunks += 1;
                        return Poll::Ready(Some(RelayEvent::Content(text)));
                    }
                    Poll::Ready(Some(Ok(StreamEvent::Done { usage }))) => {
                        this.state = State::Finished;
                        info!(chunks = this.chunks, ?usage, "Relay completed");
                        return Poll::Ready(Some(RelayEvent::Done));
                    }
                    Poll::Ready(None) => {
                        this.state = State::Finished;
                        info!(chunks = this.chunks, "Relay completed at end of upstream");
                        return Poll::Ready(Some(RelayEvent::Done));
                    }
                    Poll::Ready(Some(Err(e))) => {
                        this.state = State::Finished;
                        return Poll::Ready(Some(fail(e.into(), this.chunks)));
                    }
                },
            }
        }
    }
}

fn fail(error: RelayError, chunks: usize) -> RelayEvent {
    warn!(chunks, error = %error, "Relay failed");
    RelayEvent::Error(error.to_string())
}

impl FusedStream for RelayStream {
    fn is_terminated(&self) -> bool {
        matches!(self.state, State::Finished)
    }
}

impl Drop for RelayStream {
    fn drop(&mut self) {
        if !matches!(self.state, State::Finished) {
            let _enter = self.span.enter();
            debug!(chunks = self.chunks, "Relay dropped before completion, releasing upstream");
        }
    }
}
