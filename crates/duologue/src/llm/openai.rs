//! OpenAI-compatible LLM provider.
//!
//! DeepSeek, xAI and most hosted models expose this API shape, so one client
//! covers every entry in the model registry.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use reqwest::Client;
use tracing::debug;

use super::error::{LLMError, api_error};
use super::provider::LLMProvider;
use super::types::{ChatRequest, ChatResponse, ChatStream, Message, StreamEvent, Usage};

/// OpenAI-compatible provider.
pub struct OpenAICompatibleProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAICompatibleProvider {
    #[must_use]
    pub fn new(client: Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            api_key,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request<T: serde::Serialize>(&self, body: &T) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(self.completions_url())
            .header("Content-Type", "application/json");

        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        req.json(body)
    }
}

#[async_trait]
impl LLMProvider for OpenAICompatibleProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let response = self.build_request(&request).send().await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        Ok(response.json().await?)
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        let stream_request = StreamRequest {
            model: request.model,
            messages: request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
        };

        let response = self.build_request(&stream_request).send().await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let status = response.status().as_u16();
        let byte_stream = response.bytes_stream();
        Ok(Box::pin(StreamParser::new(byte_stream, status)))
    }
}

// ============================================================================
// Streaming
// ============================================================================

#[derive(serde::Serialize)]
struct StreamRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

/// Parses an OpenAI-style SSE byte stream into [`StreamEvent`]s.
///
/// Bytes are buffered until a full line is available so multi-byte UTF-8
/// sequences split across network chunks decode correctly. The parser fuses
/// after `Done` or the first error.
pub(crate) struct StreamParser<S> {
    inner: S,
    buffer: Vec<u8>,
    http_status: u16,
    usage: Option<Usage>,
    eof: bool,
    done: bool,
}

impl<S> StreamParser<S> {
    pub(crate) fn new(inner: S, http_status: u16) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            http_status,
            usage: None,
            eof: false,
            done: false,
        }
    }

    /// Handle one complete line. Returns an item to yield, if any.
    fn handle_line(&mut self, line: &str) -> Option<Result<StreamEvent, LLMError>> {
        let line = line.trim();

        // Blank separators, `event:`/`id:` fields and `: keep-alive` comments.
        let data = line.strip_prefix("data:")?.trim_start();

        if data == "[DONE]" {
            self.done = true;
            return Some(Ok(StreamEvent::Done {
                usage: self.usage.take(),
            }));
        }

        match serde_json::from_str::<StreamPayload>(data) {
            Ok(StreamPayload::Chunk(chunk)) => {
                if chunk.usage.is_some() {
                    self.usage = chunk.usage;
                }
                chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.delta.content)
                    .filter(|content| !content.is_empty())
                    .map(|content| Ok(StreamEvent::Token(content)))
            }
            Ok(StreamPayload::Error { error }) => {
                self.done = true;
                Some(Err(LLMError::Api {
                    status: error.status_code().unwrap_or(self.http_status),
                    message: error.message,
                }))
            }
            Err(e) => {
                debug!(error = %e, data, "Unparseable stream payload");
                self.done = true;
                Some(Err(LLMError::Decode(format!("{e}: {data}"))))
            }
        }
    }

    fn next_line(&mut self) -> Option<String> {
        let line_end = self.buffer.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

impl<S> Stream for StreamParser<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<StreamEvent, LLMError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            while let Some(line) = self.next_line() {
                if let Some(item) = self.handle_line(&line) {
                    return Poll::Ready(Some(item));
                }
            }

            if self.eof {
                // Flush a trailing line that had no newline.
                if !self.buffer.is_empty() {
                    let rest = std::mem::take(&mut self.buffer);
                    let line = String::from_utf8_lossy(&rest).into_owned();
                    if let Some(item) = self.handle_line(&line) {
                        return Poll::Ready(Some(item));
                    }
                }
                // Upstream closed without `[DONE]`; treat as a graceful end.
                self.done = true;
                return Poll::Ready(Some(Ok(StreamEvent::Done {
                    usage: self.usage.take(),
                })));
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    self.buffer.extend_from_slice(&bytes);
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(LLMError::Request(e))));
                }
                Poll::Ready(None) => {
                    self.eof = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum StreamPayload {
    Error { error: StreamError },
    Chunk(StreamChunk),
}

#[derive(serde::Deserialize)]
struct StreamError {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

impl StreamError {
    fn status_code(&self) -> Option<u16> {
        match self.code.as_ref()? {
            serde_json::Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

#[derive(serde::Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(serde::Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Default, serde::Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn parser_over(
        chunks: &[&str],
    ) -> StreamParser<impl Stream<Item = Result<Bytes, reqwest::Error>> + Unpin> {
        let items: Vec<Result<Bytes, reqwest::Error>> = chunks
            .iter()
            .map(|c| Ok(Bytes::from(c.to_string())))
            .collect();
        StreamParser::new(futures::stream::iter(items), 200)
    }

    fn delta(content: &str) -> String {
        format!(
            "data: {{\"choices\":[{{\"index\":0,\"delta\":{{\"content\":{}}}}}]}}\n\n",
            serde_json::to_string(content).unwrap()
        )
    }

    #[tokio::test]
    async fn test_parses_tokens_then_done() {
        let body = format!("{}{}data: [DONE]\n\n", delta("Hel"), delta("lo"));
        let events: Vec<_> = parser_over(&[body.as_str()]).collect().await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].as_ref().unwrap(), &StreamEvent::Token("Hel".into()));
        assert_eq!(events[1].as_ref().unwrap(), &StreamEvent::Token("lo".into()));
        assert_eq!(events[2].as_ref().unwrap(), &StreamEvent::Done { usage: None });
    }

    #[tokio::test]
    async fn test_skips_role_only_and_empty_deltas() {
        let body = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"\"}}]}\n\n",
            ": keep-alive\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"ok\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        let events: Vec<_> = parser_over(&[body]).collect().await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap(), &StreamEvent::Token("ok".into()));
    }

    #[tokio::test]
    async fn test_line_split_across_chunks() {
        let line = delta("风景");
        let bytes = line.as_bytes();
        // Split inside the multi-byte sequence.
        let split = line.find('风').unwrap() + 1;
        let items: Vec<Result<Bytes, reqwest::Error>> = vec![
            Ok(Bytes::copy_from_slice(&bytes[..split])),
            Ok(Bytes::copy_from_slice(&bytes[split..])),
            Ok(Bytes::from_static(b"data: [DONE]\n\n")),
        ];
        let events: Vec<_> = StreamParser::new(futures::stream::iter(items), 200)
            .collect()
            .await;

        assert_eq!(events[0].as_ref().unwrap(), &StreamEvent::Token("风景".into()));
    }

    #[tokio::test]
    async fn test_data_prefix_without_space() {
        let events: Vec<_> = parser_over(&[
            "data:{\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n",
            "data:[DONE]\n",
        ])
        .collect()
        .await;

        assert_eq!(events[0].as_ref().unwrap(), &StreamEvent::Token("x".into()));
        assert_eq!(events[1].as_ref().unwrap(), &StreamEvent::Done { usage: None });
    }

    #[tokio::test]
    async fn test_eof_without_done_marker_completes() {
        let body = delta("tail");
        let events: Vec<_> = parser_over(&[body.trim_end()]).collect().await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap(), &StreamEvent::Token("tail".into()));
        assert!(matches!(events[1], Ok(StreamEvent::Done { .. })));
    }

    #[tokio::test]
    async fn test_usage_is_reported_on_done() {
        let body = concat!(
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":2,\"total_tokens\":5}}\n\n",
            "data: [DONE]\n\n",
        );
        let events: Vec<_> = parser_over(&[body]).collect().await;

        let Ok(StreamEvent::Done { usage: Some(usage) }) = &events[0] else {
            panic!("expected done with usage, got {:?}", events[0]);
        };
        assert_eq!(usage.total_tokens, 5);
    }

    #[tokio::test]
    async fn test_error_payload_ends_stream() {
        let body = format!(
            "{}data: {{\"error\":{{\"message\":\"overloaded\",\"code\":503}}}}\n\n{}",
            delta("Hel"),
            delta("never")
        );
        let events: Vec<_> = parser_over(&[body.as_str()]).collect().await;

        assert_eq!(events.len(), 2);
        match &events[1] {
            Err(LLMError::Api { status, message }) => {
                assert_eq!(*status, 503);
                assert_eq!(message, "overloaded");
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_garbage_payload_is_decode_error() {
        let events: Vec<_> = parser_over(&["data: {not json\n\n"]).collect().await;

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Err(LLMError::Decode(_))));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let provider = OpenAICompatibleProvider::new(Client::new(), "https://api.x.ai/v1/", None);
        assert_eq!(
            provider.completions_url(),
            "https://api.x.ai/v1/chat/completions"
        );
    }
}
