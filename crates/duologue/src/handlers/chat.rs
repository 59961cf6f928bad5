//! `POST /chat`: compose the prompt, resolve the model and stream the reply
//! as server-sent events.

use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::prompt::{ConversationTurn, Participant};
use crate::relay::{self, GenerationRequest, RelayEvent, RelayStream};
use crate::server::AppState;

/// Role used when the request names none.
const DEFAULT_ROLE: Participant = Participant::Left;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub world_setting: String,
    #[serde(default)]
    pub message: String,
    /// Signed so that negative values reach validation instead of failing
    /// JSON decoding.
    #[serde(default)]
    pub max_tokens: Option<i64>,
}

// ============================================================================
// Handler
// ============================================================================

/// POST /chat
///
/// Every response is `text/event-stream`. Content chunks are sent as raw
/// `data:` events, followed by exactly one `[DONE]` or `[ERROR] <message>`.
/// Errors found before the upstream call are reported the same way.
pub async fn chat(State(state): State<AppState>, Json(body): Json<ChatBody>) -> Response {
    let events: BoxStream<'static, RelayEvent> = match start_relay(&state, body) {
        Ok(relay) => relay.boxed(),
        Err(e) => {
            warn!(error = %e, "Rejected chat request");
            stream::once(async move { RelayEvent::Error(e.to_string()) }).boxed()
        }
    };

    let sse_stream = events.map(|event| Ok::<_, Infallible>(sse_event(event)));

    let keep_alive = KeepAlive::new()
        .interval(Duration::from_secs(state.keep_alive_interval_seconds))
        .text("keep-alive");

    Sse::new(sse_stream).keep_alive(keep_alive).into_response()
}

// ============================================================================
// Helpers
// ============================================================================

/// Resolve defaults, compose messages and open the relay.
fn start_relay(state: &AppState, body: ChatBody) -> Result<RelayStream, RelayError> {
    let role = match body.role.as_deref() {
        Some(role) => role.parse()?,
        None => DEFAULT_ROLE,
    };

    let model = body
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| state.chat.model_for(role).to_string());

    let temperature = body.temperature.unwrap_or(state.chat.temperature);
    let max_tokens = effective_max_tokens(body.max_tokens, state.chat.max_tokens)?;

    let messages = state.composer.compose(
        role,
        &body.world_setting,
        &body.history,
        &body.message,
        state.chat.history_length,
    );

    debug!(
        %role,
        model = %model,
        system_prompt = %messages[0].content,
        history = messages.len() - 1 - usize::from(!body.message.trim().is_empty()),
        message = %body.message.trim(),
        "Composed chat request"
    );

    let handle = state.factory.resolve(&model)?;

    relay::stream(
        handle.provider,
        GenerationRequest {
            messages,
            temperature,
            model: handle.profile,
            max_tokens: Some(max_tokens),
            streaming: true,
        },
    )
}

fn effective_max_tokens(requested: Option<i64>, default: u32) -> Result<u32, RelayError> {
    match requested {
        None => Ok(default),
        Some(n) if n <= 0 => Err(RelayError::InvalidArgument(format!(
            "max_tokens must be positive, got {n}"
        ))),
        Some(n) => u32::try_from(n)
            .map_err(|_| RelayError::InvalidArgument(format!("max_tokens too large: {n}"))),
    }
}

/// SSE cannot carry carriage returns; fold them into newlines, which axum
/// splits across `data:` lines.
fn sse_event(event: RelayEvent) -> Event {
    let data = event.into_sse_data();
    if data.contains('\r') {
        Event::default().data(data.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Event::default().data(data)
    }
}
