//! Relay error taxonomy.

use std::error::Error as _;

use thiserror::Error;

use crate::llm::{LLMError, UnsupportedModel};

/// Every way a relay call can fail.
///
/// The first three kinds are detected before any upstream I/O; the rest come
/// from the upstream call and are reported through the terminal
/// [`crate::relay::RelayEvent::Error`] when streaming.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("connection failed: {0}")]
    UpstreamConnectivity(String),

    #[error("api error (status {status}): {message}")]
    UpstreamApi { status: u16, message: String },

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl RelayError {
    /// Whether the error was raised before contacting the upstream.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedModel(_) | Self::Configuration(_) | Self::InvalidArgument(_)
        )
    }
}

impl From<UnsupportedModel> for RelayError {
    fn from(err: UnsupportedModel) -> Self {
        Self::UnsupportedModel(err.0)
    }
}

impl From<LLMError> for RelayError {
    fn from(err: LLMError) -> Self {
        match err {
            LLMError::Request(e) if e.is_decode() => Self::Unknown(describe(&e)),
            LLMError::Request(e) => Self::UpstreamConnectivity(describe(&e)),
            LLMError::Api { status, message } => Self::UpstreamApi { status, message },
            LLMError::Decode(message) => Self::Unknown(message),
            e @ LLMError::IdleTimeout(_) => Self::UpstreamConnectivity(e.to_string()),
        }
    }
}

/// reqwest's own message is terse ("error sending request"); include the
/// innermost cause so the browser sees e.g. "connection refused".
fn describe(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    let mut root = None;
    while let Some(cause) = source {
        root = Some(cause);
        source = cause.source();
    }
    if let Some(root) = root {
        message.push_str(": ");
        message.push_str(&root.to_string());
    }
    message
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_api_error_keeps_status_and_message() {
        let err: RelayError = LLMError::Api {
            status: 429,
            message: "rate limited".to_string(),
        }
        .into();
        assert_eq!(
            err,
            RelayError::UpstreamApi {
                status: 429,
                message: "rate limited".to_string()
            }
        );
        assert_eq!(err.to_string(), "api error (status 429): rate limited");
    }

    #[test]
    fn test_idle_timeout_is_connectivity() {
        let err: RelayError = LLMError::IdleTimeout(Duration::from_secs(30)).into();
        assert!(matches!(err, RelayError::UpstreamConnectivity(_)));
        assert!(err.to_string().starts_with("connection failed"));
    }

    #[test]
    fn test_decode_is_unknown() {
        let err: RelayError = LLMError::Decode("bad json".to_string()).into();
        assert_eq!(err, RelayError::Unknown("bad json".to_string()));
    }

    #[test]
    fn test_unsupported_model_conversion() {
        let err: RelayError = UnsupportedModel("gpt-x".to_string()).into();
        assert_eq!(err.to_string(), "unsupported model: gpt-x");
        assert!(err.is_local());
    }

    #[test]
    fn test_upstream_errors_are_not_local() {
        assert!(!RelayError::Unknown("x".into()).is_local());
        assert!(!RelayError::UpstreamConnectivity("x".into()).is_local());
        assert!(RelayError::InvalidArgument("x".into()).is_local());
    }
}
