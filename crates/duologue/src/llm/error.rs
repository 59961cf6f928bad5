//! LLM error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when talking to an upstream chat completions API.
#[derive(Debug, Error)]
pub enum LLMError {
    /// HTTP request failed (connect, TLS, read or client timeout)
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// API returned an error response
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Upstream sent something that is not a valid completion payload
    #[error("invalid upstream payload: {0}")]
    Decode(String),

    /// No stream item arrived within the idle window
    #[error("upstream stream idle for {0:?}")]
    IdleTimeout(Duration),
}

/// Turn a non-success response into `LLMError::Api`.
///
/// OpenAI-compatible backends wrap failures as `{"error": {"message": ..}}`;
/// when the body has that shape only the message is kept, otherwise the raw
/// body is returned.
pub async fn api_error(response: reqwest::Response) -> LLMError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    LLMError::Api {
        status,
        message: extract_error_message(&body),
    }
}

fn extract_error_message(body: &str) -> String {
    #[derive(serde::Deserialize)]
    struct Envelope {
        error: Detail,
    }
    #[derive(serde::Deserialize)]
    struct Detail {
        message: String,
    }

    match serde_json::from_str::<Envelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_error_message_from_envelope() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#;
        assert_eq!(extract_error_message(body), "Incorrect API key provided");
    }

    #[test]
    fn test_extract_error_message_falls_back_to_body() {
        assert_eq!(extract_error_message("  Bad Gateway\n"), "Bad Gateway");
    }

    #[test]
    fn test_api_error_display() {
        let err = LLMError::Api {
            status: 401,
            message: "unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "api error (status 401): unauthorized");
    }
}
