use std::collections::BTreeMap;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub default_model: String,
    pub available_models: Vec<String>,
    pub chat_config: ChatSettings,
    pub role_models: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct ChatSettings {
    pub history_length: usize,
    pub temperature: f32,
    pub default_rounds: u32,
    pub max_tokens: u32,
}

/// GET /get_config
///
/// Client-facing defaults. Never includes credentials or base URLs.
pub async fn get_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    let chat = &state.chat;
    Json(ConfigResponse {
        default_model: chat.default_model.clone(),
        available_models: state
            .factory
            .registry()
            .identifiers()
            .map(String::from)
            .collect(),
        chat_config: ChatSettings {
            history_length: chat.history_length,
            temperature: chat.temperature,
            default_rounds: chat.default_rounds,
            max_tokens: chat.max_tokens,
        },
        role_models: chat.role_models.clone(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::llm::ProviderRegistry;
    use crate::server::{AppState, build_app};

    #[tokio::test]
    async fn test_get_config_returns_defaults() {
        let state = AppState::new(
            &Config::default(),
            ProviderRegistry::builtin(),
            Arc::new(HashMap::<String, String>::new()),
        );
        let app = build_app(state, 30);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/get_config")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(json["default_model"], "grok-2-latest");
        assert_eq!(
            json["available_models"],
            serde_json::json!(["deepseek-chat", "deepseek-reasoner", "grok-2-latest"])
        );
        assert_eq!(json["chat_config"]["history_length"], 50);
        assert_eq!(json["chat_config"]["default_rounds"], 2);
        assert_eq!(json["chat_config"]["max_tokens"], 2000);
        assert_eq!(json["role_models"]["ai_left"], "grok-2-latest");
        assert_eq!(json["role_models"]["ai_right"], "grok-2-latest");
        assert!(!bytes.windows(8).any(|w| w == b"base_url"));
    }
}
