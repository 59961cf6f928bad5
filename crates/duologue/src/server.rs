use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::timeout::TimeoutLayer;
use tracing::info;

use crate::config::{ChatConfig, Config, ConfigError};
use crate::handlers;
use crate::llm::{ClientFactory, CredentialSource, EnvCredentials, ProviderRegistry};
use crate::prompt::PromptComposer;

/// Shared application state.
///
/// Everything here is immutable after startup; requests share nothing else.
#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatConfig>,
    pub composer: Arc<PromptComposer>,
    pub factory: ClientFactory,
    pub keep_alive_interval_seconds: u64,
}

impl AppState {
    pub fn new(
        config: &Config,
        registry: ProviderRegistry,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            chat: Arc::new(config.chat.clone()),
            composer: Arc::new(PromptComposer::new(
                config.prompt_template.clone(),
                config.personas.clone(),
            )),
            factory: ClientFactory::new(Arc::new(registry), credentials),
            keep_alive_interval_seconds: config.server.keep_alive_interval_seconds,
        }
    }

    /// Validate `config` and read credentials from the process environment.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let registry = config.validate()?;
        Ok(Self::new(config, registry, Arc::new(EnvCredentials)))
    }
}

pub fn build_app(state: AppState, request_timeout_secs: u64) -> Router {
    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .route("/get_config", get(handlers::get_config))
        .route("/chat", post(handlers::chat))
        .with_state(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_secs),
        ))
}

/// Bind and serve until ctrl-c.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let state = AppState::from_config(&config)?;
    let models: Vec<_> = state.factory.registry().identifiers().map(String::from).collect();
    info!(?models, default_model = %config.chat.default_model, "Model registry loaded");

    let app = build_app(state, config.server.request_timeout_seconds);

    let bind = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %listener.local_addr()?, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
        })
        .await?;

    Ok(())
}
