//! Duologue binary entry point.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use duologue::config::Config;
use duologue::llm::{CredentialSource, EnvCredentials};
use duologue::server;

/// Streaming relay for two-sided AI conversations.
#[derive(Parser, Debug)]
#[command(name = "duologue", version, about)]
struct Cli {
    /// Path to the YAML config file. A missing file means defaults.
    #[arg(long, global = true, default_value = "duologue.yaml")]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server.
    Serve {
        /// Override `server.host`.
        #[arg(long)]
        host: Option<String>,
        /// Override `server.port`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// List configured models and whether their API keys are set.
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Variables from .env never override the real environment.
    let dotenv = dotenvy::dotenv();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Ok(path) = dotenv {
        tracing::debug!(path = %path.display(), "Loaded .env");
    }

    let mut config = Config::load(&cli.config).await?;
    tracing::debug!(path = %cli.config.display(), "Loaded configuration");

    match cli.command {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            server::run(config).await
        }
        Command::Models => {
            let registry = config.validate()?;
            for id in registry.identifiers() {
                let profile = registry.lookup(id)?;
                let key = if EnvCredentials.get(&profile.api_key_env).is_some() {
                    "set"
                } else {
                    "missing"
                };
                println!(
                    "{id}\t{}\t{} ({key})",
                    profile.base_url, profile.api_key_env
                );
            }
            Ok(())
        }
    }
}
