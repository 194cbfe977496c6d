//! Stream Conductor Daemon
//!
//! HTTP server that streams model responses, transparently continuing them
//! when a call runs out of output tokens.
//!
//! # Usage
//!
//! ```bash
//! # Start with the config file at ~/.config/stream-conductor/conductor.toml
//! stream-conductor
//!
//! # Override the model and continuation budget
//! stream-conductor --model qwen2.5-coder --max-continuations 4
//!
//! # With verbose logging
//! RUST_LOG=debug stream-conductor
//! ```
//!
//! # Environment Variables
//!
//! - `OLLAMA_HOST` / `OLLAMA_PORT`: Ollama server address
//! - `CONDUCTOR_MODEL`: Model name
//! - `CONDUCTOR_MAX_TOKENS`: Output token budget per model call
//! - `CONDUCTOR_MAX_CONTINUATIONS`: Continuation calls allowed after the first
//! - `CONDUCTOR_BIND`: Listen address
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)
//!
//! # Signals
//!
//! - SIGINT (Ctrl-C): Graceful shutdown

mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use stream_conductor::{
    default_config_path, load_config_from_path, ConfigOverrides, ContinuationOrchestrator,
    ContinuationSettings, LlmBackend, OllamaBackend,
};

/// Command-line arguments
#[derive(Debug, Parser)]
#[command(name = "stream-conductor", version, about)]
struct Args {
    /// Configuration file (defaults to the XDG config location)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:5173
    #[arg(long)]
    bind: Option<String>,

    /// Model to request from the backend
    #[arg(long)]
    model: Option<String>,

    /// Output token budget per model call
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Continuation calls allowed after the first
    #[arg(long)]
    max_continuations: Option<u32>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            bind: self.bind.clone(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            max_continuations: self.max_continuations,
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        return;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stream_conductor_daemon=info".parse()?)
                .add_directive("stream_conductor=info".parse()?),
        )
        .with_target(true)
        .init();

    let args = Args::parse();
    info!("Starting Stream Conductor");

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(config_path).context("Failed to load configuration")?;
    args.overrides()
        .apply(&mut config)
        .context("Invalid command-line override")?;

    info!(
        source = %config.source(),
        model = %config.backend.model,
        max_tokens = config.generation.max_tokens,
        max_continuations = config.generation.max_continuations,
        "Configuration loaded"
    );

    let backend = OllamaBackend::from_config(&config).context("Failed to create Ollama client")?;
    if !backend.health_check().await {
        warn!(
            host = %config.backend.host,
            port = config.backend.port,
            "Ollama is not reachable yet; requests will fail until it is"
        );
    }

    let orchestrator = ContinuationOrchestrator::new(
        Arc::new(backend),
        ContinuationSettings::from_config(&config),
    );

    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    server::serve(listener, server::DaemonState::new(orchestrator), shutdown_signal()).await?;

    info!("Stream Conductor stopped");
    Ok(())
}
