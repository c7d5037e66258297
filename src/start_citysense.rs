//! Startup helpers for the CitySense server.
//!
//! Loads `.env`, installs logging, provisions the hosted collaborators and
//! serves until Ctrl-C.

use std::process::ExitCode;
use std::sync::Arc;

use crate::chat::AppConfig;
use crate::server::{self, AppState};

/// Run the server (used by the `citysense` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting CitySense v{}", env!("CARGO_PKG_VERSION"));
    match dotenv {
        Ok(path) => tracing::info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => tracing::debug!("No .env file found"),
        Err(e) => tracing::warn!("Ignoring unreadable .env file: {e}"),
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    let result = rt.block_on(async {
        let state = initialize().await?;
        server::run_server_with_shutdown(state, shutdown_signal()).await
    });

    if let Err(e) = result {
        tracing::error!("Server error: {e}");
        return ExitCode::from(1);
    }

    tracing::info!("CitySense stopped");
    ExitCode::SUCCESS
}

/// Load and validate configuration, then build the application state.
///
/// # Errors
/// Returns an error if configuration is invalid or state creation fails.
pub async fn initialize() -> Result<Arc<AppState>, Box<dyn std::error::Error + Send + Sync>> {
    let config = AppConfig::from_env();
    config.validate()?;

    let providers = config.available_providers();
    if providers.is_empty() {
        tracing::warn!("No LLM API key configured; every turn will report a missing key");
    } else {
        tracing::info!("Configured providers: {providers:?}");
    }

    AppState::new(config)
        .await
        .map_err(|e| format!("Failed to create state: {e}").into())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
