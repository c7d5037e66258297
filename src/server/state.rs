//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::chat::{AppConfig, ChatEngine, ChatResult, SessionRegistry};

/// Shared application state.
pub struct AppState {
    /// Loaded configuration.
    pub config: AppConfig,
    /// Turn handler with its provider backends and retriever.
    pub engine: Arc<ChatEngine>,
    /// Live sessions.
    pub sessions: SessionRegistry,
}

impl AppState {
    /// Create the state, provisioning hosted collaborators from `config`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub async fn new(config: AppConfig) -> ChatResult<Arc<Self>> {
        let engine = ChatEngine::from_config(&config).await?;
        Ok(Self::from_parts(config, engine))
    }

    /// Assemble state from an already built engine.
    #[must_use]
    pub fn from_parts(config: AppConfig, engine: ChatEngine) -> Arc<Self> {
        let sessions = SessionRegistry::new(config.defaults.clone());
        Arc::new(Self {
            config,
            engine: Arc::new(engine),
            sessions,
        })
    }
}
