//! Routes generation requests to the configured provider backend.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::chat::core::catalog::Provider;
use crate::chat::core::config::AppConfig;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::message::Message;
use crate::chat::core::settings::ModelSettings;
use crate::chat::llm::context::assemble_prompt;
use crate::chat::llm::provider::{LlmProvider, ProviderResult, build_provider, failure_message};
use crate::chat::llm::stream::{TextStream, error_stream};
use crate::chat::retrieval::ContextChunk;

/// Token budget of the connection test.
const CONNECTION_TEST_MAX_TOKENS: u32 = 5;

/// Result of a provider connection test.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    /// Whether the provider answered.
    pub ok: bool,
    /// Human-readable outcome.
    pub message: String,
}

/// Provider backends keyed by provider. Backends are present only for
/// providers with a configured API key.
#[derive(Clone, Default)]
pub struct ProviderDispatcher {
    backends: HashMap<Provider, Arc<dyn LlmProvider>>,
}

impl ProviderDispatcher {
    /// Dispatcher without any backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a backend.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn LlmProvider>) -> Self {
        self.backends.insert(backend.provider(), backend);
        self
    }

    /// Build one backend per provider whose API key is configured.
    #[must_use]
    pub fn from_config(config: &AppConfig, client: &reqwest::Client) -> Self {
        Provider::ALL
            .iter()
            .filter_map(|provider| {
                config
                    .api_keys
                    .for_provider(*provider)
                    .map(|key| build_provider(*provider, client.clone(), key, &config.endpoints))
            })
            .fold(Self::new(), Self::with_backend)
    }

    /// Backend for `provider`.
    ///
    /// # Errors
    /// Returns [`ChatError::Configuration`] if the provider has no API key.
    pub fn backend(&self, provider: Provider) -> ChatResult<Arc<dyn LlmProvider>> {
        self.backends.get(&provider).cloned().ok_or_else(|| {
            ChatError::Configuration(format!("{} is not set", provider.api_key_env()))
        })
    }

    /// Providers with a configured backend, in catalog order.
    #[must_use]
    pub fn available_providers(&self) -> Vec<Provider> {
        Provider::ALL
            .iter()
            .copied()
            .filter(|provider| self.backends.contains_key(provider))
            .collect()
    }

    /// Generate a reply. Never fails: problems come back as
    /// [`ProviderResult::Failure`].
    pub async fn generate(
        &self,
        history: &[Message],
        context: &[ContextChunk],
        settings: &ModelSettings,
    ) -> ProviderResult {
        let backend = match self.backend(settings.provider) {
            Ok(backend) => backend,
            Err(err) => return ProviderResult::failure(settings.provider, &err),
        };

        let prompt = assemble_prompt(history, context, settings);
        tracing::debug!(
            provider = settings.provider.as_str(),
            model = %settings.model,
            messages = prompt.len(),
            "dispatching completion"
        );

        match backend.complete(&prompt, settings).await {
            Ok(completion) => completion.into(),
            Err(err) => {
                tracing::warn!("{} completion failed: {err}", settings.provider.display_name());
                ProviderResult::failure(settings.provider, &err)
            }
        }
    }

    /// Stream a reply. Problems come back as a single error fragment.
    #[must_use]
    pub fn stream(
        &self,
        history: &[Message],
        context: &[ContextChunk],
        settings: &ModelSettings,
    ) -> TextStream {
        match self.backend(settings.provider) {
            Ok(backend) => {
                let prompt = assemble_prompt(history, context, settings);
                backend.stream(prompt, settings.clone())
            }
            Err(err) => error_stream(failure_message(settings.provider, &err)),
        }
    }

    /// Send a tiny `Hello` prompt to `provider`.
    pub async fn test_connection(&self, provider: Provider) -> ConnectionStatus {
        let Ok(backend) = self.backend(provider) else {
            return ConnectionStatus {
                ok: false,
                message: format!("{} API key not configured", provider.display_name()),
            };
        };

        let settings = ModelSettings {
            provider,
            model: provider.connection_test_model().to_string(),
            max_tokens: CONNECTION_TEST_MAX_TOKENS,
            ..ModelSettings::default()
        };
        let hello = [Message::user("Hello")];

        match backend.complete(&hello, &settings).await {
            Ok(_) => ConnectionStatus {
                ok: true,
                message: format!("{} API connected successfully", provider.display_name()),
            },
            Err(err) => {
                tracing::info!("{} connection test failed: {err}", provider.display_name());
                ConnectionStatus {
                    ok: false,
                    message: format!("Connection test failed: {err}"),
                }
            }
        }
    }
}
