//! Capability interface implemented by every hosted LLM backend.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chat::core::catalog::Provider;
use crate::chat::core::config::EndpointConfig;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::message::Message;
use crate::chat::core::settings::ModelSettings;
use crate::chat::llm::gemini::GeminiProvider;
use crate::chat::llm::openai::OpenAiProvider;
use crate::chat::llm::stream::TextStream;

/// Boxed future returned by provider calls.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Token accounting reported by the upstream; zero when omitted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt.
    pub prompt_tokens: u32,
    /// Tokens in the completion.
    pub completion_tokens: u32,
    /// Prompt plus completion.
    pub total_tokens: u32,
}

/// A finished, non-streamed completion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Completion {
    /// Generated text.
    pub content: String,
    /// Token usage.
    pub usage: Usage,
}

/// What an embedding is used for. Some upstreams embed stored documents and
/// search queries differently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingPurpose {
    /// A stored exchange.
    Document,
    /// A similarity search query.
    Query,
}

/// Outcome of a dispatched generation. Failures are values, never errors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProviderResult {
    /// The provider answered.
    Success {
        /// Generated text (may be empty).
        content: String,
        /// Token usage.
        usage: Usage,
    },
    /// The provider was missing or the call failed.
    Failure {
        /// Human-readable reason naming the provider.
        message: String,
    },
}

impl ProviderResult {
    /// Failure for `provider` built from `err`.
    #[must_use]
    pub fn failure(provider: Provider, err: &ChatError) -> Self {
        Self::Failure {
            message: failure_message(provider, err),
        }
    }

    /// Whether the provider answered.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl From<Completion> for ProviderResult {
    fn from(completion: Completion) -> Self {
        Self::Success {
            content: completion.content,
            usage: completion.usage,
        }
    }
}

/// User-facing failure text for a provider error.
#[must_use]
pub fn failure_message(provider: Provider, err: &ChatError) -> String {
    if err.is_configuration() {
        format!("{} API key not configured", provider.display_name())
    } else {
        format!("{} API error: {err}", provider.display_name())
    }
}

/// A hosted chat and embedding backend.
pub trait LlmProvider: Send + Sync {
    /// Which provider this backend talks to.
    fn provider(&self) -> Provider;

    /// Generate a complete reply for an already assembled prompt.
    fn complete<'a>(
        &'a self,
        messages: &'a [Message],
        settings: &'a ModelSettings,
    ) -> ProviderFuture<'a, ChatResult<Completion>>;

    /// Stream a reply. The returned stream is lazy and owns its inputs.
    fn stream(&self, messages: Vec<Message>, settings: ModelSettings) -> TextStream;

    /// Embed `text` for similarity search.
    fn embed<'a>(
        &'a self,
        text: &'a str,
        purpose: EmbeddingPurpose,
    ) -> ProviderFuture<'a, ChatResult<Vec<f32>>>;
}

/// Build the backend for `provider`.
#[must_use]
pub fn build_provider(
    provider: Provider,
    client: reqwest::Client,
    api_key: &str,
    endpoints: &EndpointConfig,
) -> Arc<dyn LlmProvider> {
    match provider {
        Provider::OpenAi => Arc::new(OpenAiProvider::new(
            client,
            api_key,
            endpoints.openai_base_url.as_str(),
        )),
        Provider::Gemini => Arc::new(GeminiProvider::new(
            client,
            api_key,
            endpoints.gemini_base_url.as_str(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_messages_name_the_provider() {
        let missing = ChatError::Configuration("no key".to_string());
        assert_eq!(
            failure_message(Provider::Gemini, &missing),
            "Gemini API key not configured"
        );

        let api = ChatError::api("OpenAI", 401, r#"{"error":{"message":"bad key"}}"#);
        let message = failure_message(Provider::OpenAi, &api);
        assert!(message.starts_with("OpenAI API error: "));
        assert!(message.contains("bad key"));
    }

    #[test]
    fn test_completion_into_result() {
        let result = ProviderResult::from(Completion {
            content: "hi".to_string(),
            usage: Usage::default(),
        });
        assert!(result.is_success());
        assert!(!ProviderResult::failure(Provider::OpenAi, &ChatError::StaleTurn).is_success());
    }

    #[test]
    fn test_factory_is_keyed_on_provider() {
        let client = reqwest::Client::new();
        let endpoints = EndpointConfig::default();
        for provider in Provider::ALL {
            let built = build_provider(*provider, client.clone(), "key", &endpoints);
            assert_eq!(built.provider(), *provider);
        }
    }
}
