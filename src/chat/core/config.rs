//! Application configuration.
//!
//! Values come from environment variables (optionally seeded from a `.env`
//! file by the binary). Missing API keys are not errors: they only disable
//! the provider or the vector store that needs them.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::chat::core::catalog::Provider;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::settings::{ModelSettings, SettingsValidator};

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 3000;

/// Top-level configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Title shown by the UI.
    pub app_title: String,
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Credentials of the hosted services.
    #[serde(skip_serializing)]
    pub api_keys: ApiKeys,
    /// Base URLs of the hosted services.
    pub endpoints: EndpointConfig,
    /// Outbound HTTP client settings.
    pub http: HttpConfig,
    /// Vector store and retrieval settings.
    pub vector: VectorConfig,
    /// Settings given to new sessions.
    pub defaults: ModelSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_title: "CitySense".to_string(),
            server: ServerConfig::default(),
            api_keys: ApiKeys::default(),
            endpoints: EndpointConfig::default(),
            http: HttpConfig::default(),
            vector: VectorConfig::default(),
            defaults: ModelSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Empty values count as unset. Unparsable numbers keep their defaults.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut config = Self::default();

        if let Some(title) = get("APP_TITLE") {
            config.app_title = title;
        }

        if let Some(port) = get("CITYSENSE_PORT").and_then(|p| p.parse().ok()) {
            config.server.port = port;
        }
        if let Some(dir) = get("CITYSENSE_STATIC_DIR") {
            config.server.static_dir = PathBuf::from(dir);
        }

        config.api_keys = ApiKeys {
            openai: get(Provider::OpenAi.api_key_env()),
            gemini: get(Provider::Gemini.api_key_env()),
            pinecone: get("PINECONE_API_KEY"),
        };

        if let Some(url) = get("OPENAI_BASE_URL") {
            config.endpoints.openai_base_url = url;
        }
        if let Some(url) = get("GEMINI_BASE_URL") {
            config.endpoints.gemini_base_url = url;
        }
        if let Some(url) = get("PINECONE_CONTROLLER_URL") {
            config.endpoints.pinecone_controller_url = url;
        }

        if let Some(name) = get("PINECONE_INDEX_NAME") {
            config.vector.index_name = name;
        }
        if let Some(provider) = get("EMBEDDING_PROVIDER").and_then(|p| p.parse().ok()) {
            config.vector.embedding_provider = provider;
        }

        let mut defaults = ModelSettings::default();
        if let Some(model) = get("DEFAULT_MODEL") {
            defaults.model = model;
        }
        if let Some(max_tokens) = get("MAX_TOKENS").and_then(|v| v.parse().ok()) {
            defaults.max_tokens = max_tokens;
        }
        if let Some(temperature) = get("TEMPERATURE").and_then(|v| v.parse().ok()) {
            defaults.temperature = temperature;
        }
        config.defaults = SettingsValidator::new(defaults).baseline().clone();

        config
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if a base URL does not parse or a retrieval bound is zero.
    pub fn validate(&self) -> ChatResult<()> {
        Url::parse(&self.endpoints.openai_base_url)?;
        Url::parse(&self.endpoints.gemini_base_url)?;
        Url::parse(&self.endpoints.pinecone_controller_url)?;

        if self.vector.dimension == 0 {
            return Err(ChatError::Configuration(
                "vector.dimension must be > 0".to_string(),
            ));
        }
        if self.vector.top_k == 0 || self.vector.max_context_chunks == 0 {
            return Err(ChatError::Configuration(
                "vector.top_k and vector.max_context_chunks must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.vector.similarity_threshold) {
            return Err(ChatError::Configuration(
                "vector.similarity_threshold must lie in [0, 1]".to_string(),
            ));
        }
        Ok(())
    }

    /// Providers whose API key is configured, baseline first.
    #[must_use]
    pub fn available_providers(&self) -> Vec<Provider> {
        Provider::ALL
            .iter()
            .copied()
            .filter(|provider| self.api_keys.for_provider(*provider).is_some())
            .collect()
    }
}

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listening port.
    pub port: u16,
    /// Directory served as the browser UI.
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            static_dir: PathBuf::from("static"),
        }
    }
}

/// Credentials of the hosted services.
#[derive(Clone, Default, Deserialize)]
pub struct ApiKeys {
    /// OpenAI API key.
    pub openai: Option<String>,
    /// Gemini API key.
    pub gemini: Option<String>,
    /// Pinecone API key.
    pub pinecone: Option<String>,
}

impl ApiKeys {
    /// Key of an LLM provider, if configured.
    #[must_use]
    pub fn for_provider(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::OpenAi => self.openai.as_deref(),
            Provider::Gemini => self.gemini.as_deref(),
        }
    }
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |key: &Option<String>| if key.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("ApiKeys")
            .field("openai", &mask(&self.openai))
            .field("gemini", &mask(&self.gemini))
            .field("pinecone", &mask(&self.pinecone))
            .finish()
    }
}

/// Base URLs of the hosted services.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// OpenAI-style API root (without trailing slash).
    pub openai_base_url: String,
    /// Gemini-style API root (without trailing slash).
    pub gemini_base_url: String,
    /// Pinecone control-plane root.
    pub pinecone_controller_url: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            openai_base_url: "https://api.openai.com/v1".to_string(),
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            pinecone_controller_url: "https://api.pinecone.io".to_string(),
        }
    }
}

/// Outbound HTTP client settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Whole-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl HttpConfig {
    /// Whole-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 120,
            connect_timeout_secs: 10,
        }
    }
}

/// Vector store and retrieval settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VectorConfig {
    /// Pinecone index name.
    pub index_name: String,
    /// Embedding dimensionality the index is created with.
    pub dimension: usize,
    /// Serverless cloud used when creating the index.
    pub cloud: String,
    /// Serverless region used when creating the index.
    pub region: String,
    /// Provider whose embedding endpoint is used.
    pub embedding_provider: Provider,
    /// Default number of neighbours returned by a search.
    pub top_k: usize,
    /// Chunks spliced into a prompt at most.
    pub max_context_chunks: usize,
    /// Chunks scoring below this are not spliced into prompts.
    pub similarity_threshold: f32,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            index_name: "citysense-conversations".to_string(),
            dimension: 1536,
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
            embedding_provider: Provider::OpenAi,
            top_k: 5,
            max_context_chunks: 3,
            similarity_threshold: 0.7,
        }
    }
}
