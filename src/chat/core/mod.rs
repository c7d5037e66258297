//! Core chat types: configuration, errors, identifiers, messages, catalogs and settings.

pub mod catalog;
pub mod config;
pub mod errors;
pub mod http;
pub mod ids;
pub mod message;
pub mod settings;

pub use catalog::{
    GEMINI_MODELS, OPENAI_MODELS, Provider, ProviderParseError, SystemPromptPreset,
};
pub use config::{
    ApiKeys, AppConfig, EndpointConfig, HttpConfig, ServerConfig, VectorConfig,
};
pub use errors::{ChatError, ChatResult};
pub use ids::{ConversationId, SessionId};
pub use message::{Message, Role};
pub use settings::{ModelSettings, RawSettings, SettingsValidator};
