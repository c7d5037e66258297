//! Chat assistant: settings, providers, retrieval, sessions and export.

pub mod core;
pub mod engine;
pub mod export;
pub mod llm;
pub mod retrieval;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use self::core::{
    AppConfig, ChatError, ChatResult, ConversationId, Message, ModelSettings, Provider,
    RawSettings, Role, SessionId, SettingsValidator, SystemPromptPreset,
};
pub use engine::{ChatEngine, ContextPolicy, TurnEvent, TurnOutcome};
pub use export::{ExportFormat, ExportedFile};
pub use llm::{ConnectionStatus, ProviderDispatcher, ProviderResult, StreamChunk, Usage};
pub use retrieval::{ContextChunk, ContextRetriever, IndexStats};
pub use session::{ChatStats, ConversationSession, SessionRegistry, SessionState, SharedSession};
