//! Hosted LLM backends and the dispatcher in front of them.

pub mod context;
pub mod dispatcher;
pub mod gemini;
pub mod openai;
pub mod provider;
pub mod stream;

pub use context::{assemble_prompt, render_context};
pub use dispatcher::{ConnectionStatus, ProviderDispatcher};
pub use gemini::{GeminiProvider, GeminiTurns};
pub use openai::OpenAiProvider;
pub use provider::{
    Completion, EmbeddingPurpose, LlmProvider, ProviderFuture, ProviderResult, Usage, build_provider,
};
pub use stream::{StreamChunk, TextStream};
