//! Error types for the chat subsystem.

use thiserror::Error;

use crate::chat::core::ids::SessionId;

/// Chat subsystem error type.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Missing credentials or unusable configuration values.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Network-level failure talking to a hosted service.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The hosted service answered with a non-success status.
    #[error("{service} returned status {status}: {message}")]
    Api {
        /// Human-readable service name.
        service: &'static str,
        /// HTTP status code.
        status: u16,
        /// Error message extracted from the response body.
        message: String,
    },
    /// The hosted service answered with a body we could not use.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    /// Export attempted on a session without messages.
    #[error("No messages to export")]
    EmptyExport,
    /// Export format name not recognised.
    #[error("unknown export format: {0}")]
    UnknownExportFormat(String),
    /// A user message is still waiting for its reply.
    #[error("a response is still being generated for the previous message")]
    TurnInProgress,
    /// An assistant message was appended without a pending user message.
    #[error("no user message is waiting for a reply")]
    NoPendingTurn,
    /// The conversation was reset while the turn was outstanding.
    #[error("conversation was reset while the reply was being generated")]
    StaleTurn,
    /// Unknown session handle.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),
    /// The vector store is not configured or could not be provisioned.
    #[error("vector store unavailable")]
    VectorStoreUnavailable,
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The background task running a turn panicked or was cancelled.
    #[error("turn task failed: {0}")]
    TurnTask(#[from] tokio::task::JoinError),
}

impl ChatError {
    /// Build an API error from a status code and a raw response body.
    ///
    /// Both hosted LLM APIs and Pinecone wrap failures as
    /// `{"error": {"message": ...}}` or `{"message": ...}`; anything else is
    /// passed through truncated.
    #[must_use]
    pub fn api(service: &'static str, status: u16, body: &str) -> Self {
        Self::Api {
            service,
            status,
            message: extract_error_message(body),
        }
    }

    /// Check if this error comes from missing configuration.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::VectorStoreUnavailable)
    }
}

/// Maximum characters of a raw error body kept in messages.
const MAX_ERROR_BODY_CHARS: usize = 300;

fn extract_error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let message = parsed.as_ref().and_then(|value| {
        value
            .pointer("/error/message")
            .or_else(|| value.get("message"))
            .or_else(|| value.get("error").filter(|e| e.is_string()))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    });

    message.unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            "empty response body".to_string()
        } else {
            trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect()
        }
    })
}

/// Convenience result alias for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;
