//! Conversation sessions and the registry holding them.

pub mod conversation;
pub mod registry;

pub use conversation::{ChatStats, ConversationSession, SessionState};
pub use registry::{SessionRegistry, SharedSession};
