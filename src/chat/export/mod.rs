//! Conversation export.

pub mod formatter;

pub use formatter::{ConversationExport, ExportFormat, ExportedFile, export};
