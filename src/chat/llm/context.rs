//! Prompt assembly: system prompt plus retrieved context plus live history.

use std::fmt::Write as _;

use crate::chat::core::message::{Message, Role};
use crate::chat::core::settings::ModelSettings;
use crate::chat::retrieval::ContextChunk;

/// Build the message list sent to a provider.
///
/// The caller's history is never modified. When it carries no system message
/// the settings' system prompt leads. Context, when enabled and non-empty,
/// becomes one extra system message placed after the leading system
/// message(s).
#[must_use]
pub fn assemble_prompt(
    history: &[Message],
    context: &[ContextChunk],
    settings: &ModelSettings,
) -> Vec<Message> {
    let mut prompt = Vec::with_capacity(history.len() + 2);
    if !history.iter().any(|m| m.role == Role::System) {
        prompt.push(Message::system(settings.system_prompt.clone()));
    }
    prompt.extend(history.iter().cloned());

    if settings.use_context && !context.is_empty() {
        let insert_at = prompt
            .iter()
            .position(|m| m.role != Role::System)
            .unwrap_or(prompt.len());
        prompt.insert(insert_at, Message::system(render_context(context)));
    }

    prompt
}

/// Render retrieved chunks as one system message body, best match first.
#[must_use]
pub fn render_context(context: &[ContextChunk]) -> String {
    let mut out = String::from(
        "[RELEVANT_CONTEXT]\nExcerpts from earlier conversations. Use them only if they help answer.\n",
    );
    for chunk in context {
        let _ = writeln!(out, "* (similarity {:.2}) {}", chunk.similarity_score, chunk.text.trim());
    }
    out.truncate(out.trim_end().len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str, score: f32) -> ContextChunk {
        ContextChunk {
            id: "c_0".to_string(),
            text: text.to_string(),
            similarity_score: score,
            source_conversation_id: "c".to_string(),
            timestamp: String::new(),
        }
    }

    #[test]
    fn test_prepends_settings_prompt_when_history_has_none() {
        let settings = ModelSettings::default();
        let history = vec![Message::user("Hi")];
        let prompt = assemble_prompt(&history, &[], &settings);
        assert_eq!(prompt.len(), 2);
        assert_eq!(prompt[0], Message::system(settings.system_prompt.clone()));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_existing_system_message_is_kept() {
        let settings = ModelSettings::default();
        let history = vec![Message::system("Custom"), Message::user("Hi")];
        let prompt = assemble_prompt(&history, &[], &settings);
        assert_eq!(prompt, history);
    }

    #[test]
    fn test_context_goes_after_leading_system_messages() {
        let settings = ModelSettings::default();
        let history = vec![Message::user("Where is the library?")];
        let context = vec![chunk("User: library hours?\nAssistant: 9 to 5", 0.91)];
        let prompt = assemble_prompt(&history, &context, &settings);
        assert_eq!(prompt.len(), 3);
        assert_eq!(prompt[0].role, Role::System);
        assert_eq!(prompt[1].role, Role::System);
        assert!(prompt[1].content.contains("(similarity 0.91)"));
        assert_eq!(prompt[2], history[0]);
    }

    #[test]
    fn test_context_ignored_when_disabled() {
        let settings = ModelSettings {
            use_context: false,
            ..ModelSettings::default()
        };
        let prompt = assemble_prompt(&[Message::user("Hi")], &[chunk("x", 0.9)], &settings);
        assert_eq!(prompt.len(), 2);
    }
}
