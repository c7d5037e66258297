//! Conversation exports as JSON, plain text or CSV.

use std::fmt::Write as _;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::message::Message;
use crate::chat::core::settings::ModelSettings;
use crate::chat::session::conversation::ConversationSession;

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
const RULE_WIDTH: usize = 50;

/// Supported export formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Structured JSON document.
    Json,
    /// Human-readable transcript.
    Txt,
    /// One row per message.
    Csv,
}

impl ExportFormat {
    /// All formats.
    pub const ALL: &'static [Self] = &[Self::Json, Self::Txt, Self::Csv];

    /// File extension.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Txt => "txt",
            Self::Csv => "csv",
        }
    }

    /// MIME type of the download.
    #[must_use]
    pub const fn mime(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Txt => "text/plain",
            Self::Csv => "text/csv",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "txt" => Ok(Self::Txt),
            "csv" => Ok(Self::Csv),
            _ => Err(ChatError::UnknownExportFormat(s.to_string())),
        }
    }
}

/// A rendered export ready for download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportedFile {
    /// Suggested file name.
    pub filename: String,
    /// MIME type.
    pub mime: &'static str,
    /// File body.
    pub content: Vec<u8>,
}

/// JSON export document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationExport {
    /// Conversation id.
    pub conversation_id: String,
    /// Export time (ISO-8601).
    pub timestamp: String,
    /// Settings at export time.
    pub model_settings: ModelSettings,
    /// Messages in order.
    pub messages: Vec<Message>,
}

/// Render `session` in `format`, stamped with `now`.
///
/// # Errors
/// Returns [`ChatError::EmptyExport`] when the session has no messages, or a
/// serialization error for JSON.
pub fn export(
    session: &ConversationSession,
    format: ExportFormat,
    now: DateTime<Local>,
) -> ChatResult<ExportedFile> {
    if session.messages().is_empty() {
        return Err(ChatError::EmptyExport);
    }

    let content = match format {
        ExportFormat::Json => render_json(session, now)?,
        ExportFormat::Txt => render_txt(session, now),
        ExportFormat::Csv => render_csv(session.messages(), now),
    };

    Ok(ExportedFile {
        filename: format!(
            "chat_export_{}.{}",
            now.format("%Y%m%d_%H%M%S"),
            format.extension()
        ),
        mime: format.mime(),
        content: content.into_bytes(),
    })
}

fn render_json(session: &ConversationSession, now: DateTime<Local>) -> ChatResult<String> {
    let document = ConversationExport {
        conversation_id: session.id().to_string(),
        timestamp: now.format(ISO_FORMAT).to_string(),
        model_settings: session.settings().clone(),
        messages: session.messages().to_vec(),
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

fn render_txt(session: &ConversationSession, now: DateTime<Local>) -> String {
    let settings = session.settings();
    let mut out = String::new();
    let _ = writeln!(out, "Chat Export - {}", now.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "Model: {} - {}", settings.provider, settings.model);
    out.push_str(&"=".repeat(RULE_WIDTH));
    out.push_str("\n\n");
    for message in session.messages() {
        let _ = write!(out, "{}: {}\n\n", message.role.label(), message.content);
    }
    out
}

fn render_csv(messages: &[Message], now: DateTime<Local>) -> String {
    let stamp = now.format(ISO_FORMAT).to_string();
    let mut out = String::from("Timestamp,Role,Content\r\n");
    for message in messages {
        let _ = write!(
            out,
            "{},{},{}\r\n",
            csv_field(&stamp),
            csv_field(message.role.as_str()),
            csv_field(&message.content)
        );
    }
    out
}

/// Quote a CSV field when it holds a delimiter, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn fixed_now() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .single()
            .unwrap_or_else(Local::now)
    }

    fn session_with_turn() -> ConversationSession {
        let mut session = ConversationSession::new(ModelSettings::default());
        assert!(session.append_user("Where can I park, downtown?").is_ok());
        assert!(session.append_assistant("Lot \"B\" on Main St.").is_ok());
        session
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<ExportFormat>().ok(), Some(ExportFormat::Json));
        assert_eq!(" csv ".parse::<ExportFormat>().ok(), Some(ExportFormat::Csv));
        assert!(matches!(
            "pdf".parse::<ExportFormat>(),
            Err(ChatError::UnknownExportFormat(_))
        ));
    }

    #[test]
    fn test_empty_session_has_no_export() {
        let session = ConversationSession::new(ModelSettings::default());
        let result = export(&session, ExportFormat::Txt, fixed_now());
        assert!(matches!(result, Err(ChatError::EmptyExport)));
    }

    #[test]
    fn test_json_export_parses_back() {
        let session = session_with_turn();
        let file = export(&session, ExportFormat::Json, fixed_now()).ok();
        let file = file.unwrap_or_else(|| ExportedFile {
            filename: String::new(),
            mime: "",
            content: Vec::new(),
        });
        assert_eq!(file.filename, "chat_export_20240309_140507.json");
        assert_eq!(file.mime, "application/json");

        let parsed: Option<ConversationExport> = serde_json::from_slice(&file.content).ok();
        let parsed = parsed.map(|doc| (doc.conversation_id, doc.messages));
        assert_eq!(
            parsed,
            Some((session.id().to_string(), session.messages().to_vec()))
        );
    }

    #[test]
    fn test_txt_layout() {
        let session = session_with_turn();
        let content = export(&session, ExportFormat::Txt, fixed_now())
            .map(|f| String::from_utf8_lossy(&f.content).into_owned())
            .unwrap_or_default();
        let expected = format!(
            "Chat Export - 2024-03-09 14:05:07\nModel: openai - gpt-3.5-turbo\n{}\n\n\
             User: Where can I park, downtown?\n\nAssistant: Lot \"B\" on Main St.\n\n",
            "=".repeat(50)
        );
        assert_eq!(content, expected);
    }

    #[test]
    fn test_csv_quotes_fields() {
        let session = session_with_turn();
        let content = export(&session, ExportFormat::Csv, fixed_now())
            .map(|f| String::from_utf8_lossy(&f.content).into_owned())
            .unwrap_or_default();
        let lines: Vec<&str> = content.split("\r\n").collect();
        assert_eq!(lines[0], "Timestamp,Role,Content");
        assert_eq!(
            lines[1],
            "2024-03-09T14:05:07.000000,user,\"Where can I park, downtown?\""
        );
        assert_eq!(
            lines[2],
            "2024-03-09T14:05:07.000000,assistant,\"Lot \"\"B\"\" on Main St.\""
        );
    }

    #[test]
    fn test_csv_field_plain_and_multiline() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("two\nlines"), "\"two\nlines\"");
    }
}
