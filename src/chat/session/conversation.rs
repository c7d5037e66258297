//! One conversation: its messages, settings and turn bookkeeping.

use serde::{Deserialize, Serialize};

use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::ConversationId;
use crate::chat::core::message::{Message, Role};
use crate::chat::core::settings::ModelSettings;

/// Lifecycle state of a conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No messages.
    Empty,
    /// At least one message.
    Active,
}

/// Message counts of a conversation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatStats {
    /// All messages.
    pub total_messages: usize,
    /// User messages.
    pub user_messages: usize,
    /// Assistant messages (replies and error notices).
    pub assistant_messages: usize,
    /// Characters across all messages.
    pub total_characters: usize,
}

/// A conversation owned by one browser session.
///
/// Turns alternate strictly: a user message, then at most one assistant
/// message. A trailing user message marks the turn as pending.
#[derive(Clone, Debug)]
pub struct ConversationSession {
    id: ConversationId,
    messages: Vec<Message>,
    settings: ModelSettings,
    epoch: u64,
    turn_counter: u64,
}

impl ConversationSession {
    /// Empty conversation with a fresh id.
    #[must_use]
    pub fn new(settings: ModelSettings) -> Self {
        Self {
            id: ConversationId::new(),
            messages: Vec::new(),
            settings,
            epoch: 0,
            turn_counter: 0,
        }
    }

    /// Conversation id.
    #[must_use]
    pub const fn id(&self) -> ConversationId {
        self.id
    }

    /// Messages in conversation order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Current settings.
    #[must_use]
    pub const fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    /// Replace the settings (already validated by the caller).
    pub fn set_settings(&mut self, settings: ModelSettings) {
        self.settings = settings;
    }

    /// Bumped by every reset.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Completed turns since the conversation id was issued.
    #[must_use]
    pub const fn turn_counter(&self) -> u64 {
        self.turn_counter
    }

    /// Whether a user message is waiting for its reply.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.messages.last().is_some_and(|m| m.role == Role::User)
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.messages.is_empty() {
            SessionState::Empty
        } else {
            SessionState::Active
        }
    }

    /// Open a turn.
    ///
    /// # Errors
    /// Returns [`ChatError::TurnInProgress`] if the previous turn has no reply yet.
    pub fn append_user(&mut self, text: impl Into<String>) -> ChatResult<()> {
        if self.is_busy() {
            return Err(ChatError::TurnInProgress);
        }
        self.messages.push(Message::user(text));
        Ok(())
    }

    /// Close the pending turn with a reply or an error notice.
    ///
    /// # Errors
    /// Returns [`ChatError::NoPendingTurn`] if no user message is waiting.
    pub fn append_assistant(&mut self, text: impl Into<String>) -> ChatResult<()> {
        if !self.is_busy() {
            return Err(ChatError::NoPendingTurn);
        }
        self.messages.push(Message::assistant(text));
        Ok(())
    }

    /// Close the turn opened during `epoch` and return its turn index.
    ///
    /// # Errors
    /// Returns [`ChatError::StaleTurn`] if the conversation was reset since,
    /// or [`ChatError::NoPendingTurn`] if no user message is waiting.
    pub fn complete_turn(&mut self, epoch: u64, text: impl Into<String>) -> ChatResult<u64> {
        if epoch != self.epoch {
            return Err(ChatError::StaleTurn);
        }
        self.append_assistant(text)?;
        let index = self.turn_counter;
        self.turn_counter += 1;
        Ok(index)
    }

    /// Drop all messages. A new id is issued only for a new conversation;
    /// clearing keeps the id and keeps numbering turns.
    pub fn reset(&mut self, new_identifier: bool) {
        self.messages.clear();
        self.epoch += 1;
        if new_identifier {
            self.id = ConversationId::new();
            self.turn_counter = 0;
        }
    }

    /// Message counts.
    #[must_use]
    pub fn stats(&self) -> ChatStats {
        self.messages.iter().fold(ChatStats::default(), |mut stats, m| {
            stats.total_messages += 1;
            stats.total_characters += m.content.chars().count();
            match m.role {
                Role::User => stats.user_messages += 1,
                Role::Assistant => stats.assistant_messages += 1,
                Role::System => {}
            }
            stats
        })
    }
}
