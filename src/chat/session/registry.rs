//! Live sessions keyed by browser-session handle.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::SessionId;
use crate::chat::core::settings::ModelSettings;
use crate::chat::session::conversation::ConversationSession;

/// A session shared between request handlers and background turns.
///
/// Never hold the lock across a network call.
pub type SharedSession = Arc<Mutex<ConversationSession>>;

/// Concurrent map of live sessions.
pub struct SessionRegistry {
    sessions: Arc<DashMap<SessionId, SharedSession>>,
    defaults: ModelSettings,
}

impl SessionRegistry {
    /// Registry whose new sessions start with `defaults`.
    #[must_use]
    pub fn new(defaults: ModelSettings) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            defaults,
        }
    }

    /// Settings given to new sessions.
    #[must_use]
    pub const fn defaults(&self) -> &ModelSettings {
        &self.defaults
    }

    /// Open a new session.
    pub fn create(&self) -> (SessionId, SharedSession) {
        let id = SessionId::new();
        let session = Arc::new(Mutex::new(ConversationSession::new(self.defaults.clone())));
        self.sessions.insert(id, Arc::clone(&session));
        tracing::debug!("session {id} opened ({} live)", self.sessions.len());
        (id, session)
    }

    /// Look up a session.
    ///
    /// # Errors
    /// Returns [`ChatError::SessionNotFound`] for unknown handles.
    pub fn get(&self, id: &SessionId) -> ChatResult<SharedSession> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(ChatError::SessionNotFound(*id))
    }

    /// Tear a session down. Turns still running keep their own handle.
    pub fn remove(&self, id: &SessionId) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            tracing::debug!("session {id} closed");
        }
        removed
    }

    /// Live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
