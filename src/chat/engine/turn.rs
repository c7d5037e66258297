//! One chat turn from user message to stored exchange.
//!
//! A turn runs in three phases so that the session lock is never held
//! across a network call:
//! 1. open the turn and snapshot history and settings (locked);
//! 2. retrieve context and call the provider (unlocked);
//! 3. append the reply (locked), then store the exchange (unlocked).
//!
//! A reset between phases 1 and 3 bumps the session epoch, and the late
//! reply is dropped with [`ChatError::StaleTurn`].

use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::chat::core::catalog::Provider;
use crate::chat::core::config::AppConfig;
use crate::chat::core::errors::ChatResult;
use crate::chat::core::http::build_client;
use crate::chat::core::ids::ConversationId;
use crate::chat::core::message::Message;
use crate::chat::core::settings::{ModelSettings, RawSettings, SettingsValidator};
use crate::chat::llm::dispatcher::ProviderDispatcher;
use crate::chat::llm::provider::{ProviderResult, Usage};
use crate::chat::llm::stream::StreamChunk;
use crate::chat::retrieval::retriever::{ContextChunk, ContextRetriever};
use crate::chat::session::registry::SharedSession;

/// Reply recorded when a provider answers with nothing.
pub const EMPTY_REPLY_NOTICE: &str =
    "Sorry, I couldn't generate a response. Please check your API configuration.";

const EVENT_BUFFER: usize = 64;

/// Which retrieved chunks make it into a prompt.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContextPolicy {
    /// Chunks spliced in at most.
    pub max_chunks: usize,
    /// Chunks scoring below this are dropped.
    pub similarity_threshold: f32,
}

impl Default for ContextPolicy {
    fn default() -> Self {
        Self {
            max_chunks: 3,
            similarity_threshold: 0.7,
        }
    }
}

impl ContextPolicy {
    fn select(&self, chunks: Vec<ContextChunk>) -> Vec<ContextChunk> {
        chunks
            .into_iter()
            .filter(|c| c.similarity_score >= self.similarity_threshold)
            .take(self.max_chunks)
            .collect()
    }
}

/// What a turn produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TurnOutcome {
    /// Assistant message appended to the conversation.
    pub reply: String,
    /// Token usage (zero for streamed and failed turns).
    pub usage: Usage,
    /// Context chunks spliced into the prompt.
    pub context_used: usize,
    /// Whether the reply is an error notice.
    pub is_error: bool,
}

/// Event of a streamed turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnEvent {
    /// A fragment of the reply.
    Token(String),
    /// The provider failed; the text is already prefixed with `Error: `.
    Error(String),
    /// The reply was recorded.
    Done(TurnOutcome),
}

struct PreparedTurn {
    epoch: u64,
    conversation_id: ConversationId,
    settings: ModelSettings,
    history: Vec<Message>,
    user_text: String,
}

/// Runs chat turns against shared sessions.
pub struct ChatEngine {
    dispatcher: ProviderDispatcher,
    retriever: ContextRetriever,
    validator: SettingsValidator,
    policy: ContextPolicy,
}

impl ChatEngine {
    /// Engine over explicit collaborators.
    #[must_use]
    pub const fn new(
        dispatcher: ProviderDispatcher,
        retriever: ContextRetriever,
        validator: SettingsValidator,
        policy: ContextPolicy,
    ) -> Self {
        Self {
            dispatcher,
            retriever,
            validator,
            policy,
        }
    }

    /// Build the HTTP client, provider backends and retriever from config.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub async fn from_config(config: &AppConfig) -> ChatResult<Self> {
        let client = build_client(&config.http)?;
        let dispatcher = ProviderDispatcher::from_config(config, &client);
        let retriever = ContextRetriever::from_config(config, &client).await;
        tracing::info!(
            providers = ?dispatcher.available_providers(),
            vector_store = retriever.is_available(),
            "chat engine ready"
        );

        Ok(Self::new(
            dispatcher,
            retriever,
            SettingsValidator::new(config.defaults.clone()),
            ContextPolicy {
                max_chunks: config.vector.max_context_chunks,
                similarity_threshold: config.vector.similarity_threshold,
            },
        ))
    }

    /// Provider dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &ProviderDispatcher {
        &self.dispatcher
    }

    /// Context retriever.
    #[must_use]
    pub const fn retriever(&self) -> &ContextRetriever {
        &self.retriever
    }

    /// Validate client-submitted settings against the full catalog.
    #[must_use]
    pub fn validate_settings(&self, raw: &RawSettings) -> ModelSettings {
        self.validator.validate(raw, Provider::ALL)
    }

    /// Run a complete turn and return its outcome.
    ///
    /// Once the user message is appended the rest of the turn runs in a
    /// background task, so dropping the returned future (a client that
    /// disconnects) still closes the turn and the session does not stay busy.
    ///
    /// # Errors
    /// Returns [`crate::chat::ChatError::TurnInProgress`] if a turn is
    /// already pending, or [`crate::chat::ChatError::StaleTurn`] if the
    /// conversation was reset while the reply was generated.
    pub async fn handle_turn(
        self: &Arc<Self>,
        session: &SharedSession,
        text: String,
    ) -> ChatResult<TurnOutcome> {
        let prepared = self.begin_turn(session, text).await?;
        let engine = Arc::clone(self);
        let session = Arc::clone(session);
        tokio::spawn(async move { engine.finish_turn(&session, prepared).await }).await?
    }

    async fn finish_turn(
        &self,
        session: &SharedSession,
        prepared: PreparedTurn,
    ) -> ChatResult<TurnOutcome> {
        let context = self.gather_context(&prepared).await;
        let result = self
            .dispatcher
            .generate(&prepared.history, &context, &prepared.settings)
            .await;

        let (outcome, turn_index) = self
            .record_reply(session, &prepared, result, context.len())
            .await?;
        if !outcome.is_error {
            self.remember(&prepared, &outcome.reply, turn_index).await;
        }
        Ok(outcome)
    }

    /// Run a turn with a streamed reply.
    ///
    /// The turn runs in a background task and completes even if the returned
    /// stream is dropped.
    ///
    /// # Errors
    /// Returns [`crate::chat::ChatError::TurnInProgress`] if a turn is already
    /// pending; nothing is spawned in that case.
    pub async fn stream_turn(
        self: &Arc<Self>,
        session: SharedSession,
        text: String,
    ) -> ChatResult<ReceiverStream<TurnEvent>> {
        let prepared = self.begin_turn(&session, text).await?;
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let engine = Arc::clone(self);

        tokio::spawn(async move {
            let context = engine.gather_context(&prepared).await;
            let mut stream = engine
                .dispatcher
                .stream(&prepared.history, &context, &prepared.settings);

            let mut reply = String::new();
            let mut failure = None;
            while let Some(chunk) = stream.next().await {
                let event = match chunk {
                    StreamChunk::Text(text) => {
                        reply.push_str(&text);
                        TurnEvent::Token(text)
                    }
                    StreamChunk::Error(message) => {
                        let shown = format!("Error: {message}");
                        failure = Some(message);
                        TurnEvent::Error(shown)
                    }
                };
                // A closed channel means the client left; keep the turn going.
                let _ = tx.send(event).await;
            }

            let result = match failure {
                Some(message) => ProviderResult::Failure { message },
                None => ProviderResult::Success {
                    content: reply,
                    usage: Usage::default(),
                },
            };

            match engine
                .record_reply(&session, &prepared, result, context.len())
                .await
            {
                Ok((outcome, turn_index)) => {
                    let _ = tx.send(TurnEvent::Done(outcome.clone())).await;
                    if !outcome.is_error {
                        engine.remember(&prepared, &outcome.reply, turn_index).await;
                    }
                }
                Err(err) => tracing::debug!("streamed reply dropped: {err}"),
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    async fn begin_turn(&self, session: &SharedSession, text: String) -> ChatResult<PreparedTurn> {
        let mut guard = session.lock().await;
        guard.append_user(text.clone())?;
        Ok(PreparedTurn {
            epoch: guard.epoch(),
            conversation_id: guard.id(),
            settings: guard.settings().clone(),
            history: guard.messages().to_vec(),
            user_text: text,
        })
    }

    async fn gather_context(&self, prepared: &PreparedTurn) -> Vec<ContextChunk> {
        if !prepared.settings.use_context || !self.retriever.is_available() {
            return Vec::new();
        }
        let chunks = self.retriever.retrieve(&prepared.user_text).await;
        let selected = self.policy.select(chunks);
        tracing::debug!("using {} context chunks", selected.len());
        selected
    }

    async fn record_reply(
        &self,
        session: &SharedSession,
        prepared: &PreparedTurn,
        result: ProviderResult,
        context_used: usize,
    ) -> ChatResult<(TurnOutcome, u64)> {
        let (reply, usage, is_error) = match result {
            ProviderResult::Success { content, usage } if !content.trim().is_empty() => {
                (content, usage, false)
            }
            ProviderResult::Success { usage, .. } => (EMPTY_REPLY_NOTICE.to_string(), usage, true),
            ProviderResult::Failure { message } => {
                (format!("Error: {message}"), Usage::default(), true)
            }
        };

        let turn_index = session
            .lock()
            .await
            .complete_turn(prepared.epoch, reply.clone())?;

        Ok((
            TurnOutcome {
                reply,
                usage,
                context_used,
                is_error,
            },
            turn_index,
        ))
    }

    async fn remember(&self, prepared: &PreparedTurn, reply: &str, turn_index: u64) {
        if !self.retriever.is_available() {
            return;
        }
        let stored = self
            .retriever
            .store(
                &prepared.user_text,
                reply,
                &prepared.conversation_id,
                Some(turn_index),
            )
            .await;
        if !stored {
            tracing::debug!("exchange {} not stored", prepared.conversation_id.chunk_id(turn_index));
        }
    }
}
