//! Context retrieval over stored exchanges.
//!
//! Every operation degrades instead of failing: when the store is missing or
//! a call fails the retriever logs a warning and returns an empty result (or
//! `false`), so a turn always proceeds without context.

use std::sync::Arc;

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::core::catalog::Provider;
use crate::chat::core::config::AppConfig;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::ConversationId;
use crate::chat::llm::provider::{EmbeddingPurpose, LlmProvider, build_provider};
use crate::chat::retrieval::pinecone::PineconeStore;
use crate::chat::retrieval::vector_store::{
    DeleteTarget, IndexStats, Metadata, VectorMatch, VectorRecord, VectorStore,
};

/// Default number of neighbours returned by [`ContextRetriever::retrieve`].
pub const DEFAULT_TOP_K: usize = 5;

/// Dimensionality of Gemini `embedding-001` vectors.
const GEMINI_EMBEDDING_DIMENSION: usize = 768;

/// A stored exchange returned by a similarity search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextChunk {
    /// Vector id (`{conversation_id}_{chunk_index}`).
    pub id: String,
    /// `User: …\nAssistant: …` text.
    pub text: String,
    /// Similarity in `[0, 1]`.
    pub similarity_score: f32,
    /// Conversation the exchange came from.
    pub source_conversation_id: String,
    /// When the exchange was stored.
    pub timestamp: String,
}

impl From<VectorMatch> for ContextChunk {
    fn from(hit: VectorMatch) -> Self {
        Self {
            text: hit.metadata_str("text").to_string(),
            source_conversation_id: hit.metadata_str("conversation_id").to_string(),
            timestamp: hit.metadata_str("timestamp").to_string(),
            similarity_score: hit.score.clamp(0.0, 1.0),
            id: hit.id,
        }
    }
}

/// Embeds exchanges, stores them and finds similar ones.
#[derive(Clone, Default)]
pub struct ContextRetriever {
    store: Option<Arc<dyn VectorStore>>,
    embedder: Option<Arc<dyn LlmProvider>>,
}

impl ContextRetriever {
    /// Retriever without a store; every search is empty.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Retriever over an explicit store and embedding backend.
    #[must_use]
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn LlmProvider>) -> Self {
        Self {
            store: Some(store),
            embedder: Some(embedder),
        }
    }

    /// Provision the Pinecone index and the embedding backend from config.
    ///
    /// Missing keys or a failed provisioning leave retrieval disabled.
    pub async fn from_config(config: &AppConfig, client: &reqwest::Client) -> Self {
        let Some(pinecone_key) = config.api_keys.pinecone.as_deref() else {
            tracing::info!("PINECONE_API_KEY not set; context retrieval disabled");
            return Self::disabled();
        };

        let provider = config.vector.embedding_provider;
        let Some(embed_key) = config.api_keys.for_provider(provider) else {
            tracing::warn!(
                "{} not set; embeddings unavailable, context retrieval disabled",
                provider.api_key_env()
            );
            return Self::disabled();
        };
        if provider == Provider::Gemini && config.vector.dimension != GEMINI_EMBEDDING_DIMENSION {
            tracing::warn!(
                "gemini embeddings have {GEMINI_EMBEDDING_DIMENSION} dimensions but the index is configured for {}",
                config.vector.dimension
            );
        }

        match PineconeStore::connect(
            client.clone(),
            pinecone_key,
            &config.endpoints.pinecone_controller_url,
            &config.vector,
        )
        .await
        {
            Ok(store) => Self::new(
                Arc::new(store),
                build_provider(provider, client.clone(), embed_key, &config.endpoints),
            ),
            Err(err) => {
                tracing::warn!("vector store setup failed, context retrieval disabled: {err}");
                Self::disabled()
            }
        }
    }

    /// Whether both a store and an embedding backend are configured.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.store.is_some() && self.embedder.is_some()
    }

    fn parts(&self) -> Option<(&dyn VectorStore, &dyn LlmProvider)> {
        Some((self.store.as_deref()?, self.embedder.as_deref()?))
    }

    /// Top [`DEFAULT_TOP_K`] chunks across all conversations.
    pub async fn retrieve(&self, query: &str) -> Vec<ContextChunk> {
        self.retrieve_with(query, DEFAULT_TOP_K, None).await
    }

    /// Top `top_k` chunks, best first, optionally from one conversation.
    pub async fn retrieve_with(
        &self,
        query: &str,
        top_k: usize,
        conversation_id: Option<&str>,
    ) -> Vec<ContextChunk> {
        if query.trim().is_empty() || top_k == 0 {
            return Vec::new();
        }
        let Some((store, embedder)) = self.parts() else {
            return Vec::new();
        };

        let vector = match embedder.embed(query, EmbeddingPurpose::Query).await {
            Ok(vector) => vector,
            Err(err) => {
                tracing::warn!("query embedding failed: {err}");
                return Vec::new();
            }
        };

        match store
            .query(vector, top_k, conversation_id.map(str::to_string))
            .await
        {
            Ok(hits) => hits.into_iter().map(ContextChunk::from).collect(),
            Err(err) => {
                tracing::warn!("vector search failed: {err}");
                Vec::new()
            }
        }
    }

    /// Embed and store one exchange under `{conversation_id}_{chunk_index}`.
    ///
    /// `chunk_index` defaults to 0, so callers that omit it overwrite the
    /// conversation's previous chunk.
    pub async fn store(
        &self,
        user_text: &str,
        assistant_text: &str,
        conversation_id: &ConversationId,
        chunk_index: Option<u64>,
    ) -> bool {
        let Some((store, embedder)) = self.parts() else {
            return false;
        };

        let chunk_index = chunk_index.unwrap_or(0);
        let text = format!("User: {user_text}\nAssistant: {assistant_text}");
        let values = match embedder.embed(&text, EmbeddingPurpose::Document).await {
            Ok(values) => values,
            Err(err) => {
                tracing::warn!("exchange embedding failed: {err}");
                return false;
            }
        };

        let mut metadata = Metadata::new();
        metadata.insert("conversation_id".into(), Value::from(conversation_id.to_string()));
        metadata.insert("text".into(), Value::from(text));
        metadata.insert("timestamp".into(), Value::from(Local::now().to_rfc3339()));
        metadata.insert("user_input".into(), Value::from(user_text));
        metadata.insert("assistant_response".into(), Value::from(assistant_text));
        metadata.insert("chunk_index".into(), Value::from(chunk_index));

        let record = VectorRecord {
            id: conversation_id.chunk_id(chunk_index),
            values,
            metadata,
        };
        match store.upsert(vec![record]).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("storing exchange failed: {err}");
                false
            }
        }
    }

    /// Index statistics.
    ///
    /// # Errors
    /// Returns [`ChatError::VectorStoreUnavailable`] without a store, or the
    /// store's own error.
    pub async fn stats(&self) -> ChatResult<IndexStats> {
        let store = self.store.as_deref().ok_or(ChatError::VectorStoreUnavailable)?;
        store.stats().await
    }

    /// Delete one conversation's chunks, or everything when `None`.
    pub async fn clear(&self, conversation_id: Option<&ConversationId>) -> bool {
        let Some(store) = self.store.as_deref() else {
            return false;
        };

        let result = match conversation_id {
            Some(id) => match store.list_ids(id.chunk_prefix()).await {
                Ok(ids) if ids.is_empty() => Ok(()),
                Ok(ids) => store.delete(DeleteTarget::Ids(ids)).await,
                Err(err) => Err(err),
            },
            None => store.delete(DeleteTarget::All).await,
        };

        match result {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("clearing vectors failed: {err}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::testing::{FakeProvider, InMemoryStore};

    fn retriever() -> (ContextRetriever, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::default());
        let embedder = Arc::new(FakeProvider::replying(Provider::OpenAi, "unused"));
        (ContextRetriever::new(store.clone(), embedder), store)
    }

    #[tokio::test]
    async fn test_disabled_retriever_is_empty() {
        let retriever = ContextRetriever::disabled();
        assert!(!retriever.is_available());
        assert!(retriever.retrieve("parking permits").await.is_empty());
        assert!(!retriever.store("a", "b", &ConversationId::new(), None).await);
        assert!(matches!(
            retriever.stats().await,
            Err(ChatError::VectorStoreUnavailable)
        ));
        assert!(!retriever.clear(None).await);
    }

    #[tokio::test]
    async fn test_store_then_retrieve() {
        let (retriever, store) = retriever();
        let conversation = ConversationId::new();
        assert!(
            retriever
                .store("When is trash pickup?", "Tuesdays.", &conversation, Some(2))
                .await
        );

        let record = store.get(&conversation.chunk_id(2));
        let metadata = record.map(|r| r.metadata).unwrap_or_default();
        assert_eq!(metadata["chunk_index"], 2);
        assert_eq!(metadata["user_input"], "When is trash pickup?");
        assert_eq!(
            metadata["text"],
            "User: When is trash pickup?\nAssistant: Tuesdays."
        );

        let hits = retriever.retrieve("When is trash pickup?").await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_conversation_id, conversation.to_string());
        assert!(hits[0].similarity_score > 0.5 && hits[0].similarity_score <= 1.0);
    }

    #[tokio::test]
    async fn test_missing_chunk_index_overwrites_first_chunk() {
        let (retriever, store) = retriever();
        let conversation = ConversationId::new();
        assert!(retriever.store("one", "1", &conversation, None).await);
        assert!(retriever.store("two", "2", &conversation, None).await);
        assert_eq!(store.len(), 1);
        let text = store
            .get(&conversation.chunk_id(0))
            .and_then(|r| r.metadata.get("user_input").cloned());
        assert_eq!(text, Some(Value::from("two")));
    }

    #[tokio::test]
    async fn test_blank_query_is_empty() {
        let (retriever, _store) = retriever();
        assert!(retriever.store("q", "a", &ConversationId::new(), None).await);
        assert!(retriever.retrieve("   ").await.is_empty());
    }

    #[tokio::test]
    async fn test_conversation_filter_and_clear() {
        let (retriever, store) = retriever();
        let first = ConversationId::new();
        let second = ConversationId::new();
        assert!(retriever.store("bus routes", "12 and 40", &first, Some(0)).await);
        assert!(retriever.store("bus routes", "7", &second, Some(0)).await);

        let filtered = retriever
            .retrieve_with("bus routes", 5, Some(&first.to_string()))
            .await;
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, first.chunk_id(0));

        assert!(retriever.clear(Some(&first)).await);
        assert_eq!(store.len(), 1);
        assert!(retriever.clear(None).await);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_empty() {
        let store = Arc::new(InMemoryStore::default());
        let embedder = Arc::new(FakeProvider::failing(Provider::OpenAi, 500, "down"));
        let retriever = ContextRetriever::new(store, embedder);
        assert!(retriever.retrieve("anything").await.is_empty());
        assert!(!retriever.store("a", "b", &ConversationId::new(), None).await);
    }

    #[test]
    fn test_chunk_from_match_defaults_and_clamps() {
        let hit = VectorMatch {
            id: "x_0".to_string(),
            score: 1.2,
            metadata: None,
        };
        let chunk = ContextChunk::from(hit);
        assert_eq!(chunk.text, "");
        assert_eq!(chunk.timestamp, "");
        assert!((chunk.similarity_score - 1.0).abs() < f32::EPSILON);
    }
}
