//! Vector store abstraction for conversation chunks.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::chat::core::errors::ChatResult;

/// Boxed future type for vector store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Flat metadata attached to a vector.
pub type Metadata = Map<String, Value>;

/// A vector with its id and metadata.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VectorRecord {
    /// Vector id.
    pub id: String,
    /// Embedding values.
    pub values: Vec<f32>,
    /// Metadata stored next to the vector.
    pub metadata: Metadata,
}

/// A query hit.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct VectorMatch {
    /// Vector id.
    pub id: String,
    /// Cosine similarity.
    #[serde(default)]
    pub score: f32,
    /// Stored metadata, if any.
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl VectorMatch {
    /// String metadata field, `""` when missing or not a string.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> &str {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

/// Index statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Vectors across all namespaces.
    pub total_vectors: u64,
    /// Index dimensionality.
    pub dimension: usize,
    /// Fraction of capacity used (0 for serverless indexes).
    pub index_fullness: f64,
    /// Per-namespace counts as reported by the store.
    pub namespaces: Value,
}

/// What to delete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeleteTarget {
    /// These ids.
    Ids(Vec<String>),
    /// Every vector in the index.
    All,
}

/// Similarity store for conversation chunks.
pub trait VectorStore: Send + Sync {
    /// Insert or overwrite records.
    ///
    /// # Errors
    /// Returns an error if the store rejects the write.
    fn upsert(&self, records: Vec<VectorRecord>) -> StoreFuture<'_, ChatResult<()>>;
    /// Nearest neighbours by cosine similarity, best first, optionally
    /// restricted to one conversation.
    ///
    /// # Errors
    /// Returns an error if the query cannot be executed.
    fn query(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        conversation_id: Option<String>,
    ) -> StoreFuture<'_, ChatResult<Vec<VectorMatch>>>;
    /// Ids starting with `prefix`.
    ///
    /// # Errors
    /// Returns an error if listing fails.
    fn list_ids(&self, prefix: String) -> StoreFuture<'_, ChatResult<Vec<String>>>;
    /// Delete vectors.
    ///
    /// # Errors
    /// Returns an error if deletion fails.
    fn delete(&self, target: DeleteTarget) -> StoreFuture<'_, ChatResult<()>>;
    /// Index statistics.
    ///
    /// # Errors
    /// Returns an error if the store cannot be reached.
    fn stats(&self) -> StoreFuture<'_, ChatResult<IndexStats>>;
}
