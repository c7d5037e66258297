//! Vector-store backed retrieval of earlier exchanges.

pub mod pinecone;
pub mod retriever;
pub mod vector_store;

pub use pinecone::PineconeStore;
pub use retriever::{ContextChunk, ContextRetriever, DEFAULT_TOP_K};
pub use vector_store::{
    DeleteTarget, IndexStats, Metadata, StoreFuture, VectorMatch, VectorRecord, VectorStore,
};
