//! In-process doubles for the hosted collaborators, used by unit tests.

use std::sync::Mutex;
use std::time::Duration;

use futures::StreamExt;

use crate::chat::core::catalog::Provider;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::message::Message;
use crate::chat::core::settings::ModelSettings;
use crate::chat::llm::provider::{
    Completion, EmbeddingPurpose, LlmProvider, ProviderFuture, Usage,
};
use crate::chat::llm::stream::{TextStream, chunked_stream, error_stream};
use crate::chat::retrieval::vector_store::{
    DeleteTarget, IndexStats, StoreFuture, VectorMatch, VectorRecord, VectorStore,
};

/// Scripted provider: always the same reply or the same API error.
pub struct FakeProvider {
    provider: Provider,
    reply: Result<String, (u16, String)>,
    delay: Option<Duration>,
    prompts: Mutex<Vec<Vec<Message>>>,
}

impl FakeProvider {
    pub fn replying(provider: Provider, reply: &str) -> Self {
        Self {
            provider,
            reply: Ok(reply.to_string()),
            delay: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(provider: Provider, status: u16, message: &str) -> Self {
        Self {
            provider,
            reply: Err((status, message.to_string())),
            delay: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Make `complete` wait before answering.
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Last prompt passed to `complete` or `stream`.
    pub fn last_prompt(&self) -> Vec<Message> {
        self.prompts
            .lock()
            .ok()
            .and_then(|prompts| prompts.last().cloned())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or_default()
    }

    fn record(&self, messages: &[Message]) {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(messages.to_vec());
        }
    }

    fn outcome(&self) -> ChatResult<String> {
        self.reply.clone().map_err(|(status, message)| ChatError::Api {
            service: self.provider.display_name(),
            status,
            message,
        })
    }
}

impl LlmProvider for FakeProvider {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn complete<'a>(
        &'a self,
        messages: &'a [Message],
        _settings: &'a ModelSettings,
    ) -> ProviderFuture<'a, ChatResult<Completion>> {
        self.record(messages);
        let outcome = self.outcome();
        let delay = self.delay;
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            outcome.map(|content| Completion {
                usage: Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                },
                content,
            })
        })
    }

    fn stream(&self, messages: Vec<Message>, _settings: ModelSettings) -> TextStream {
        self.record(&messages);
        match self.outcome() {
            Ok(content) => chunked_stream(self.provider, async move { Ok(content) }),
            Err(err) => error_stream(crate::chat::llm::provider::failure_message(self.provider, &err)),
        }
    }

    fn embed<'a>(
        &'a self,
        text: &'a str,
        _purpose: EmbeddingPurpose,
    ) -> ProviderFuture<'a, ChatResult<Vec<f32>>> {
        let outcome = self.outcome().map(|_| letter_histogram(text));
        Box::pin(async move { outcome })
    }
}

/// Deterministic non-negative embedding: letter counts plus a bias term.
fn letter_histogram(text: &str) -> Vec<f32> {
    let mut values = vec![0.0_f32; 27];
    values[26] = 1.0;
    for c in text.chars().filter(char::is_ascii_alphabetic) {
        let index = usize::from(c.to_ascii_lowercase() as u8 - b'a');
        values[index] += 1.0;
    }
    values
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm = |v: &[f32]| v.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm(a) * norm(b);
    if denom == 0.0 { 0.0 } else { dot / denom }
}

/// Vector store kept in memory with exact cosine search.
#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<Vec<VectorRecord>>,
}

impl InMemoryStore {
    pub fn get(&self, id: &str) -> Option<VectorRecord> {
        self.records
            .lock()
            .ok()
            .and_then(|records| records.iter().find(|r| r.id == id).cloned())
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or_default()
    }
}

impl VectorStore for InMemoryStore {
    fn upsert(&self, new_records: Vec<VectorRecord>) -> StoreFuture<'_, ChatResult<()>> {
        if let Ok(mut records) = self.records.lock() {
            for record in new_records {
                records.retain(|r| r.id != record.id);
                records.push(record);
            }
        }
        Box::pin(async { Ok(()) })
    }

    fn query(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        conversation_id: Option<String>,
    ) -> StoreFuture<'_, ChatResult<Vec<VectorMatch>>> {
        let mut hits: Vec<VectorMatch> = self
            .records
            .lock()
            .map(|records| {
                records
                    .iter()
                    .filter(|r| {
                        conversation_id.as_deref().is_none_or(|id| {
                            r.metadata.get("conversation_id").and_then(|v| v.as_str()) == Some(id)
                        })
                    })
                    .map(|r| VectorMatch {
                        id: r.id.clone(),
                        score: cosine(&vector, &r.values),
                        metadata: Some(r.metadata.clone()),
                    })
                    .collect()
            })
            .unwrap_or_default();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Box::pin(async move { Ok(hits) })
    }

    fn list_ids(&self, prefix: String) -> StoreFuture<'_, ChatResult<Vec<String>>> {
        let ids = self
            .records
            .lock()
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.id.starts_with(&prefix))
                    .map(|r| r.id.clone())
                    .collect()
            })
            .unwrap_or_default();
        Box::pin(async move { Ok(ids) })
    }

    fn delete(&self, target: DeleteTarget) -> StoreFuture<'_, ChatResult<()>> {
        if let Ok(mut records) = self.records.lock() {
            match target {
                DeleteTarget::All => records.clear(),
                DeleteTarget::Ids(ids) => records.retain(|r| !ids.contains(&r.id)),
            }
        }
        Box::pin(async { Ok(()) })
    }

    fn stats(&self) -> StoreFuture<'_, ChatResult<IndexStats>> {
        let total = self.len() as u64;
        Box::pin(async move {
            Ok(IndexStats {
                total_vectors: total,
                dimension: 27,
                index_fullness: 0.0,
                namespaces: serde_json::json!({ "": { "vectorCount": total } }),
            })
        })
    }
}

/// Drain a text stream into its concatenated text.
pub async fn collect_text(stream: TextStream) -> String {
    stream.map(|chunk| chunk.as_text()).collect::<Vec<_>>().await.concat()
}

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn serve(router: axum::Router) -> String {
    let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
        return UNREACHABLE_URL.to_string();
    };
    let Ok(addr) = listener.local_addr() else {
        return UNREACHABLE_URL.to_string();
    };
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

/// Base URL nothing listens on.
pub const UNREACHABLE_URL: &str = "http://127.0.0.1:1";
