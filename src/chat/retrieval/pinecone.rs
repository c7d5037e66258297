//! Pinecone-backed [`VectorStore`].
//!
//! The control plane resolves (and on first use creates) the index; all
//! vector operations then go to the index's own data-plane host.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;

use crate::chat::core::config::VectorConfig;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::http::{ensure_success, join_url};
use crate::chat::retrieval::vector_store::{
    DeleteTarget, IndexStats, StoreFuture, VectorMatch, VectorRecord, VectorStore,
};

const SERVICE: &str = "Pinecone";
const API_KEY_HEADER: &str = "Api-Key";
const API_VERSION_HEADER: &str = "X-Pinecone-API-Version";
const API_VERSION: &str = "2024-07";

const INDEX_READY_TIMEOUT: Duration = Duration::from_secs(90);
const INDEX_READY_RETRY: Duration = Duration::from_secs(2);

/// Largest id batch accepted by a single delete call.
const DELETE_BATCH: usize = 1000;

/// Client bound to one Pinecone index.
#[derive(Clone)]
pub struct PineconeStore {
    client: reqwest::Client,
    api_key: String,
    host_url: String,
}

impl PineconeStore {
    /// Resolve the index named in `config`, creating it when missing, and wait
    /// until it is ready.
    ///
    /// # Errors
    /// Returns an error if the control plane cannot be reached, rejects the
    /// request, or the index does not become ready in time.
    pub async fn connect(
        client: reqwest::Client,
        api_key: &str,
        controller_url: &str,
        config: &VectorConfig,
    ) -> ChatResult<Self> {
        let control = ControlPlane {
            client: &client,
            api_key,
            base_url: controller_url,
        };

        let existing = control.list_indexes().await?;
        if existing.iter().any(|index| index.name == config.index_name) {
            tracing::debug!("pinecone index {} already exists", config.index_name);
        } else {
            tracing::info!(
                "creating pinecone index {} ({} dims, {}/{})",
                config.index_name,
                config.dimension,
                config.cloud,
                config.region
            );
            control.create_index(config).await?;
        }

        let host = control.wait_until_ready(&config.index_name).await?;
        tracing::info!("pinecone index {} ready at {host}", config.index_name);

        Ok(Self::with_host(client, api_key, host_url(&host)))
    }

    /// Client for an already known data-plane host.
    #[must_use]
    pub fn with_host(client: reqwest::Client, api_key: impl Into<String>, host_url: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            host_url: host_url.into(),
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(join_url(&self.host_url, path))
            .header(API_KEY_HEADER, &self.api_key)
            .header(API_VERSION_HEADER, API_VERSION)
    }

    async fn upsert_inner(&self, records: Vec<VectorRecord>) -> ChatResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let response = self
            .post("vectors/upsert")
            .json(&json!({ "vectors": records }))
            .send()
            .await?;
        ensure_success(response, SERVICE).await?;
        Ok(())
    }

    async fn query_inner(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        conversation_id: Option<String>,
    ) -> ChatResult<Vec<VectorMatch>> {
        let body = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            filter: conversation_id.map(|id| json!({ "conversation_id": { "$eq": id } })),
        };
        let response = self.post("query").json(&body).send().await?;
        let response = ensure_success(response, SERVICE).await?;
        let parsed: QueryResponse = response.json().await?;
        Ok(parsed.matches)
    }

    async fn list_ids_inner(&self, prefix: String) -> ChatResult<Vec<String>> {
        let mut ids = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut url = Url::parse(&join_url(&self.host_url, "vectors/list"))?;
            {
                let mut pairs = url.query_pairs_mut();
                pairs.append_pair("prefix", &prefix);
                if let Some(token) = &token {
                    pairs.append_pair("paginationToken", token);
                }
            }

            let response = self
                .client
                .get(url)
                .header(API_KEY_HEADER, &self.api_key)
                .header(API_VERSION_HEADER, API_VERSION)
                .send()
                .await?;
            let response = ensure_success(response, SERVICE).await?;
            let page: ListResponse = response.json().await?;

            ids.extend(page.vectors.into_iter().map(|v| v.id));
            token = page.pagination.and_then(|p| p.next);
            if token.is_none() {
                return Ok(ids);
            }
        }
    }

    async fn delete_inner(&self, target: DeleteTarget) -> ChatResult<()> {
        match target {
            DeleteTarget::All => {
                let response = self
                    .post("vectors/delete")
                    .json(&json!({ "deleteAll": true }))
                    .send()
                    .await?;
                ensure_success(response, SERVICE).await?;
            }
            DeleteTarget::Ids(ids) => {
                for batch in ids.chunks(DELETE_BATCH) {
                    let response = self
                        .post("vectors/delete")
                        .json(&json!({ "ids": batch }))
                        .send()
                        .await?;
                    ensure_success(response, SERVICE).await?;
                }
            }
        }
        Ok(())
    }

    async fn stats_inner(&self) -> ChatResult<IndexStats> {
        let response = self.post("describe_index_stats").json(&json!({})).send().await?;
        let response = ensure_success(response, SERVICE).await?;
        let parsed: StatsResponse = response.json().await?;
        Ok(parsed.into())
    }
}

impl VectorStore for PineconeStore {
    fn upsert(&self, records: Vec<VectorRecord>) -> StoreFuture<'_, ChatResult<()>> {
        Box::pin(self.upsert_inner(records))
    }

    fn query(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        conversation_id: Option<String>,
    ) -> StoreFuture<'_, ChatResult<Vec<VectorMatch>>> {
        Box::pin(self.query_inner(vector, top_k, conversation_id))
    }

    fn list_ids(&self, prefix: String) -> StoreFuture<'_, ChatResult<Vec<String>>> {
        Box::pin(self.list_ids_inner(prefix))
    }

    fn delete(&self, target: DeleteTarget) -> StoreFuture<'_, ChatResult<()>> {
        Box::pin(self.delete_inner(target))
    }

    fn stats(&self) -> StoreFuture<'_, ChatResult<IndexStats>> {
        Box::pin(self.stats_inner())
    }
}

struct ControlPlane<'a> {
    client: &'a reqwest::Client,
    api_key: &'a str,
    base_url: &'a str,
}

impl ControlPlane<'_> {
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, join_url(self.base_url, path))
            .header(API_KEY_HEADER, self.api_key)
            .header(API_VERSION_HEADER, API_VERSION)
    }

    async fn list_indexes(&self) -> ChatResult<Vec<IndexDescription>> {
        let response = self.request(reqwest::Method::GET, "indexes").send().await?;
        let response = ensure_success(response, SERVICE).await?;
        let parsed: IndexList = response.json().await?;
        Ok(parsed.indexes)
    }

    async fn create_index(&self, config: &VectorConfig) -> ChatResult<()> {
        let body = json!({
            "name": config.index_name,
            "dimension": config.dimension,
            "metric": "cosine",
            "spec": {
                "serverless": { "cloud": config.cloud, "region": config.region }
            }
        });
        let response = self
            .request(reqwest::Method::POST, "indexes")
            .json(&body)
            .send()
            .await?;
        // Lost a creation race with another process.
        if response.status() == reqwest::StatusCode::CONFLICT {
            return Ok(());
        }
        ensure_success(response, SERVICE).await?;
        Ok(())
    }

    async fn describe_index(&self, name: &str) -> ChatResult<IndexDescription> {
        let response = self
            .request(reqwest::Method::GET, &format!("indexes/{name}"))
            .send()
            .await?;
        let response = ensure_success(response, SERVICE).await?;
        Ok(response.json().await?)
    }

    async fn wait_until_ready(&self, name: &str) -> ChatResult<String> {
        let deadline = Instant::now() + INDEX_READY_TIMEOUT;
        loop {
            let index = self.describe_index(name).await?;
            if let Some(host) = index.host.filter(|h| index.status.ready && !h.is_empty()) {
                return Ok(host);
            }
            if Instant::now() >= deadline {
                return Err(ChatError::Configuration(format!(
                    "pinecone index {name} not ready after {}s (state: {})",
                    INDEX_READY_TIMEOUT.as_secs(),
                    index.status.state
                )));
            }
            tokio::time::sleep(INDEX_READY_RETRY).await;
        }
    }
}

fn host_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

#[derive(Deserialize)]
struct IndexList {
    #[serde(default)]
    indexes: Vec<IndexDescription>,
}

#[derive(Deserialize)]
struct IndexDescription {
    name: String,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    status: IndexStatus,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct IndexStatus {
    ready: bool,
    state: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
    vector: Vec<f32>,
    top_k: usize,
    include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Value>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<VectorMatch>,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    vectors: Vec<ListedVector>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Deserialize)]
struct ListedVector {
    id: String,
}

#[derive(Deserialize)]
struct Pagination {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct StatsResponse {
    dimension: usize,
    index_fullness: f64,
    total_vector_count: u64,
    namespaces: Value,
}

impl From<StatsResponse> for IndexStats {
    fn from(stats: StatsResponse) -> Self {
        Self {
            total_vectors: stats.total_vector_count,
            dimension: stats.dimension,
            index_fullness: stats.index_fullness,
            namespaces: if stats.namespaces.is_null() {
                json!({})
            } else {
                stats.namespaces
            },
        }
    }
}
