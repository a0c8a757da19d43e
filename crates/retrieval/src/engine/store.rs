//! Vector store client
//!
//! Talks to the Qdrant HTTP API via reqwest. The trait seam exists so the
//! aggregator can be exercised against in-memory stores in tests.

use async_trait::async_trait;
use passage_common::config::VectorStoreConfig;
use passage_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Chunk;

/// Trait for vector similarity search over named collections
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Enumerate collections in discovery order
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Number of points stored in a collection
    async fn count(&self, collection: &str) -> Result<u64>;

    /// Nearest neighbors for a query vector, store-native order
    async fn search(&self, collection: &str, vector: &[f32], limit: usize)
        -> Result<Vec<ScoredPoint>>;
}

/// One search hit as returned by the store
#[derive(Debug, Clone, Deserialize)]
pub struct ScoredPoint {
    pub id: Value,
    pub score: f32,
    #[serde(default)]
    pub payload: ChunkPayload,
}

/// Point payload. Older collections used different key names for the same
/// fields; the aliases keep them readable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkPayload {
    #[serde(default, alias = "content")]
    pub text: String,

    #[serde(default, alias = "doc_title", alias = "file_name")]
    pub source_file: Option<String>,

    #[serde(default, alias = "page")]
    pub page_number: Option<i64>,
}

impl ScoredPoint {
    /// Convert a hit into a chunk, recording its origin collection
    pub fn into_chunk(self, collection: &str) -> Chunk {
        let chunk_id = match &self.id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        Chunk {
            chunk_id,
            collection_name: collection.to_string(),
            text: self.payload.text,
            source_file: self.payload.source_file.unwrap_or_default(),
            page_number: self.payload.page_number,
            similarity_score: self.score,
            rerank_score: None,
        }
    }
}

/// Qdrant HTTP client
pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct CollectionsResponse {
    result: CollectionsResult,
}

#[derive(Deserialize)]
struct CollectionsResult {
    collections: Vec<CollectionDescription>,
}

#[derive(Deserialize)]
struct CollectionDescription {
    name: String,
}

#[derive(Serialize)]
struct CountRequest {
    exact: bool,
}

#[derive(Deserialize)]
struct CountResponse {
    result: CountResult,
}

#[derive(Deserialize)]
struct CountResult {
    count: u64,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

impl QdrantStore {
    /// Create a new store client from configuration
    pub fn new(config: &VectorStoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.search_timeout())
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }
}

#[async_trait]
impl VectorSearch for QdrantStore {
    async fn list_collections(&self) -> Result<Vec<String>> {
        let url = format!("{}/collections", self.base_url);

        let response = self
            .request(self.client.get(&url))
            .send()
            .await
            .map_err(|e| AppError::VectorStore {
                message: format!("List collections failed: {}", e),
            })?;

        if !response.status().is_success() {
            return Err(AppError::VectorStore {
                message: format!("List collections returned {}", response.status()),
            });
        }

        let body: CollectionsResponse =
            response.json().await.map_err(|e| AppError::VectorStore {
                message: format!("Malformed collections response: {}", e),
            })?;

        Ok(body.result.collections.into_iter().map(|c| c.name).collect())
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let url = format!("{}/collections/{}/points/count", self.base_url, collection);

        let response = self
            .request(self.client.post(&url))
            .json(&CountRequest { exact: true })
            .send()
            .await
            .map_err(|e| AppError::CollectionSearch {
                collection: collection.to_string(),
                message: format!("Count failed: {}", e),
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::CollectionNotFound {
                collection: collection.to_string(),
            });
        }

        if !response.status().is_success() {
            return Err(AppError::CollectionSearch {
                collection: collection.to_string(),
                message: format!("Count returned {}", response.status()),
            });
        }

        let body: CountResponse =
            response.json().await.map_err(|e| AppError::CollectionSearch {
                collection: collection.to_string(),
                message: format!("Malformed count response: {}", e),
            })?;

        Ok(body.result.count)
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let url = format!("{}/collections/{}/points/search", self.base_url, collection);

        let request = SearchRequest {
            vector,
            limit,
            with_payload: true,
        };

        let response = self
            .request(self.client.post(&url))
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::CollectionSearch {
                collection: collection.to_string(),
                message: format!("Search failed: {}", e),
            })?;

        if !response.status().is_success() {
            return Err(AppError::CollectionSearch {
                collection: collection.to_string(),
                message: format!("Search returned {}", response.status()),
            });
        }

        let body: SearchResponse =
            response.json().await.map_err(|e| AppError::CollectionSearch {
                collection: collection.to_string(),
                message: format!("Malformed search response: {}", e),
            })?;

        Ok(body.result)
    }
}
