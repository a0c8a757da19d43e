//! Cross-encoder reranking
//!
//! Rerank capability is resolved once at construction from configuration.
//! When the stage is absent, or a call fails at request time, the caller
//! keeps the pre-rerank merge order.

use async_trait::async_trait;
use passage_common::config::RerankerConfig;
use passage_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::Chunk;

/// Trait for cross-encoder scoring backends
#[async_trait]
pub trait RerankBackend: Send + Sync {
    /// Score each document against the query; results are index-aligned
    /// with `documents`
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>>;
}

/// HTTP scoring backend (text-embeddings-inference style `/rerank` endpoint)
pub struct HttpReranker {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct RerankScore {
    index: usize,
    score: f32,
}

impl HttpReranker {
    pub fn new(config: &RerankerConfig) -> Result<Self> {
        let url = config.url.clone().ok_or_else(|| AppError::Configuration {
            message: "Reranker enabled but no endpoint URL configured".to_string(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl RerankBackend for HttpReranker {
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        let url = format!("{}/rerank", self.base_url);

        let request = RerankRequest {
            query,
            texts: documents,
            model: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Rerank {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            return Err(AppError::Rerank {
                message: format!("Scoring endpoint returned {}", response.status()),
            });
        }

        let ranked: Vec<RerankScore> =
            response.json().await.map_err(|e| AppError::Rerank {
                message: format!("Malformed rerank response: {}", e),
            })?;

        // Re-align by index; the endpoint returns entries sorted by score
        let mut scores = vec![0.0_f32; documents.len()];
        for entry in ranked {
            match scores.get_mut(entry.index) {
                Some(slot) => *slot = entry.score,
                None => {
                    return Err(AppError::Rerank {
                        message: format!("Score index {} out of range", entry.index),
                    })
                }
            }
        }

        Ok(scores)
    }
}

/// The rerank stage: scores merged chunks, stable-sorts descending, and
/// truncates to top-K.
pub struct Reranker {
    backend: Arc<dyn RerankBackend>,
    top_k: usize,
    timeout: Duration,
}

impl Reranker {
    pub fn new(backend: Arc<dyn RerankBackend>, top_k: usize, timeout: Duration) -> Self {
        Self {
            backend,
            top_k,
            timeout,
        }
    }

    /// Build the stage from configuration. `None` means the capability is
    /// absent and the merge order is served as-is.
    pub fn from_config(config: &RerankerConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }

        let backend = Arc::new(HttpReranker::new(config)?);
        Ok(Some(Self::new(backend, config.top_k, config.timeout())))
    }

    /// Score and reorder chunks. Ties keep the incoming order.
    pub async fn rerank(&self, query: &str, chunks: &[Chunk]) -> Result<Vec<Chunk>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let documents: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

        let scores = tokio::time::timeout(self.timeout, self.backend.score(query, &documents))
            .await
            .map_err(|_| AppError::Rerank {
                message: format!("Scoring timed out after {:?}", self.timeout),
            })??;

        if scores.len() != chunks.len() {
            return Err(AppError::Rerank {
                message: format!(
                    "Expected {} scores, got {}",
                    chunks.len(),
                    scores.len()
                ),
            });
        }

        let mut scored: Vec<Chunk> = chunks
            .iter()
            .zip(scores)
            .map(|(chunk, score)| {
                let mut chunk = chunk.clone();
                chunk.rerank_score = Some(score);
                chunk
            })
            .collect();

        // sort_by is stable, so equal scores keep merge order
        scored.sort_by(|a, b| {
            b.rerank_score
                .partial_cmp(&a.rerank_score)
                .unwrap_or(Ordering::Equal)
        });
        scored.truncate(self.top_k);

        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticScores(Vec<f32>);

    #[async_trait]
    impl RerankBackend for StaticScores {
        async fn score(&self, _query: &str, _documents: &[String]) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl RerankBackend for FailingBackend {
        async fn score(&self, _query: &str, _documents: &[String]) -> Result<Vec<f32>> {
            Err(AppError::Rerank {
                message: "model offline".to_string(),
            })
        }
    }

    fn chunk(id: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            collection_name: "docs".to_string(),
            text: format!("text {}", id),
            source_file: "f.pdf".to_string(),
            page_number: None,
            similarity_score: 0.0,
            rerank_score: None,
        }
    }

    #[tokio::test]
    async fn test_ties_keep_incoming_order() {
        let stage = Reranker::new(
            Arc::new(StaticScores(vec![0.5, 0.5, 0.9])),
            10,
            Duration::from_secs(5),
        );
        let merged = vec![chunk("a"), chunk("b"), chunk("c")];

        let ranked = stage.rerank("q", &merged).await.unwrap();
        let ids: Vec<&str> = ranked.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(ranked[0].rerank_score, Some(0.9));
    }

    #[tokio::test]
    async fn test_truncates_to_top_k_descending() {
        let scores: Vec<f32> = (0..25).map(|i| i as f32 / 25.0).collect();
        let stage = Reranker::new(
            Arc::new(StaticScores(scores)),
            10,
            Duration::from_secs(5),
        );
        let merged: Vec<Chunk> = (0..25).map(|i| chunk(&i.to_string())).collect();

        let ranked = stage.rerank("q", &merged).await.unwrap();
        assert_eq!(ranked.len(), 10);
        for pair in ranked.windows(2) {
            assert!(pair[0].rerank_score >= pair[1].rerank_score);
        }
        assert_eq!(ranked[0].chunk_id, "24");
    }

    #[tokio::test]
    async fn test_backend_failure_propagates_to_caller() {
        let stage = Reranker::new(Arc::new(FailingBackend), 10, Duration::from_secs(5));
        let merged = vec![chunk("a")];
        assert!(stage.rerank("q", &merged).await.is_err());
    }

    #[tokio::test]
    async fn test_score_count_mismatch_is_an_error() {
        let stage = Reranker::new(
            Arc::new(StaticScores(vec![0.1])),
            10,
            Duration::from_secs(5),
        );
        let merged = vec![chunk("a"), chunk("b")];
        assert!(stage.rerank("q", &merged).await.is_err());
    }

    #[test]
    fn test_disabled_config_yields_no_stage() {
        let config = RerankerConfig {
            enabled: false,
            url: None,
            model: "cross-encoder/ms-marco-MiniLM-L-6-v2".to_string(),
            top_k: 10,
            timeout_secs: 5,
        };
        assert!(Reranker::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_enabled_without_url_is_rejected() {
        let config = RerankerConfig {
            enabled: true,
            url: None,
            model: "cross-encoder/ms-marco-MiniLM-L-6-v2".to_string(),
            top_k: 10,
            timeout_secs: 5,
        };
        assert!(Reranker::from_config(&config).is_err());
    }
}
