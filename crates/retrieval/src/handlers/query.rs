//! Query handler

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use validator::Validate;

use crate::engine::{Chunk, FallbackReason, RetrievalPath};
use crate::AppState;
use passage_common::errors::{AppError, Result};

/// Retrieval query request
#[derive(Debug, Deserialize, Validate)]
pub struct QueryRequest {
    #[validate(length(min = 1, max = 1000))]
    pub query: String,

    /// Optional prior-conversation context
    #[serde(default)]
    pub context: Option<String>,

    /// Optional cap on returned results, applied after ranking
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// Retrieval query response
#[derive(Serialize)]
pub struct QueryResponse {
    pub query: String,

    /// Which path served the results
    pub path: RetrievalPath,

    pub cache_hit: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,

    pub total_results: usize,

    pub results: Vec<Chunk>,

    pub processing_time_ms: u64,
}

/// Resolve a query into ranked passages
pub async fn query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>> {
    let start = Instant::now();

    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let outcome = state
        .engine
        .query(&request.query, request.context.as_deref())
        .await;

    let mut results = outcome.chunks;
    if let Some(top_k) = request.top_k {
        results.truncate(top_k);
    }

    let processing_time_ms = start.elapsed().as_millis() as u64;

    tracing::info!(
        path = outcome.path.as_str(),
        cache_hit = outcome.cache_hit,
        results = results.len(),
        latency_ms = processing_time_ms,
        "Query completed"
    );

    Ok(Json(QueryResponse {
        query: request.query,
        path: outcome.path,
        cache_hit: outcome.cache_hit,
        fallback_reason: outcome.fallback_reason,
        total_results: results.len(),
        results,
        processing_time_ms,
    }))
}

#[derive(Serialize)]
pub struct RebuildResponse {
    pub status: String,
}

/// Drop the fallback index; the next degraded query rebuilds it from the
/// corpus directory
pub async fn rebuild_index(State(state): State<AppState>) -> Json<RebuildResponse> {
    state.engine.rebuild_fallback_index().await;
    Json(RebuildResponse {
        status: "reset".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_query_fails_validation() {
        let request = QueryRequest {
            query: "".to_string(),
            context: None,
            top_k: None,
        };
        assert!(request.validate().is_err());

        let request = QueryRequest {
            query: "a valid question".to_string(),
            context: Some("earlier turn".to_string()),
            top_k: Some(3),
        };
        assert!(request.validate().is_ok());
    }
}
