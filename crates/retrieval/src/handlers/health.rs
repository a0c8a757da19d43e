//! Health check handlers

use axum::{extract::State, Json};
use serde::Serialize;

use crate::engine::RetrievalState;
use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub service: String,
    pub status: String,
    pub lifecycle: RetrievalState,
    pub cached_queries: usize,
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: passage_common::VERSION.to_string(),
    })
}

/// Readiness probe - reports the engine lifecycle state.
///
/// A degraded instance still answers queries from the fallback path, so
/// it reports "degraded" rather than flipping unready.
pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    let lifecycle = state.engine.state().await;

    let status = match lifecycle {
        RetrievalState::Ready => "ready",
        RetrievalState::Degraded => "degraded",
        RetrievalState::Uninitialized | RetrievalState::Initializing => "not_ready",
    };

    Json(ReadyResponse {
        service: state.config.observability.service_name.clone(),
        status: status.to_string(),
        lifecycle,
        cached_queries: state.engine.cached_queries().await,
    })
}
