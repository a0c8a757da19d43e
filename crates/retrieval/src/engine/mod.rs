//! Retrieval engine
//!
//! The engine resolves a query (plus optional conversation context) into a
//! ranked list of passages:
//! - `store` - vector-store client (Qdrant HTTP API)
//! - `rerank` - cross-encoder scoring client
//! - `fallback` - lexical index over local corpus files
//! - `aggregator` - ties the stages together behind the result cache and
//!   the one-shot lifecycle

pub mod aggregator;
pub mod fallback;
pub mod rerank;
pub mod store;

pub use aggregator::RetrievalEngine;
pub use fallback::FallbackIndex;
pub use rerank::{RerankBackend, Reranker};
pub use store::{QdrantStore, ScoredPoint, VectorSearch};

use serde::{Deserialize, Serialize};

/// A retrieved passage with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,

    /// Collection the chunk was retrieved from ("fallback" for the
    /// lexical index)
    pub collection_name: String,

    pub text: String,

    pub source_file: String,

    /// Page in the source document, when the payload carried one
    pub page_number: Option<i64>,

    /// Collection-local similarity; not comparable across collections
    pub similarity_score: f32,

    /// Cross-encoder score, set only when the rerank stage ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

/// Which path produced the served results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalPath {
    Vector,
    Fallback,
}

impl RetrievalPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalPath::Vector => "vector",
            RetrievalPath::Fallback => "fallback",
        }
    }
}

/// Outcome of the vector stage, distinguishing "nothing found" from
/// "a dependency failed"
#[derive(Debug, Clone, PartialEq)]
pub enum VectorOutcome {
    /// Merged (and possibly reranked) chunks
    Hits(Vec<Chunk>),
    /// The store was reachable but no collection produced a hit
    Empty,
    /// The query could not be embedded for this call
    EmbedderUnavailable,
    /// No collection search could be completed
    StoreUnavailable,
}

/// Why a query was served from the fallback path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Initialization failed; the instance is permanently degraded
    Degraded,
    /// Vector search ran but matched nothing
    NoVectorResults,
    EmbedderUnavailable,
    StoreUnavailable,
}

/// Result of a retrieval query. Never an error: every failure mode inside
/// the engine degrades to a reduced or empty result set.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub path: RetrievalPath,
    pub cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    pub chunks: Vec<Chunk>,
}

/// Lifecycle of a retrieval engine instance. Transitions are one-way;
/// Degraded is permanent for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalState {
    Uninitialized,
    Initializing,
    Ready,
    Degraded,
}
