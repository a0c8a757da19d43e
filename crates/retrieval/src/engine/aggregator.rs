//! Retrieval aggregator and lifecycle
//!
//! Runs the full query path: result cache, one-shot lazy initialization,
//! multi-collection vector search with per-collection failure isolation,
//! optional cross-encoder rerank, and the lexical fallback. No failure
//! inside the engine reaches the caller; every degraded mode still serves
//! a result list, possibly empty.

use futures::future::join_all;
use passage_common::cache::ResultCache;
use passage_common::config::AppConfig;
use passage_common::embeddings::{create_embedder, Embedder};
use passage_common::errors::Result;
use passage_common::metrics;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use super::fallback::FallbackIndex;
use super::rerank::Reranker;
use super::store::{QdrantStore, VectorSearch};
use super::{Chunk, FallbackReason, QueryOutcome, RetrievalPath, RetrievalState, VectorOutcome};

type CachedResult = (RetrievalPath, Vec<Chunk>);

/// Backends constructed during initialization
pub struct Backends {
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<dyn VectorSearch>,
    pub reranker: Option<Reranker>,
}

struct Lifecycle {
    state: RetrievalState,
    last_reclaim: Instant,
}

/// The retrieval engine. One instance per process, shared across request
/// handlers.
pub struct RetrievalEngine {
    config: Arc<AppConfig>,
    cache: ResultCache<CachedResult>,
    backends: OnceCell<Backends>,
    lifecycle: Mutex<Lifecycle>,
    fallback: Mutex<Option<Arc<FallbackIndex>>>,
}

impl RetrievalEngine {
    /// Create an engine; backends are constructed lazily on first query
    pub fn new(config: Arc<AppConfig>) -> Self {
        let cache = ResultCache::new(config.cache.clone());

        Self {
            config,
            cache,
            backends: OnceCell::new(),
            lifecycle: Mutex::new(Lifecycle {
                state: RetrievalState::Uninitialized,
                last_reclaim: Instant::now(),
            }),
            fallback: Mutex::new(None),
        }
    }

    /// Create an engine with pre-wired backends. Initialization still runs
    /// the connectivity probe on first query.
    pub fn with_backends(config: Arc<AppConfig>, backends: Backends) -> Self {
        let cache = ResultCache::new(config.cache.clone());

        Self {
            config,
            cache,
            backends: OnceCell::new_with(Some(backends)),
            lifecycle: Mutex::new(Lifecycle {
                state: RetrievalState::Uninitialized,
                last_reclaim: Instant::now(),
            }),
            fallback: Mutex::new(None),
        }
    }

    /// Current lifecycle state
    pub async fn state(&self) -> RetrievalState {
        self.lifecycle.lock().await.state
    }

    /// Number of cached query results
    pub async fn cached_queries(&self) -> usize {
        self.cache.len().await
    }

    /// Drop the fallback index so the next degraded query rebuilds it from
    /// the corpus directory
    pub async fn rebuild_fallback_index(&self) {
        *self.fallback.lock().await = None;
        info!("Fallback index reset");
    }

    /// Resolve a query into ranked chunks.
    ///
    /// Always answers: cache hit, vector path, or lexical fallback, in
    /// that order of preference.
    pub async fn query(&self, query: &str, context: Option<&str>) -> QueryOutcome {
        let start = Instant::now();
        let query = query.trim();
        let context = context.map(str::trim).filter(|c| !c.is_empty());

        self.maybe_reclaim().await;

        if let Some((path, chunks)) = self.cache.get(query, context).await {
            metrics::record_retrieval(start.elapsed().as_secs_f64(), "cache", chunks.len());
            return QueryOutcome {
                path,
                cache_hit: true,
                fallback_reason: None,
                chunks,
            };
        }

        let (path, fallback_reason, chunks) = if !self.ensure_ready().await {
            let chunks = self.fallback_search(query, context).await;
            (RetrievalPath::Fallback, Some(FallbackReason::Degraded), chunks)
        } else {
            match self.vector_search(query).await {
                VectorOutcome::Hits(chunks) => (RetrievalPath::Vector, None, chunks),
                VectorOutcome::Empty => {
                    let chunks = self.fallback_search(query, context).await;
                    (
                        RetrievalPath::Fallback,
                        Some(FallbackReason::NoVectorResults),
                        chunks,
                    )
                }
                VectorOutcome::EmbedderUnavailable => {
                    let chunks = self.fallback_search(query, context).await;
                    (
                        RetrievalPath::Fallback,
                        Some(FallbackReason::EmbedderUnavailable),
                        chunks,
                    )
                }
                VectorOutcome::StoreUnavailable => {
                    let chunks = self.fallback_search(query, context).await;
                    (
                        RetrievalPath::Fallback,
                        Some(FallbackReason::StoreUnavailable),
                        chunks,
                    )
                }
            }
        };

        self.cache.put(query, context, (path, chunks.clone())).await;
        metrics::record_retrieval(start.elapsed().as_secs_f64(), path.as_str(), chunks.len());

        debug!(
            path = path.as_str(),
            results = chunks.len(),
            "Query resolved"
        );

        QueryOutcome {
            path,
            cache_hit: false,
            fallback_reason,
            chunks,
        }
    }

    /// Drive the one-shot initialization. Returns whether the vector path
    /// is usable; a failed attempt leaves the instance permanently Degraded.
    async fn ensure_ready(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock().await;

        match lifecycle.state {
            RetrievalState::Ready => true,
            RetrievalState::Degraded => false,
            RetrievalState::Uninitialized | RetrievalState::Initializing => {
                lifecycle.state = RetrievalState::Initializing;

                match self.init_backends().await {
                    Ok(()) => {
                        lifecycle.state = RetrievalState::Ready;
                        info!("Retrieval engine initialized");
                        true
                    }
                    Err(e) => {
                        lifecycle.state = RetrievalState::Degraded;
                        warn!(
                            error = %e,
                            "Initialization failed, serving from fallback permanently"
                        );
                        false
                    }
                }
            }
        }
    }

    /// Construct backends (unless pre-wired) and probe store connectivity
    async fn init_backends(&self) -> Result<()> {
        let backends = self
            .backends
            .get_or_try_init(|| async {
                let embedder = create_embedder(&self.config.embedding)?;
                let store: Arc<dyn VectorSearch> =
                    Arc::new(QdrantStore::new(&self.config.vector_store)?);

                // A broken reranker disables that stage only; the vector
                // path stays up
                let reranker = match Reranker::from_config(&self.config.reranker) {
                    Ok(reranker) => reranker,
                    Err(e) => {
                        warn!(error = %e, "Reranker unavailable, serving merge order");
                        None
                    }
                };

                Ok::<_, passage_common::AppError>(Backends {
                    embedder,
                    store,
                    reranker,
                })
            })
            .await?;

        match &self.config.vector_store.collection {
            Some(collection) => {
                let count = backends.store.count(collection).await?;
                info!(collection = %collection, points = count, "Vector store reachable");
            }
            None => {
                let collections = backends.store.list_collections().await?;
                info!(collections = collections.len(), "Vector store reachable");
            }
        }

        Ok(())
    }

    /// The vector path: embed once, search every collection concurrently,
    /// merge most-recent-collection-first, then rerank or truncate.
    async fn vector_search(&self, query: &str) -> VectorOutcome {
        let backends = match self.backends.get() {
            Some(b) => b,
            None => return VectorOutcome::StoreUnavailable,
        };

        let collections = match &self.config.vector_store.collection {
            Some(collection) => vec![collection.clone()],
            None => match backends.store.list_collections().await {
                Ok(collections) => collections,
                Err(e) => {
                    warn!(error = %e, "Collection discovery failed");
                    return VectorOutcome::StoreUnavailable;
                }
            },
        };

        if collections.is_empty() {
            debug!("No collections in the vector store");
            return VectorOutcome::Empty;
        }

        let embed_start = Instant::now();
        let vector = match backends.embedder.embed(query).await {
            Ok(vector) => {
                metrics::record_embedding(
                    embed_start.elapsed().as_secs_f64(),
                    backends.embedder.model_name(),
                    true,
                );
                vector
            }
            Err(e) => {
                metrics::record_embedding(
                    embed_start.elapsed().as_secs_f64(),
                    backends.embedder.model_name(),
                    false,
                );
                warn!(error = %e, "Query embedding failed");
                return VectorOutcome::EmbedderUnavailable;
            }
        };

        let timeout = self.config.vector_store.search_timeout();
        let limit = self.config.vector_store.per_collection_limit;

        let searches = collections.iter().map(|collection| {
            let vector = &vector;
            async move {
                let outcome =
                    tokio::time::timeout(timeout, backends.store.search(collection, vector, limit))
                        .await;
                (collection, outcome)
            }
        });
        let results = join_all(searches).await;

        // Merge newest collection first; a failed collection is skipped,
        // never fatal
        let mut merged: Vec<Chunk> = Vec::new();
        let mut any_success = false;

        for (collection, outcome) in results.into_iter().rev() {
            match outcome {
                Ok(Ok(points)) => {
                    any_success = true;
                    metrics::record_collection_search(collection, true);
                    merged.extend(points.into_iter().map(|p| p.into_chunk(collection)));
                }
                Ok(Err(e)) => {
                    metrics::record_collection_search(collection, false);
                    warn!(collection = %collection, error = %e, "Collection search failed, skipping");
                }
                Err(_) => {
                    metrics::record_collection_search(collection, false);
                    warn!(
                        collection = %collection,
                        timeout_secs = timeout.as_secs(),
                        "Collection search timed out, skipping"
                    );
                }
            }
        }

        // Collections are generational; the same passage can live in more
        // than one. Keep the first (most recent) occurrence.
        let mut seen = std::collections::HashSet::new();
        merged.retain(|chunk| seen.insert((chunk.source_file.clone(), chunk.text.clone())));

        if merged.is_empty() {
            return if any_success {
                VectorOutcome::Empty
            } else {
                VectorOutcome::StoreUnavailable
            };
        }

        match &backends.reranker {
            Some(reranker) => {
                let rerank_start = Instant::now();
                match reranker.rerank(query, &merged).await {
                    Ok(ranked) => {
                        metrics::record_rerank(rerank_start.elapsed().as_secs_f64(), true);
                        VectorOutcome::Hits(ranked)
                    }
                    Err(e) => {
                        // Serve the pre-rerank merge order unmodified
                        metrics::record_rerank(rerank_start.elapsed().as_secs_f64(), false);
                        warn!(error = %e, "Rerank failed, keeping merge order");
                        VectorOutcome::Hits(merged)
                    }
                }
            }
            None => {
                merged.truncate(self.config.reranker.top_k);
                VectorOutcome::Hits(merged)
            }
        }
    }

    /// Search the lexical index, building it on first use
    async fn fallback_search(&self, query: &str, context: Option<&str>) -> Vec<Chunk> {
        let index = {
            let mut guard = self.fallback.lock().await;
            if guard.is_none() {
                match FallbackIndex::build(&self.config.fallback) {
                    Ok(index) => {
                        info!(windows = index.len(), "Fallback index built");
                        *guard = Some(Arc::new(index));
                    }
                    Err(e) => {
                        warn!(error = %e, "Fallback index build failed");
                        return Vec::new();
                    }
                }
            }
            guard.clone()
        };

        match index {
            Some(index) => index.search(query, context),
            None => Vec::new(),
        }
    }

    /// Cheap timestamp check on the query path; sweeps the cache when the
    /// reclamation interval has elapsed
    async fn maybe_reclaim(&self) {
        let due = {
            let mut lifecycle = self.lifecycle.lock().await;
            if lifecycle.last_reclaim.elapsed() >= self.config.lifecycle.reclaim_interval() {
                lifecycle.last_reclaim = Instant::now();
                true
            } else {
                false
            }
        };

        if due {
            self.cache.sweep().await;
            debug!("Reclamation pass completed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use passage_common::embeddings::MockEmbedder;
    use passage_common::errors::AppError;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::engine::rerank::RerankBackend;
    use crate::engine::store::ScoredPoint;

    struct StaticStore {
        collections: Vec<String>,
        hits: HashMap<String, Vec<ScoredPoint>>,
        failing: HashSet<String>,
        probes: AtomicUsize,
    }

    impl StaticStore {
        fn new(collections: &[&str]) -> Self {
            Self {
                collections: collections.iter().map(|c| c.to_string()).collect(),
                hits: HashMap::new(),
                failing: HashSet::new(),
                probes: AtomicUsize::new(0),
            }
        }

        fn with_hits(mut self, collection: &str, ids: &[&str]) -> Self {
            let points = ids
                .iter()
                .enumerate()
                .map(|(i, id)| {
                    serde_json::from_value(serde_json::json!({
                        "id": id,
                        "score": 0.9 - (i as f32) * 0.1,
                        "payload": {
                            "text": format!("passage {}", id),
                            "source_file": format!("{}.pdf", collection),
                            "page_number": 1
                        }
                    }))
                    .unwrap()
                })
                .collect();
            self.hits.insert(collection.to_string(), points);
            self
        }

        fn with_failing(mut self, collection: &str) -> Self {
            self.failing.insert(collection.to_string());
            self
        }
    }

    #[async_trait]
    impl VectorSearch for StaticStore {
        async fn list_collections(&self) -> passage_common::errors::Result<Vec<String>> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Ok(self.collections.clone())
        }

        async fn count(&self, collection: &str) -> passage_common::errors::Result<u64> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .hits
                .get(collection)
                .map(|points| points.len() as u64)
                .unwrap_or(0))
        }

        async fn search(
            &self,
            collection: &str,
            _vector: &[f32],
            limit: usize,
        ) -> passage_common::errors::Result<Vec<ScoredPoint>> {
            if self.failing.contains(collection) {
                return Err(AppError::CollectionSearch {
                    collection: collection.to_string(),
                    message: "connection refused".to_string(),
                });
            }
            let mut points = self.hits.get(collection).cloned().unwrap_or_default();
            points.truncate(limit);
            Ok(points)
        }
    }

    struct FailingProbeStore {
        probes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl VectorSearch for FailingProbeStore {
        async fn list_collections(&self) -> passage_common::errors::Result<Vec<String>> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Err(AppError::VectorStore {
                message: "store offline".to_string(),
            })
        }

        async fn count(&self, _collection: &str) -> passage_common::errors::Result<u64> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Err(AppError::VectorStore {
                message: "store offline".to_string(),
            })
        }

        async fn search(
            &self,
            _collection: &str,
            _vector: &[f32],
            _limit: usize,
        ) -> passage_common::errors::Result<Vec<ScoredPoint>> {
            Err(AppError::VectorStore {
                message: "store offline".to_string(),
            })
        }
    }

    struct OfflineReranker;

    #[async_trait]
    impl RerankBackend for OfflineReranker {
        async fn score(
            &self,
            _query: &str,
            _documents: &[String],
        ) -> passage_common::errors::Result<Vec<f32>> {
            Err(AppError::Rerank {
                message: "model offline".to_string(),
            })
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> passage_common::errors::Result<Vec<f32>> {
            Err(AppError::EmbeddingError {
                message: "provider offline".to_string(),
            })
        }

        async fn embed_batch(
            &self,
            _texts: &[String],
        ) -> passage_common::errors::Result<Vec<Vec<f32>>> {
            Err(AppError::EmbeddingError {
                message: "provider offline".to_string(),
            })
        }

        fn model_name(&self) -> &str {
            "failing"
        }

        fn dimension(&self) -> usize {
            8
        }
    }

    fn test_config() -> Arc<AppConfig> {
        let mut config = AppConfig::default();
        config.embedding.provider = "mock".to_string();
        config.embedding.dimension = 8;
        // Point the corpus at a directory that does not exist so fallback
        // results are empty unless a test injects documents
        config.fallback.corpus_dir = "/nonexistent-corpus".to_string();
        Arc::new(config)
    }

    fn engine_with(store: Arc<dyn VectorSearch>, config: Arc<AppConfig>) -> RetrievalEngine {
        RetrievalEngine::with_backends(
            config,
            Backends {
                embedder: Arc::new(MockEmbedder::new(8)),
                store,
                reranker: None,
            },
        )
    }

    #[tokio::test]
    async fn test_vector_path_serves_and_caches() {
        let store = Arc::new(StaticStore::new(&["docs"]).with_hits("docs", &["a", "b"]));
        let engine = engine_with(store, test_config());

        let first = engine.query("what is consent", None).await;
        assert_eq!(first.path, RetrievalPath::Vector);
        assert!(!first.cache_hit);
        assert!(first.fallback_reason.is_none());
        assert_eq!(first.chunks.len(), 2);
        assert_eq!(engine.state().await, RetrievalState::Ready);

        let second = engine.query("what is consent", None).await;
        assert!(second.cache_hit);
        assert_eq!(second.path, RetrievalPath::Vector);
        assert_eq!(second.chunks, first.chunks);
        assert_eq!(engine.cached_queries().await, 1);
    }

    #[tokio::test]
    async fn test_no_collections_serves_fallback() {
        let store = Arc::new(StaticStore::new(&[]));
        let engine = engine_with(store, test_config());

        let outcome = engine.query("anything", None).await;
        assert_eq!(outcome.path, RetrievalPath::Fallback);
        assert_eq!(outcome.fallback_reason, Some(FallbackReason::NoVectorResults));
        assert!(outcome.chunks.is_empty());
        // The vector store itself was reachable
        assert_eq!(engine.state().await, RetrievalState::Ready);
    }

    #[tokio::test]
    async fn test_one_failing_collection_is_skipped() {
        let store = Arc::new(
            StaticStore::new(&["old", "mid", "new"])
                .with_hits("old", &["o1"])
                .with_failing("mid")
                .with_hits("new", &["n1", "n2"]),
        );
        let engine = engine_with(store, test_config());

        let outcome = engine.query("q", None).await;
        assert_eq!(outcome.path, RetrievalPath::Vector);
        assert_eq!(outcome.chunks.len(), 3);

        // Most recent collection first, store order within a collection
        let ids: Vec<&str> = outcome.chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["n1", "n2", "o1"]);
        assert!(outcome
            .chunks
            .iter()
            .all(|c| c.collection_name != "mid"));
    }

    #[tokio::test]
    async fn test_duplicate_passages_keep_most_recent_collection() {
        let mut store = StaticStore::new(&["old", "new"]);
        let point = |id: &str| -> ScoredPoint {
            serde_json::from_value(serde_json::json!({
                "id": id,
                "score": 0.8,
                "payload": { "text": "shared passage", "source_file": "doc.pdf" }
            }))
            .unwrap()
        };
        store.hits.insert("old".to_string(), vec![point("o1")]);
        store.hits.insert("new".to_string(), vec![point("n1")]);
        let engine = engine_with(Arc::new(store), test_config());

        let outcome = engine.query("q", None).await;
        assert_eq!(outcome.chunks.len(), 1);
        assert_eq!(outcome.chunks[0].collection_name, "new");
    }

    #[tokio::test]
    async fn test_failed_init_is_permanently_degraded() {
        let probes = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(FailingProbeStore {
            probes: probes.clone(),
        });
        let engine = engine_with(store, test_config());

        let first = engine.query("q", None).await;
        assert_eq!(first.path, RetrievalPath::Fallback);
        assert_eq!(first.fallback_reason, Some(FallbackReason::Degraded));
        assert_eq!(engine.state().await, RetrievalState::Degraded);
        assert_eq!(probes.load(Ordering::SeqCst), 1);

        // A later query must not retry initialization
        let second = engine.query("another q", None).await;
        assert_eq!(second.fallback_reason, Some(FallbackReason::Degraded));
        assert_eq!(probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_embedder_failure_falls_back_per_call() {
        let store = Arc::new(StaticStore::new(&["docs"]).with_hits("docs", &["a"]));
        let config = test_config();
        let engine = RetrievalEngine::with_backends(
            config,
            Backends {
                embedder: Arc::new(FailingEmbedder),
                store,
                reranker: None,
            },
        );

        let outcome = engine.query("q", None).await;
        assert_eq!(outcome.path, RetrievalPath::Fallback);
        assert_eq!(
            outcome.fallback_reason,
            Some(FallbackReason::EmbedderUnavailable)
        );
        // Initialization itself succeeded; the failure is per-call
        assert_eq!(engine.state().await, RetrievalState::Ready);
    }

    #[tokio::test]
    async fn test_merge_truncates_to_top_k_without_reranker() {
        let ids: Vec<String> = (0..5).map(|i| format!("p{}", i)).collect();
        let id_refs: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();

        let store = Arc::new(
            StaticStore::new(&["a", "b", "c"])
                .with_hits("a", &id_refs)
                .with_hits("b", &id_refs)
                .with_hits("c", &id_refs),
        );
        let engine = engine_with(store, test_config());

        // 15 merged candidates, top_k defaults to 10
        let outcome = engine.query("q", None).await;
        assert_eq!(outcome.chunks.len(), 10);
        // Truncation keeps the head of the merge: all of c and b, none of a
        assert!(outcome.chunks.iter().all(|c| c.collection_name != "a"));
    }

    #[tokio::test]
    async fn test_rerank_failure_serves_merge_order() {
        let store = Arc::new(
            StaticStore::new(&["old", "new"])
                .with_hits("old", &["o1"])
                .with_hits("new", &["n1", "n2"]),
        );
        let reranker = Reranker::new(Arc::new(OfflineReranker), 10, Duration::from_secs(5));
        let engine = RetrievalEngine::with_backends(
            test_config(),
            Backends {
                embedder: Arc::new(MockEmbedder::new(8)),
                store,
                reranker: Some(reranker),
            },
        );

        let outcome = engine.query("q", None).await;

        // The query still succeeds on the vector path with the pre-rerank
        // merge order, unscored and untruncated
        assert_eq!(outcome.path, RetrievalPath::Vector);
        assert!(outcome.fallback_reason.is_none());
        let ids: Vec<&str> = outcome.chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["n1", "n2", "o1"]);
        assert!(outcome.chunks.iter().all(|c| c.rerank_score.is_none()));
    }

    #[tokio::test]
    async fn test_cache_expiry_reruns_retrieval() {
        let store = Arc::new(StaticStore::new(&["docs"]).with_hits("docs", &["a"]));
        let mut config = AppConfig::default();
        config.embedding.provider = "mock".to_string();
        config.embedding.dimension = 8;
        config.fallback.corpus_dir = "/nonexistent-corpus".to_string();
        config.cache.ttl_secs = 1;
        let engine = engine_with(store, Arc::new(config));

        let first = engine.query("q", None).await;
        assert!(!first.cache_hit);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let second = engine.query("q", None).await;
        assert!(!second.cache_hit);
        assert_eq!(second.path, RetrievalPath::Vector);
    }
}
