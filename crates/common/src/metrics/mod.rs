//! Metrics helpers
//!
//! Registers metric descriptions and offers `record_*` helpers so the
//! engine code never touches label plumbing directly. The Prometheus
//! exporter itself is installed by the service binary.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

/// Prefix for every metric this workspace emits
pub const METRICS_PREFIX: &str = "passage";

/// Histogram buckets for retrieval latency, in seconds. Cache hits land in
/// the first few; a full vector + rerank pass in the middle.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_retrieval_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Retrieval queries, labeled by serving path"
    );

    describe_histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end retrieval latency"
    );

    describe_gauge!(
        format!("{}_retrieval_results_count", METRICS_PREFIX),
        Unit::Count,
        "Chunks returned by the most recent query"
    );

    describe_counter!(
        format!("{}_collection_searches_total", METRICS_PREFIX),
        Unit::Count,
        "Per-collection vector searches, labeled by outcome"
    );

    describe_counter!(
        format!("{}_rerank_calls_total", METRICS_PREFIX),
        Unit::Count,
        "Cross-encoder rerank calls, labeled by outcome"
    );

    describe_histogram!(
        format!("{}_rerank_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Rerank call latency"
    );

    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Embedding requests, labeled by model and outcome"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency"
    );

    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Result cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Result cache misses"
    );

    tracing::info!("Metrics registered");
}

/// Record a served query; `path` is "vector", "fallback", or "cache"
pub fn record_retrieval(duration_secs: f64, path: &str, result_count: usize) {
    counter!(
        format!("{}_retrieval_queries_total", METRICS_PREFIX),
        "path" => path.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        "path" => path.to_string()
    )
    .record(duration_secs);

    gauge!(
        format!("{}_retrieval_results_count", METRICS_PREFIX),
        "path" => path.to_string()
    )
    .set(result_count as f64);
}

/// Record one per-collection search outcome
pub fn record_collection_search(collection: &str, success: bool) {
    counter!(
        format!("{}_collection_searches_total", METRICS_PREFIX),
        "collection" => collection.to_string(),
        "status" => if success { "success" } else { "error" }
    )
    .increment(1);
}

/// Record a rerank call outcome
pub fn record_rerank(duration_secs: f64, success: bool) {
    counter!(
        format!("{}_rerank_calls_total", METRICS_PREFIX),
        "status" => if success { "success" } else { "error" }
    )
    .increment(1);

    if success {
        histogram!(format!("{}_rerank_duration_seconds", METRICS_PREFIX)).record(duration_secs);
    }
}

/// Record an embedding request outcome
pub fn record_embedding(duration_secs: f64, model: &str, success: bool) {
    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => if success { "success" } else { "error" }
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    }
}

/// Record a cache lookup
pub fn record_cache(hit: bool, cache_name: &str) {
    let name = if hit {
        format!("{}_cache_hits_total", METRICS_PREFIX)
    } else {
        format!("{}_cache_misses_total", METRICS_PREFIX)
    };

    counter!(name, "cache" => cache_name.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets_are_sorted() {
        let mut prev = 0.0;
        for &bucket in LATENCY_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
    }

    #[test]
    fn test_recording_without_exporter_is_a_no_op() {
        // Helpers must be callable before any recorder is installed
        record_retrieval(0.01, "vector", 5);
        record_collection_search("docs", true);
        record_rerank(0.2, false);
        record_embedding(0.1, "mock-embedding", true);
        record_cache(true, "results");
    }
}
