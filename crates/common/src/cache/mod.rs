//! In-process query result cache
//!
//! Provides:
//! - TTL-bounded entries keyed by a digest of query + context
//! - Lazy eviction sweeps bounded to once per configured interval
//! - Internal synchronization for concurrent request handlers
//!
//! Entries older than the TTL are never returned; they are dropped on
//! lookup or during a sweep. There is no background timer - the sweep
//! piggybacks on the access path, trading slight memory overshoot for
//! simplicity.

use crate::config::CacheConfig;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::debug;

/// Derive the cache key for a query + optional context.
///
/// Order- and case-sensitive: the digest covers the trimmed query followed
/// by the trimmed context.
pub fn cache_key(query: &str, context: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.trim().as_bytes());
    if let Some(ctx) = context {
        hasher.update(ctx.trim().as_bytes());
    }
    hex::encode(hasher.finalize())
}

struct CacheEntry<V> {
    stored_at: Instant,
    value: V,
}

struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    last_sweep: Instant,
}

/// TTL-bounded in-process cache for query results
pub struct ResultCache<V> {
    config: CacheConfig,
    inner: Mutex<CacheInner<V>>,
}

impl<V: Clone> ResultCache<V> {
    /// Create a new cache
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Look up a cached value for a query + context.
    ///
    /// Returns `None` on miss or when the entry has outlived its TTL
    /// (the stale entry is dropped in that case).
    pub async fn get(&self, query: &str, context: Option<&str>) -> Option<V> {
        let key = cache_key(query, context);
        let mut inner = self.inner.lock().await;
        self.maybe_sweep(&mut inner);

        match inner.entries.get(&key) {
            Some(entry) if entry.stored_at.elapsed() <= self.config.ttl() => {
                debug!(key = %key, "Result cache hit");
                crate::metrics::record_cache(true, "results");
                Some(entry.value.clone())
            }
            Some(_) => {
                inner.entries.remove(&key);
                debug!(key = %key, "Result cache entry expired");
                crate::metrics::record_cache(false, "results");
                None
            }
            None => {
                debug!(key = %key, "Result cache miss");
                crate::metrics::record_cache(false, "results");
                None
            }
        }
    }

    /// Store a value for a query + context
    pub async fn put(&self, query: &str, context: Option<&str>, value: V) {
        let key = cache_key(query, context);
        let mut inner = self.inner.lock().await;
        self.maybe_sweep(&mut inner);

        inner.entries.insert(
            key,
            CacheEntry {
                stored_at: Instant::now(),
                value,
            },
        );
    }

    /// Force an eviction sweep regardless of the sweep interval
    pub async fn sweep(&self) {
        let mut inner = self.inner.lock().await;
        self.sweep_locked(&mut inner);
    }

    /// Number of entries currently held (stale entries included until swept)
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    /// Whether the cache holds no entries
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every entry
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
        inner.last_sweep = Instant::now();
    }

    fn maybe_sweep(&self, inner: &mut CacheInner<V>) {
        if inner.last_sweep.elapsed() >= self.config.sweep_interval() {
            self.sweep_locked(inner);
        }
    }

    fn sweep_locked(&self, inner: &mut CacheInner<V>) {
        let ttl = self.config.ttl();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.stored_at.elapsed() <= ttl);
        let evicted = before - inner.entries.len();
        inner.last_sweep = Instant::now();

        if evicted > 0 {
            debug!(evicted, remaining = inner.entries.len(), "Result cache sweep");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cache_with(ttl_secs: u64, sweep_interval_secs: u64) -> ResultCache<Vec<String>> {
        ResultCache::new(CacheConfig {
            ttl_secs,
            sweep_interval_secs,
        })
    }

    #[test]
    fn test_key_is_order_sensitive() {
        let a = cache_key("alpha", Some("beta"));
        let b = cache_key("beta", Some("alpha"));
        assert_ne!(a, b);

        // Trimming is part of normalization
        assert_eq!(cache_key("  alpha  ", None), cache_key("alpha", None));
    }

    #[tokio::test]
    async fn test_hit_within_ttl() {
        let cache = cache_with(3600, 300);
        cache.put("q", None, vec!["chunk".to_string()]).await;

        let first = cache.get("q", None).await;
        let second = cache.get("q", None).await;
        assert_eq!(first, second);
        assert_eq!(first.unwrap(), vec!["chunk".to_string()]);
    }

    #[tokio::test]
    async fn test_context_differentiates_entries() {
        let cache = cache_with(3600, 300);
        cache.put("q", Some("ctx-a"), vec!["a".to_string()]).await;
        cache.put("q", Some("ctx-b"), vec!["b".to_string()]).await;

        assert_eq!(cache.get("q", Some("ctx-a")).await.unwrap(), vec!["a".to_string()]);
        assert_eq!(cache.get("q", Some("ctx-b")).await.unwrap(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_ttl_expiry_registers_miss() {
        let cache = cache_with(1, 300);
        cache.put("q", None, vec!["stale".to_string()]).await;

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(cache.get("q", None).await.is_none());
    }

    #[tokio::test]
    async fn test_forced_sweep_drops_stale_entries() {
        let cache = cache_with(0, 3600);
        cache.put("q1", None, vec![]).await;
        cache.put("q2", None, vec![]).await;

        // TTL of zero: everything is stale by the time we sweep
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.sweep().await;
        assert!(cache.is_empty().await);
    }
}
