//! Configuration management for the Passage services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Vector store (Qdrant) configuration
    pub vector_store: VectorStoreConfig,

    /// Embedding service configuration
    pub embedding: EmbeddingConfig,

    /// Cross-encoder reranker configuration
    pub reranker: RerankerConfig,

    /// Query result cache configuration
    pub cache: CacheConfig,

    /// Fallback lexical index configuration
    pub fallback: FallbackConfig,

    /// Lifecycle / reclamation configuration
    pub lifecycle: LifecycleConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorStoreConfig {
    /// Qdrant base URL
    #[serde(default = "default_vector_store_url")]
    pub url: String,

    /// Optional API key
    pub api_key: Option<String>,

    /// Search only this collection; when unset, every collection in the
    /// store is discovered and searched
    pub collection: Option<String>,

    /// Nearest neighbors requested per collection
    #[serde(default = "default_per_collection_limit")]
    pub per_collection_limit: usize,

    /// Timeout for a single collection search in seconds
    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for the embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RerankerConfig {
    /// Enable the cross-encoder rerank stage. Resolved once at engine
    /// construction; when disabled the merge order is served as-is.
    #[serde(default)]
    pub enabled: bool,

    /// Scoring endpoint base URL
    pub url: Option<String>,

    /// Model identifier passed to the scoring endpoint
    #[serde(default = "default_reranker_model")]
    pub model: String,

    /// Results kept after reranking (also the no-reranker truncation)
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Timeout for a rerank call in seconds
    #[serde(default = "default_rerank_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Entry time-to-live in seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// Minimum interval between lazy eviction sweeps in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FallbackConfig {
    /// Directory of local source files for the lexical index
    #[serde(default = "default_corpus_dir")]
    pub corpus_dir: String,

    /// Window size in characters
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Overlap between consecutive windows in characters
    #[serde(default = "default_window_overlap")]
    pub window_overlap: usize,

    /// Windows returned per query
    #[serde(default = "default_fallback_top_k")]
    pub top_k: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            corpus_dir: default_corpus_dir(),
            window_size: default_window_size(),
            window_overlap: default_window_overlap(),
            top_k: default_fallback_top_k(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LifecycleConfig {
    /// Minimum interval between memory reclamation passes in seconds
    #[serde(default = "default_reclaim_interval")]
    pub reclaim_interval_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            reclaim_interval_secs: default_reclaim_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_vector_store_url() -> String { "http://localhost:6333".to_string() }
fn default_per_collection_limit() -> usize { 5 }
fn default_search_timeout() -> u64 { 10 }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { 1536 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_reranker_model() -> String { "cross-encoder/ms-marco-MiniLM-L-6-v2".to_string() }
fn default_top_k() -> usize { 10 }
fn default_rerank_timeout() -> u64 { 5 }
fn default_cache_ttl() -> u64 { 3600 }
fn default_sweep_interval() -> u64 { 300 }
fn default_corpus_dir() -> String { "knowledge".to_string() }
fn default_window_size() -> usize { 900 }
fn default_window_overlap() -> usize { 200 }
fn default_fallback_top_k() -> usize { 5 }
fn default_reclaim_interval() -> u64 { 300 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "passage".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__VECTOR_STORE__URL=http://qdrant:6333
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl VectorStoreConfig {
    /// Get per-collection search timeout as Duration
    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }
}

impl RerankerConfig {
    /// Get rerank call timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl LifecycleConfig {
    /// Get reclamation interval as Duration
    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs)
    }
}

impl CacheConfig {
    /// Get entry TTL as Duration
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Get sweep interval as Duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                request_timeout_secs: default_request_timeout(),
                shutdown_timeout_secs: default_shutdown_timeout(),
            },
            vector_store: VectorStoreConfig {
                url: default_vector_store_url(),
                api_key: None,
                collection: None,
                per_collection_limit: default_per_collection_limit(),
                search_timeout_secs: default_search_timeout(),
            },
            embedding: EmbeddingConfig {
                provider: default_embedding_provider(),
                api_key: None,
                api_base: None,
                model: default_embedding_model(),
                dimension: default_embedding_dimension(),
                timeout_secs: default_embedding_timeout(),
                max_retries: default_embedding_retries(),
            },
            reranker: RerankerConfig {
                enabled: false,
                url: None,
                model: default_reranker_model(),
                top_k: default_top_k(),
                timeout_secs: default_rerank_timeout(),
            },
            cache: CacheConfig::default(),
            fallback: FallbackConfig::default(),
            lifecycle: LifecycleConfig::default(),
            observability: ObservabilityConfig {
                log_level: default_log_level(),
                json_logging: default_json_logging(),
                metrics_port: default_metrics_port(),
                service_name: default_service_name(),
            },
        }
    }
}
