//! Oracle module - the TruthLens analysis pipeline.
//!
//! Content flows through the batch scheduler (or the fast-track path) into the
//! signal fusion scorer, which consults the two-tier cache first and falls
//! back to heuristics whenever the AI collaborator cannot answer. Per-market
//! reports land in the oracle state store; the performance monitor observes
//! every request.

pub mod types;
pub mod storage;
pub mod cache;
pub mod heuristics;
pub mod circuit_breaker;
pub mod rate_limit;
pub mod ai_judge;
pub mod data_sources;
pub mod attestation;
pub mod scorer;
pub mod interceptors;
pub mod credibility;
pub mod risk;
pub mod batch;
pub mod state;
pub mod performance_monitor;
pub mod service;

// Re-export main public types and the service
pub use service::{Collaborators, OracleService};
pub use types::{LinkScore, MarketReport, OracleConfig, OracleStatus};

// Re-export key components for advanced usage
pub use batch::{BatchScheduler, QueueStatus, ScheduledResult};
pub use cache::{fingerprint, CacheManager};
pub use circuit_breaker::{CircuitBreaker, CollaboratorState};
pub use heuristics::Heuristics;
pub use interceptors::{CachingAnalyzer, MonitoringAnalyzer};
pub use performance_monitor::{PerformanceMetrics, PerformanceMonitor, PerformanceStatus};
pub use risk::{RiskAssessment, RiskScorer};
pub use scorer::{Analyzer, SignalFusionScorer};
pub use state::OracleStateStore;
pub use storage::{CacheStore, SqliteCacheStore};

use std::sync::Arc;

/// Oracle builder for convenient construction with sensible defaults.
pub struct OracleBuilder {
    config: OracleConfig,
    collaborators: Option<Collaborators>,
    store: Option<Arc<dyn CacheStore>>,
}

impl OracleBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: OracleConfig::default(),
            collaborators: None,
            store: None,
        }
    }

    /// Start from an existing configuration, e.g. [`OracleConfig::from_env`].
    pub fn from_config(config: OracleConfig) -> Self {
        Self {
            config,
            ..Self::new()
        }
    }

    pub fn with_cache_db_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.config.cache_db_path = path.into();
        self
    }

    /// Set the analysis cache TTL.
    pub fn with_cache_ttl(mut self, ttl_seconds: u64) -> Self {
        self.config.analysis_cache_ttl_seconds = ttl_seconds;
        self
    }

    /// Set the scheduler sub-batch size and worker pool size.
    pub fn with_batching(mut self, batch_size: usize, worker_count: usize) -> Self {
        self.config.batch_size = batch_size;
        self.config.worker_count = worker_count;
        self
    }

    pub fn with_fast_track_timeout(mut self, timeout_ms: u64) -> Self {
        self.config.fast_track_timeout_ms = timeout_ms;
        self
    }

    pub fn with_ai_timeout(mut self, timeout_ms: u64) -> Self {
        self.config.ai_timeout_ms = timeout_ms;
        self
    }

    pub fn with_rate_limit(mut self, requests_per_second: u32) -> Self {
        self.config.rate_limit_requests_per_second = requests_per_second;
        self
    }

    pub fn with_circuit_breaker(mut self, failure_threshold: u32, cooldown_seconds: u64) -> Self {
        self.config.circuit_breaker_failure_threshold = failure_threshold;
        self.config.circuit_breaker_cooldown_seconds = cooldown_seconds;
        self
    }

    /// Period of the full-market analysis task.
    pub fn with_analysis_interval(mut self, interval_seconds: u64) -> Self {
        self.config.analysis_interval_seconds = interval_seconds;
        self
    }

    pub fn with_monitor_window(mut self, capacity: usize) -> Self {
        self.config.monitor_window = capacity;
        self
    }

    pub fn with_openai_key(mut self, api_key: impl Into<String>) -> Self {
        self.config.openai_api_key = Some(api_key.into());
        self
    }

    /// Use these collaborators instead of building them from the configuration.
    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = Some(collaborators);
        self
    }

    /// Use an already opened cache store instead of `cache_db_path`.
    pub fn with_cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the oracle configuration.
    pub fn build_config(self) -> OracleConfig {
        self.config
    }

    /// Build the service.
    pub async fn build(self) -> anyhow::Result<OracleService> {
        let collaborators = match self.collaborators {
            Some(collaborators) => collaborators,
            None => Collaborators::from_config(&self.config)?,
        };
        match self.store {
            Some(store) => Ok(OracleService::with_store(self.config, collaborators, store)),
            None => OracleService::new(self.config, collaborators).await,
        }
    }
}

impl Default for OracleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oracle_builder() {
        let config = OracleBuilder::new()
            .with_cache_ttl(600)
            .with_batching(10, 4)
            .with_rate_limit(50)
            .with_circuit_breaker(3, 30)
            .build_config();

        assert_eq!(config.analysis_cache_ttl_seconds, 600);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.rate_limit_requests_per_second, 50);
        assert_eq!(config.circuit_breaker_failure_threshold, 3);
        assert_eq!(config.circuit_breaker_cooldown_seconds, 30);
    }

    #[test]
    fn test_oracle_builder_defaults() {
        let config = OracleBuilder::new().build_config();

        assert_eq!(config.batch_size, 5);
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.fast_track_timeout_ms, 5_000);
        assert_eq!(config.ai_timeout_ms, 10_000);
        assert_eq!(config.analysis_cache_ttl_seconds, 1800);
        assert_eq!(config.monitor_window, 100);
        assert_eq!(config.analysis_interval_seconds, 3600);
        assert_eq!(config.sampler_interval_seconds, 5);
    }

    #[tokio::test]
    async fn test_build_without_key_uses_static_feeds() {
        let store = SqliteCacheStore::open_in_memory().await.unwrap();
        let service = OracleBuilder::new()
            .with_cache_store(store)
            .build()
            .await
            .unwrap();

        let status = service.scheduler().status().await;
        assert_eq!(status.batch_size, 5);
        assert_eq!(status.worker_count, 2);
        assert_eq!(status.queue_length, 0);
    }
}
