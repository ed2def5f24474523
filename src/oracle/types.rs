//! Configuration and report types for the Oracle system.

use crate::types::MarketId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Oracle configuration covering the cache, scheduler, scorer and background tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// SQLite file backing the disk cache tier
    pub cache_db_path: PathBuf,
    /// TTL applied to cached analysis results, in seconds
    pub analysis_cache_ttl_seconds: u64,
    /// Requests per scheduler sub-batch; reaching it triggers a flush
    pub batch_size: usize,
    /// Bound on concurrently running sub-batches and fast-track requests
    pub worker_count: usize,
    /// Per-request bound on fast-track scoring, in milliseconds
    pub fast_track_timeout_ms: u64,
    /// Bound on one AI judgment call, in milliseconds
    pub ai_timeout_ms: u64,
    /// Bound on one sentiment judgment call, in milliseconds
    pub sentiment_timeout_ms: u64,
    /// Bound on one feed fetch, in milliseconds
    pub feed_timeout_ms: u64,
    /// Feed retry attempts
    pub feed_retry_attempts: usize,
    /// Period of the full-market analysis task, in seconds
    pub analysis_interval_seconds: u64,
    /// Period of the resource sampler, in seconds
    pub sampler_interval_seconds: u64,
    /// Capacity of the performance sample window
    pub monitor_window: usize,
    /// AI collaborator calls per second
    pub rate_limit_requests_per_second: u32,
    /// Consecutive failures before a collaborator cools down
    pub circuit_breaker_failure_threshold: u32,
    /// Cooldown length in seconds
    pub circuit_breaker_cooldown_seconds: u64,
    /// Attempts kept for a collaborator's success rate
    pub circuit_breaker_sample_size: usize,
    /// OpenAI API key; no key means the AI judge is not configured
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    /// Optional custom market feed
    pub market_feed_url: Option<String>,
    /// Optional custom comment feed
    pub comment_feed_url: Option<String>,
    /// Pinata JWT; no token means metadata is not published
    pub pinata_jwt: Option<String>,
}

impl OracleConfig {
    /// Load configuration from the environment (and `.env` if present).
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let mut config = Self::default();

        config.openai_api_key = env_string("OPENAI_API_KEY");
        if let Some(model) = env_string("OPENAI_MODEL") {
            config.openai_model = model;
        }
        config.market_feed_url = env_string("MARKET_FEED_URL");
        config.comment_feed_url = env_string("COMMENT_FEED_URL");
        config.pinata_jwt = env_string("PINATA_JWT");
        if let Some(path) = env_string("TRUTHLENS_CACHE_DB") {
            config.cache_db_path = PathBuf::from(path);
        }
        if let Some(size) = env_parse("TRUTHLENS_BATCH_SIZE") {
            config.batch_size = size;
        }
        if let Some(workers) = env_parse("TRUTHLENS_WORKERS") {
            config.worker_count = workers;
        }
        if let Some(interval) = env_parse("TRUTHLENS_ANALYSIS_INTERVAL_SECS") {
            config.analysis_interval_seconds = interval;
        }
        config
    }

    pub fn analysis_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.analysis_cache_ttl_seconds)
    }

    pub fn fast_track_timeout(&self) -> Duration {
        Duration::from_millis(self.fast_track_timeout_ms)
    }

    pub fn ai_timeout(&self) -> Duration {
        Duration::from_millis(self.ai_timeout_ms)
    }

    pub fn sentiment_timeout(&self) -> Duration {
        Duration::from_millis(self.sentiment_timeout_ms)
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_millis(self.feed_timeout_ms)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|v| v.parse().ok())
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            cache_db_path: PathBuf::from("./truthlens_cache.db"),
            analysis_cache_ttl_seconds: 1800,
            batch_size: 5,
            worker_count: 2,
            fast_track_timeout_ms: 5_000,
            ai_timeout_ms: 10_000,
            sentiment_timeout_ms: 10_000,
            feed_timeout_ms: 10_000,
            feed_retry_attempts: 3,
            analysis_interval_seconds: 3600,
            sampler_interval_seconds: 5,
            monitor_window: 100,
            rate_limit_requests_per_second: 5,
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_cooldown_seconds: 60,
            circuit_breaker_sample_size: 50,
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            market_feed_url: None,
            comment_feed_url: None,
            pinata_jwt: None,
        }
    }
}

/// Credibility score of one linked source inside a market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkScore {
    pub url: String,
    /// Combined content/domain credibility (0-100)
    pub score: f64,
    /// Mean of content and domain confidence (0-1)
    pub confidence: f64,
}

/// Latest analysis of one market, overwritten on every pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketReport {
    pub market_id: MarketId,
    /// Aggregate credibility (0-100)
    pub credibility_score: u8,
    /// Aggregate risk (0-100)
    pub risk_index: u8,
    /// Confidence (0-1)
    pub confidence: f64,
    pub links: Vec<LinkScore>,
    pub credibility_reasons: Vec<String>,
    pub risk_reasons: Vec<String>,
    pub metadata_uri: Option<String>,
    pub transaction_id: Option<String>,
    /// Unix milliseconds
    pub produced_at: u64,
}

impl MarketReport {
    pub fn links_analyzed(&self) -> usize {
        self.links.len()
    }

    pub fn is_attested(&self) -> bool {
        self.transaction_id.is_some()
    }
}

/// Aggregate oracle status, replaced wholesale after each full pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OracleStatus {
    pub total_markets: usize,
    pub total_attestations: usize,
    /// Unix milliseconds of the last committed pass, 0 if none
    pub last_update: u64,
    /// Number of committed passes
    pub passes_completed: u64,
}
