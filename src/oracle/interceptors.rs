//! Wrappers composed around an [`Analyzer`]: result caching and request
//! monitoring. Both implement `Analyzer` themselves, so the service stacks
//! them as `MonitoringAnalyzer<CachingAnalyzer<SignalFusionScorer>>`.

use crate::oracle::cache::{fingerprint, CacheManager};
use crate::oracle::performance_monitor::PerformanceMonitor;
use crate::oracle::scorer::Analyzer;
use crate::types::{AnalysisResult, FallbackReason, Provenance};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Analysis kind folded into every content fingerprint.
pub const CONTENT_ANALYSIS: &str = "content_analysis";

/// Cache key for one `(content, url)` analysis.
pub fn analysis_key(content: &str, url: &str) -> String {
    fingerprint(content, CONTENT_ANALYSIS, &[("url", url)])
}

/// Serves repeat analyses from the cache.
///
/// Only AI-fused and short-circuit results are stored; fallbacks caused by a
/// failing collaborator are retried on the next request.
pub struct CachingAnalyzer<A> {
    inner: A,
    cache: Arc<CacheManager<AnalysisResult>>,
}

impl<A> CachingAnalyzer<A> {
    pub fn new(inner: A, cache: Arc<CacheManager<AnalysisResult>>) -> Self {
        Self { inner, cache }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }
}

fn is_cacheable(result: &AnalysisResult) -> bool {
    match result.provenance {
        Provenance::AiFused => true,
        Provenance::Fallback => result.fallback_reason == Some(FallbackReason::ShortCircuit),
        Provenance::CacheHit => false,
    }
}

#[async_trait]
impl<A: Analyzer> Analyzer for CachingAnalyzer<A> {
    async fn analyze(&self, content: &str, url: &str) -> AnalysisResult {
        let key = analysis_key(content, url);

        if let Some(hit) = self.cache.get(&key).await {
            debug!("Analysis cache hit {}", &key[..12]);
            return hit.as_cache_hit();
        }

        let result = self.inner.analyze(content, url).await;
        if is_cacheable(&result) {
            self.cache.set(&key, result.clone(), None).await;
        }
        result
    }
}

/// Records one performance sample per analysis.
pub struct MonitoringAnalyzer<A> {
    inner: A,
    monitor: Arc<PerformanceMonitor>,
}

impl<A> MonitoringAnalyzer<A> {
    pub fn new(inner: A, monitor: Arc<PerformanceMonitor>) -> Self {
        Self { inner, monitor }
    }
}

#[async_trait]
impl<A: Analyzer> Analyzer for MonitoringAnalyzer<A> {
    async fn analyze(&self, content: &str, url: &str) -> AnalysisResult {
        let started = Instant::now();
        let result = self.inner.analyze(content, url).await;

        let errored = matches!(
            result.fallback_reason,
            Some(
                FallbackReason::CollaboratorFailure
                    | FallbackReason::Timeout
                    | FallbackReason::CircuitOpen
            )
        );
        self.monitor
            .record_request(
                started.elapsed(),
                result.provenance == Provenance::CacheHit,
                result.provenance == Provenance::AiFused,
                result.provenance == Provenance::Fallback,
                errored,
            )
            .await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::heuristics::Heuristics;
    use crate::oracle::storage::SqliteCacheStore;
    use crate::types::{now_millis, DomainSignals, PatternSignals};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingAnalyzer {
        calls: AtomicUsize,
        reason: Option<FallbackReason>,
    }

    #[async_trait]
    impl Analyzer for CountingAnalyzer {
        async fn analyze(&self, content: &str, url: &str) -> AnalysisResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reason {
                Some(reason) => Heuristics::new().fallback(content, url, reason),
                None => AnalysisResult {
                    credibility_score: 70.0,
                    risk_index: 20.0,
                    confidence: 0.8,
                    reasoning: vec!["ok".to_string()],
                    risk_factors: Vec::new(),
                    pattern_signals: PatternSignals::default(),
                    domain_signals: DomainSignals::default(),
                    provenance: Provenance::AiFused,
                    fallback_reason: None,
                    produced_at: now_millis(),
                },
            }
        }
    }

    fn counting(reason: Option<FallbackReason>) -> CountingAnalyzer {
        CountingAnalyzer {
            calls: AtomicUsize::new(0),
            reason,
        }
    }

    async fn cache() -> Arc<CacheManager<AnalysisResult>> {
        let store = SqliteCacheStore::open_in_memory().await.unwrap();
        Arc::new(CacheManager::new(store, Duration::from_secs(60)))
    }

    #[test]
    fn test_key_depends_on_url() {
        assert_eq!(analysis_key("a", "u"), analysis_key("a", "u"));
        assert_ne!(analysis_key("a", "u"), analysis_key("a", "v"));
    }

    #[tokio::test]
    async fn test_second_call_is_cache_hit() {
        let analyzer = CachingAnalyzer::new(counting(None), cache().await);

        let first = analyzer.analyze("content", "https://example.org").await;
        let second = analyzer.analyze("content", "https://example.org").await;

        assert_eq!(first.provenance, Provenance::AiFused);
        assert_eq!(second.provenance, Provenance::CacheHit);
        assert_eq!(second.credibility_score, first.credibility_score);
        assert_eq!(analyzer.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_collaborator_fallbacks_are_not_cached() {
        let analyzer = CachingAnalyzer::new(
            counting(Some(FallbackReason::CollaboratorFailure)),
            cache().await,
        );
        analyzer.analyze("content", "").await;
        analyzer.analyze("content", "").await;
        assert_eq!(analyzer.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_short_circuits_are_cached() {
        let analyzer =
            CachingAnalyzer::new(counting(Some(FallbackReason::ShortCircuit)), cache().await);
        analyzer.analyze("content", "").await;
        let second = analyzer.analyze("content", "").await;
        assert_eq!(second.provenance, Provenance::CacheHit);
        assert_eq!(analyzer.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_monitor_records_provenance() {
        let monitor = Arc::new(PerformanceMonitor::new(100, Duration::from_secs(5)));
        let analyzer = MonitoringAnalyzer::new(
            CachingAnalyzer::new(counting(None), cache().await),
            monitor.clone(),
        );

        analyzer.analyze("content", "").await;
        analyzer.analyze("content", "").await;

        let metrics = monitor.get_metrics().await;
        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.cache_hit_rate, 50.0);
        assert_eq!(metrics.ai_usage_rate, 50.0);
        assert_eq!(metrics.error_rate, 0.0);
    }

    #[tokio::test]
    async fn test_monitor_counts_failures_as_errors() {
        let monitor = Arc::new(PerformanceMonitor::new(100, Duration::from_secs(5)));
        let analyzer = MonitoringAnalyzer::new(
            counting(Some(FallbackReason::Timeout)),
            monitor.clone(),
        );
        analyzer.analyze("content", "").await;

        let metrics = monitor.get_metrics().await;
        assert_eq!(metrics.fallback_rate, 100.0);
        assert_eq!(metrics.error_rate, 100.0);
    }
}
