//! Tests for the analysis pipeline end to end

mod common;

use common::{collaborators, MockJudge};
use std::sync::Arc;
use std::time::{Duration, Instant};
use truthlens_oracle::oracle::{OracleBuilder, OracleService, SqliteCacheStore};
use truthlens_oracle::types::{AnalysisRequest, FallbackReason, Priority, Provenance};

const NEUTRAL: &str = "The central bank kept its policy rate unchanged at the quarterly meeting today";

async fn service(judge: Arc<MockJudge>, builder: OracleBuilder) -> OracleService {
    let store = SqliteCacheStore::open_in_memory()
        .await
        .expect("Failed to open in-memory cache");
    builder
        .with_cache_store(store)
        .with_collaborators(collaborators(judge))
        .build()
        .await
        .expect("Failed to build oracle service")
}

#[tokio::test]
async fn test_failing_ai_falls_back_within_bounds() {
    let judge = MockJudge::failing();
    let service = service(judge.clone(), OracleBuilder::new()).await;

    let result = service.analyze(NEUTRAL, "https://example.org/story").await;

    assert_eq!(result.provenance, Provenance::Fallback);
    assert_eq!(result.fallback_reason, Some(FallbackReason::CollaboratorFailure));
    assert!((0.0..=100.0).contains(&result.credibility_score));
    assert!((0.0..=100.0).contains(&result.risk_index));
    assert_eq!(result.confidence, 0.4);
    assert_eq!(judge.calls(), 1);
}

#[tokio::test]
async fn test_over_range_ai_credibility_is_clamped() {
    let judge = MockJudge::answering(150.0, -20.0, 3.0);
    let service = service(judge, OracleBuilder::new()).await;

    let result = service
        .analyze(NEUTRAL, "https://www.reuters.com/markets/rates")
        .await;

    assert_eq!(result.provenance, Provenance::AiFused);
    assert_eq!(result.credibility_score, 100.0);
    assert!((0.0..=100.0).contains(&result.risk_index));
    assert!((0.1..=0.95).contains(&result.confidence));
}

#[tokio::test]
async fn test_pump_content_on_low_reputation_domain_short_circuits() {
    let judge = MockJudge::answering(90.0, 5.0, 0.9);
    let service = service(judge.clone(), OracleBuilder::new()).await;

    let result = service
        .analyze(
            "BTC TO THE MOON!!! guaranteed 100x",
            "https://cryptogains.biz/signal",
        )
        .await;

    assert!(result.pattern_signals.overall_manipulation_risk > 0.5);
    assert_eq!(result.fallback_reason, Some(FallbackReason::ShortCircuit));
    assert!(result.risk_index > 60.0);
    assert_eq!(judge.calls(), 0);
}

#[tokio::test]
async fn test_fast_track_returns_tagged_fallback_on_timeout() {
    let judge = MockJudge::sleeping(Duration::from_secs(10));
    let service = service(
        judge,
        OracleBuilder::new()
            .with_ai_timeout(30_000)
            .with_fast_track_timeout(300),
    )
    .await;

    let started = Instant::now();
    let results = service
        .scheduler()
        .process_high_priority(vec![
            AnalysisRequest::new(NEUTRAL, "slow_market").with_priority(Priority::High)
        ])
        .await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(results.len(), 1);
    assert!(results[0].fast_track);
    assert!(results[0].fallback_used());
    assert_eq!(results[0].result.fallback_reason, Some(FallbackReason::Timeout));
}

#[tokio::test]
async fn test_priority_split_puts_high_first() {
    for batch_size in [11, 20] {
        let judge = MockJudge::answering(70.0, 10.0, 0.8);
        let service = service(
            judge,
            OracleBuilder::new()
                .with_batching(batch_size, 2)
                .with_rate_limit(1_000),
        )
        .await;
        let scheduler = service.scheduler();

        let tiers = [
            (Priority::Low, 5),
            (Priority::Medium, 3),
            (Priority::High, 2),
        ];
        for (priority, count) in tiers {
            for i in 0..count {
                let request =
                    AnalysisRequest::new(format!("{} update {:?} {}", NEUTRAL, priority, i), "m")
                        .with_priority(priority);
                assert!(scheduler.enqueue(request).await.is_none());
            }
        }
        let status = scheduler.status().await;
        assert_eq!(status.queue_length, 10);
        assert_eq!(status.priority_histogram.high, 2);
        assert_eq!(status.priority_histogram.medium, 3);
        assert_eq!(status.priority_histogram.low, 5);

        let results = scheduler.flush().await;
        assert_eq!(results.len(), 10);
        // Each tier fits in one sub-batch: High, then Medium, then Low.
        for r in &results {
            let expected = match r.priority {
                Priority::High => Some(0),
                Priority::Medium => Some(1),
                Priority::Low => Some(2),
            };
            assert_eq!(r.batch_index, expected, "batch_size={}", batch_size);
        }
    }
}

#[tokio::test]
async fn test_enqueue_flush_keeps_tiers_apart() {
    let judge = MockJudge::answering(70.0, 10.0, 0.8);
    let service = service(
        judge,
        OracleBuilder::new().with_batching(5, 2).with_rate_limit(1_000),
    )
    .await;
    let scheduler = service.scheduler();

    let queued = [Priority::Low, Priority::Medium, Priority::Low, Priority::High];
    for (i, priority) in queued.into_iter().enumerate() {
        let request = AnalysisRequest::new(format!("{} item {}", NEUTRAL, i), "m")
            .with_priority(priority);
        assert!(scheduler.enqueue(request).await.is_none());
    }
    let flushed = scheduler
        .enqueue(AnalysisRequest::new(format!("{} item 4", NEUTRAL), "m").with_priority(Priority::High))
        .await
        .expect("fifth request reaches batch size");

    assert_eq!(flushed.len(), 5);
    let first: Vec<_> = flushed
        .iter()
        .filter(|r| r.batch_index == Some(0))
        .map(|r| r.priority)
        .collect();
    assert_eq!(first, vec![Priority::High, Priority::High]);
}

#[tokio::test]
async fn test_small_batch_splits_per_tier() {
    let judge = MockJudge::answering(70.0, 10.0, 0.8);
    let service = service(
        judge,
        OracleBuilder::new().with_batching(2, 2).with_rate_limit(1_000),
    )
    .await;
    let scheduler = service.scheduler();

    // The second request fills the batch; each tier gets its own sub-batch.
    let first = scheduler
        .enqueue(AnalysisRequest::new("low one", "a").with_priority(Priority::Low))
        .await;
    assert!(first.is_none());
    let flushed = scheduler
        .enqueue(AnalysisRequest::new("high one", "b").with_priority(Priority::High))
        .await
        .expect("second request reaches batch size");

    assert_eq!(flushed.len(), 2);
    let lead: Vec<_> = flushed.iter().filter(|r| r.batch_index == Some(0)).collect();
    assert_eq!(lead.len(), 1);
    assert_eq!(lead[0].priority, Priority::High);
    let rest: Vec<_> = flushed.iter().filter(|r| r.batch_index == Some(1)).collect();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].priority, Priority::Low);
}

#[tokio::test]
async fn test_empty_batch_is_empty() {
    let service = service(MockJudge::failing(), OracleBuilder::new()).await;
    assert!(service.scheduler().process_batch().await.is_empty());
    assert_eq!(service.scheduler().status().await.queue_length, 0);
}

#[tokio::test]
async fn test_cached_analysis_skips_the_judge() {
    let judge = MockJudge::answering(70.0, 10.0, 0.8);
    let service = service(judge.clone(), OracleBuilder::new()).await;

    let first = service.analyze(NEUTRAL, "https://www.bloomberg.com/a").await;
    let second = service.analyze(NEUTRAL, "https://www.bloomberg.com/a").await;

    assert_eq!(first.provenance, Provenance::AiFused);
    assert_eq!(second.provenance, Provenance::CacheHit);
    assert_eq!(second.credibility_score, first.credibility_score);
    assert_eq!(judge.calls(), 1);

    let metrics = service.monitor().get_metrics().await;
    assert_eq!(metrics.total_requests, 2);
    assert_eq!(metrics.cache_hit_rate, 50.0);
}

#[tokio::test]
async fn test_full_pass_populates_state() {
    let service = service(MockJudge::answering(75.0, 15.0, 0.8), OracleBuilder::new()).await;

    let reports = service.run_analysis_pass().await;
    assert_eq!(reports.len(), 1);

    let stored = service.state().all().await;
    assert_eq!(stored, reports);
    let status = service.state().status().await;
    assert_eq!(status.total_markets, 1);
    assert_eq!(status.total_attestations, 0);
    assert!(status.last_update > 0);
}
