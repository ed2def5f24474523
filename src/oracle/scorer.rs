//! Signal fusion scorer.
//!
//! Combines the keyword/domain heuristics with an external AI judgment. The
//! AI call is skipped when the heuristics are already conclusive, and any AI
//! failure degrades to the heuristic-only fallback. `analyze` never fails.

use crate::error::{CollaboratorError, PipelineError};
use crate::oracle::ai_judge::{AiJudge, AiJudgment};
use crate::oracle::circuit_breaker::{CircuitBreaker, CollaboratorState};
use crate::oracle::heuristics::Heuristics;
use crate::oracle::rate_limit::CollaboratorRateLimiter;
use crate::oracle::types::OracleConfig;
use crate::types::{
    now_millis, AnalysisResult, DomainSignals, FallbackReason, PatternSignals, Provenance,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// Anything that turns content into a bounded [`AnalysisResult`].
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, content: &str, url: &str) -> AnalysisResult;
}

#[async_trait]
impl<A: Analyzer + ?Sized> Analyzer for Arc<A> {
    async fn analyze(&self, content: &str, url: &str) -> AnalysisResult {
        (**self).analyze(content, url).await
    }
}

fn finite_or(value: f64, default: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        default
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Fuse an AI judgment with heuristic signals.
///
/// AI values are clamped into range first, whatever the collaborator sent.
pub fn fuse(
    judgment: &AiJudgment,
    patterns: &PatternSignals,
    domain: &DomainSignals,
) -> AnalysisResult {
    let ai_credibility = finite_or(judgment.credibility, 50.0).clamp(0.0, 100.0);
    let ai_manipulation = finite_or(judgment.manipulation_risk, 50.0).clamp(0.0, 100.0);
    let ai_confidence = finite_or(judgment.confidence, 0.5).clamp(0.0, 1.0);

    let pattern_risk = patterns.overall_manipulation_risk;
    let pattern_penalty = pattern_risk * 30.0;
    let domain_adjustment = (domain.domain_score - 50.0) * 0.6;

    let credibility = (ai_credibility + domain_adjustment - pattern_penalty).clamp(0.0, 100.0);
    let manipulation = (ai_manipulation + pattern_penalty).clamp(0.0, 100.0);

    // Shrinks as the AI and the keyword heuristics disagree on manipulation.
    let consistency = 1.0 - (ai_manipulation / 100.0 - pattern_risk).abs() * 0.5;
    let confidence = (consistency * ai_confidence).clamp(0.1, 0.95);

    let reasoning = if judgment.reasoning.is_empty() {
        vec!["Analysis completed".to_string()]
    } else {
        judgment.reasoning.clone()
    };

    AnalysisResult {
        credibility_score: round_to(credibility, 1),
        risk_index: round_to(manipulation, 1),
        confidence: round_to(confidence, 2),
        reasoning,
        risk_factors: judgment.risk_factors.clone(),
        pattern_signals: *patterns,
        domain_signals: *domain,
        provenance: Provenance::AiFused,
        fallback_reason: None,
        produced_at: now_millis(),
    }
}

/// Heuristics plus AI judgment, guarded by a timeout, a rate limit and a
/// circuit breaker.
pub struct SignalFusionScorer {
    heuristics: Heuristics,
    judge: Arc<dyn AiJudge>,
    ai_timeout: Duration,
    rate_limiter: CollaboratorRateLimiter,
    breaker: Mutex<CircuitBreaker>,
}

impl SignalFusionScorer {
    pub fn new(judge: Arc<dyn AiJudge>, config: &OracleConfig) -> Self {
        let rate_limiter =
            CollaboratorRateLimiter::new(judge.name(), config.rate_limit_requests_per_second);
        let breaker = CircuitBreaker::new(
            config.circuit_breaker_failure_threshold,
            Duration::from_secs(config.circuit_breaker_cooldown_seconds),
            config.circuit_breaker_sample_size,
        );

        Self {
            heuristics: Heuristics::new(),
            judge,
            ai_timeout: config.ai_timeout(),
            rate_limiter,
            breaker: Mutex::new(breaker),
        }
    }

    pub fn heuristics(&self) -> &Heuristics {
        &self.heuristics
    }

    /// Current health of the AI collaborator.
    pub async fn judge_state(&self) -> CollaboratorState {
        self.breaker.lock().await.state(self.judge.name())
    }

    async fn call_judge(&self, content: &str, url: &str) -> Result<AiJudgment, CollaboratorError> {
        let name = self.judge.name();

        if !self.breaker.lock().await.allow(name) {
            return Err(CollaboratorError::CircuitOpen {
                collaborator: name.to_string(),
            });
        }
        self.rate_limiter.check()?;

        let outcome = match tokio::time::timeout(self.ai_timeout, self.judge.judge(content, url)).await
        {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout {
                collaborator: name.to_string(),
                timeout: self.ai_timeout,
            }),
        };

        match &outcome {
            Ok(_) => self.breaker.lock().await.record_success(name),
            Err(CollaboratorError::NotConfigured { .. }) => {}
            Err(_) => self.breaker.lock().await.record_failure(name),
        }
        outcome
    }
}

#[async_trait]
impl Analyzer for SignalFusionScorer {
    #[instrument(skip(self, content), fields(len = content.len()))]
    async fn analyze(&self, content: &str, url: &str) -> AnalysisResult {
        let patterns = self.heuristics.pattern_signals(content);
        let domain = self.heuristics.domain_signals(url);

        if self.heuristics.is_conclusive(&patterns, &domain) {
            debug!(
                "Short-circuit: pattern risk {:.2}, domain score {:.0}",
                patterns.overall_manipulation_risk, domain.domain_score
            );
            return self
                .heuristics
                .fallback_from(patterns, domain, FallbackReason::ShortCircuit);
        }

        match self.call_judge(content, url).await {
            Ok(judgment) => fuse(&judgment, &patterns, &domain),
            Err(e) => {
                let reason = e.fallback_reason();
                match PipelineError::from(e) {
                    err @ PipelineError::Collaborator(CollaboratorError::NotConfigured { .. }) => {
                        debug!("{}", err)
                    }
                    err => warn!("AI judgment unavailable, using heuristics: {}", err),
                }
                self.heuristics.fallback_from(patterns, domain, reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorResult;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedJudge {
        judgment: AiJudgment,
        calls: AtomicUsize,
    }

    impl FixedJudge {
        fn new(credibility: f64, manipulation_risk: f64, confidence: f64) -> Self {
            Self {
                judgment: AiJudgment {
                    credibility,
                    manipulation_risk,
                    confidence,
                    reasoning: vec!["Sourced and specific.".to_string()],
                    risk_factors: Vec::new(),
                },
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AiJudge for FixedJudge {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn judge(&self, _content: &str, _url: &str) -> CollaboratorResult<AiJudgment> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.judgment.clone())
        }
    }

    struct FailingJudge;

    #[async_trait]
    impl AiJudge for FailingJudge {
        fn name(&self) -> &str {
            "failing"
        }

        async fn judge(&self, _content: &str, _url: &str) -> CollaboratorResult<AiJudgment> {
            Err(CollaboratorError::Malformed {
                collaborator: "failing".to_string(),
                reason: "not json".to_string(),
            })
        }
    }

    struct SlowJudge;

    #[async_trait]
    impl AiJudge for SlowJudge {
        fn name(&self) -> &str {
            "slow"
        }

        async fn judge(&self, _content: &str, _url: &str) -> CollaboratorResult<AiJudgment> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(CollaboratorError::Request {
                collaborator: "slow".to_string(),
                reason: "unreachable".to_string(),
            })
        }
    }

    const NEUTRAL: &str = "The central bank kept its policy rate unchanged at the quarterly meeting";

    fn config() -> OracleConfig {
        OracleConfig {
            rate_limit_requests_per_second: 1_000,
            ..OracleConfig::default()
        }
    }

    #[tokio::test]
    async fn test_fused_result_clamps_over_range_ai() {
        let scorer = SignalFusionScorer::new(Arc::new(FixedJudge::new(150.0, -20.0, 3.0)), &config());
        let result = scorer.analyze(NEUTRAL, "").await;

        assert_eq!(result.provenance, Provenance::AiFused);
        assert_eq!(result.credibility_score, 100.0);
        assert_eq!(result.risk_index, 0.0);
        assert!(result.confidence <= 0.95);
    }

    #[tokio::test]
    async fn test_fusion_formula() {
        let scorer = SignalFusionScorer::new(Arc::new(FixedJudge::new(70.0, 20.0, 0.8)), &config());
        let result = scorer
            .analyze(NEUTRAL, "https://www.reuters.com/markets/rates")
            .await;

        // 70 + (85 - 50) * 0.6 - 0
        assert_eq!(result.credibility_score, 91.0);
        assert_eq!(result.risk_index, 20.0);
        // (1 - 0.2 * 0.5) * 0.8
        assert_eq!(result.confidence, 0.72);
        assert_eq!(result.reasoning, vec!["Sourced and specific."]);
    }

    #[tokio::test]
    async fn test_failure_falls_back() {
        let scorer = SignalFusionScorer::new(Arc::new(FailingJudge), &config());
        let result = scorer.analyze(NEUTRAL, "https://example.org/post").await;

        assert_eq!(result.provenance, Provenance::Fallback);
        assert_eq!(
            result.fallback_reason,
            Some(FallbackReason::CollaboratorFailure)
        );
        assert_eq!(result.confidence, 0.4);
        assert!((0.0..=100.0).contains(&result.credibility_score));
        assert!((0.0..=100.0).contains(&result.risk_index));
    }

    #[tokio::test]
    async fn test_slow_ai_times_out_into_fallback() {
        let config = OracleConfig {
            ai_timeout_ms: 50,
            ..config()
        };
        let scorer = SignalFusionScorer::new(Arc::new(SlowJudge), &config);

        let started = std::time::Instant::now();
        let result = scorer.analyze(NEUTRAL, "").await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(result.fallback_reason, Some(FallbackReason::Timeout));
    }

    #[tokio::test]
    async fn test_short_circuit_skips_ai() {
        let judge = Arc::new(FixedJudge::new(90.0, 5.0, 0.9));
        let scorer = SignalFusionScorer::new(judge.clone(), &config());

        let result = scorer
            .analyze(
                "BTC TO THE MOON!!! guaranteed 100x",
                "http://shady-crypto-news.biz/blog/123",
            )
            .await;

        assert_eq!(judge.calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.fallback_reason, Some(FallbackReason::ShortCircuit));
        assert!(result.pattern_signals.overall_manipulation_risk > 0.5);
        assert!(result.risk_index > 60.0);
    }

    #[tokio::test]
    async fn test_repeated_failures_open_the_circuit() {
        let config = OracleConfig {
            circuit_breaker_failure_threshold: 1,
            ..config()
        };
        let scorer = SignalFusionScorer::new(Arc::new(FailingJudge), &config);

        scorer.analyze(NEUTRAL, "").await;
        scorer.analyze(NEUTRAL, "").await;
        assert_eq!(scorer.judge_state().await, CollaboratorState::CoolingDown);

        let result = scorer.analyze(NEUTRAL, "").await;
        assert_eq!(result.fallback_reason, Some(FallbackReason::CircuitOpen));
    }

    #[tokio::test]
    async fn test_rate_limited_calls_fall_back() {
        let config = OracleConfig {
            rate_limit_requests_per_second: 1,
            ..OracleConfig::default()
        };
        let judge = Arc::new(FixedJudge::new(60.0, 30.0, 0.7));
        let scorer = SignalFusionScorer::new(judge.clone(), &config);

        let first = scorer.analyze(NEUTRAL, "").await;
        let second = scorer.analyze(NEUTRAL, "").await;
        assert_eq!(first.provenance, Provenance::AiFused);
        assert_eq!(
            second.fallback_reason,
            Some(FallbackReason::CollaboratorFailure)
        );
        assert_eq!(judge.calls.load(Ordering::SeqCst), 1);
    }
}
