//! Oracle service: wires the analysis pipeline together and owns its
//! background tasks.
//!
//! The analyzer stack is `MonitoringAnalyzer<CachingAnalyzer<SignalFusionScorer>>`,
//! shared by direct calls, the batch scheduler and the periodic full-market pass.

use crate::oracle::ai_judge::{
    AiJudge, OpenAiClient, OpenAiJudge, OpenAiSentimentJudge, SentimentJudge,
};
use crate::oracle::attestation::{
    to_bytes32, AttestationMetadata, AttestationSubmitter, MetadataPublisher, PinataPublisher,
};
use crate::oracle::batch::BatchScheduler;
use crate::oracle::cache::CacheManager;
use crate::oracle::circuit_breaker::CollaboratorState;
use crate::oracle::credibility::{score_link, summarize};
use crate::oracle::data_sources::{
    CommentFeed, HttpCommentFeed, HttpMarketFeed, MarketFeed, StaticCommentFeed, StaticMarketFeed,
};
use crate::oracle::interceptors::{CachingAnalyzer, MonitoringAnalyzer};
use crate::oracle::performance_monitor::PerformanceMonitor;
use crate::oracle::risk::RiskScorer;
use crate::oracle::scorer::{Analyzer, SignalFusionScorer};
use crate::oracle::state::OracleStateStore;
use crate::oracle::storage::{CacheStore, SqliteCacheStore};
use crate::oracle::types::{MarketReport, OracleConfig};
use crate::types::{now_millis, AnalysisResult, Comment, MarketSnapshot};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// External collaborators the service talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub ai_judge: Arc<dyn AiJudge>,
    pub sentiment: Arc<dyn SentimentJudge>,
    pub market_feed: Arc<dyn MarketFeed>,
    pub comment_feed: Arc<dyn CommentFeed>,
    pub publisher: Option<Arc<dyn MetadataPublisher>>,
    pub attestor: Option<Arc<dyn AttestationSubmitter>>,
}

impl Collaborators {
    /// OpenAI judges, HTTP feeds when configured (static feeds otherwise) and
    /// Pinata publishing when a JWT is present. No attestor is configured.
    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        let client = Arc::new(OpenAiClient::new(config)?);
        if !client.is_configured() {
            warn!("OPENAI_API_KEY not set; every analysis will use heuristic fallbacks");
        }

        let market_feed: Arc<dyn MarketFeed> = match &config.market_feed_url {
            Some(url) => Arc::new(HttpMarketFeed::new(url.clone(), config)?),
            None => Arc::new(StaticMarketFeed::fallback()),
        };
        let comment_feed: Arc<dyn CommentFeed> = match &config.comment_feed_url {
            Some(url) => Arc::new(HttpCommentFeed::new(url.clone(), config)?),
            None => Arc::new(StaticCommentFeed::fallback()),
        };
        let publisher: Option<Arc<dyn MetadataPublisher>> = match &config.pinata_jwt {
            Some(jwt) => Some(Arc::new(PinataPublisher::new(jwt.clone())?)),
            None => None,
        };

        Ok(Self {
            ai_judge: Arc::new(OpenAiJudge::new(client.clone())?),
            sentiment: Arc::new(OpenAiSentimentJudge::new(client)),
            market_feed,
            comment_feed,
            publisher,
            attestor: None,
        })
    }
}

pub struct OracleService {
    config: OracleConfig,
    cache: Arc<CacheManager<AnalysisResult>>,
    monitor: Arc<PerformanceMonitor>,
    scorer: Arc<SignalFusionScorer>,
    analyzer: Arc<dyn Analyzer>,
    scheduler: Arc<BatchScheduler>,
    risk: RiskScorer,
    state: Arc<OracleStateStore>,
    collaborators: Collaborators,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl OracleService {
    /// Open the disk cache tier at `config.cache_db_path` and build every component.
    pub async fn new(config: OracleConfig, collaborators: Collaborators) -> Result<Self> {
        let store = SqliteCacheStore::open(&config.cache_db_path).await?;
        Ok(Self::with_store(config, collaborators, store))
    }

    /// Build the service over an already opened cache store.
    pub fn with_store(
        config: OracleConfig,
        collaborators: Collaborators,
        store: Arc<dyn CacheStore>,
    ) -> Self {
        let cache = Arc::new(CacheManager::new(store, config.analysis_cache_ttl()));
        let monitor = Arc::new(PerformanceMonitor::new(
            config.monitor_window,
            Duration::from_secs(config.sampler_interval_seconds),
        ));
        let scorer = Arc::new(SignalFusionScorer::new(
            collaborators.ai_judge.clone(),
            &config,
        ));
        let analyzer: Arc<dyn Analyzer> = Arc::new(MonitoringAnalyzer::new(
            CachingAnalyzer::new(scorer.clone(), cache.clone()),
            monitor.clone(),
        ));
        let scheduler = Arc::new(BatchScheduler::new(
            analyzer.clone(),
            config.batch_size,
            config.worker_count,
            config.fast_track_timeout(),
        ));
        let risk = RiskScorer::new(collaborators.sentiment.clone(), config.sentiment_timeout());
        let (shutdown_tx, _) = watch::channel(false);

        info!(
            "Oracle service created: batch size {}, {} workers, judge {}",
            config.batch_size,
            config.worker_count,
            collaborators.ai_judge.name()
        );

        Self {
            config,
            cache,
            monitor,
            scorer,
            analyzer,
            scheduler,
            risk,
            state: Arc::new(OracleStateStore::new()),
            collaborators,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Warm the memory tier from disk. Returns the number of entries loaded.
    pub async fn init(&self) -> usize {
        let warmed = self.cache.init().await;
        info!("Oracle service initialized, {} cached analyses warmed", warmed);
        warmed
    }

    /// Spawn the periodic full-market analysis and the resource sampler.
    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            warn!("Oracle service already started");
            return;
        }
        // Clear a signal left over from an earlier shutdown.
        self.shutdown_tx.send_replace(false);

        let service = self.clone();
        let shutdown = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            service.run_periodic_analysis(shutdown).await;
        }));

        let monitor = self.monitor.clone();
        let shutdown = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(monitor.run_sampler(shutdown)));

        info!(
            "Background tasks started (analysis every {}s)",
            self.config.analysis_interval_seconds
        );
    }

    /// Stop background tasks and persist the memory tier.
    pub async fn shutdown(&self) {
        info!("Shutting down oracle service");
        let _ = self.shutdown_tx.send(true);

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!("Background task ended abnormally: {}", e);
            }
        }

        let flushed = self.cache.flush().await;
        info!("Shutdown complete, {} cache entries flushed", flushed);
    }

    async fn run_periodic_analysis(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.analysis_interval_seconds.max(1)));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let reports = self.run_analysis_pass().await;
                    debug!("Periodic pass produced {} reports", reports.len());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Periodic analysis stopped");
    }

    /// Score one piece of content through the cache and monitor.
    pub async fn analyze(&self, content: &str, url: &str) -> AnalysisResult {
        self.analyzer.analyze(content, url).await
    }

    /// Analyze every market from the feed, record the reports and commit
    /// the aggregate status.
    #[instrument(skip(self))]
    pub async fn run_analysis_pass(&self) -> Vec<MarketReport> {
        let markets = self
            .collaborators
            .market_feed
            .fetch_markets()
            .await
            .unwrap_or_else(|e| {
                warn!("Market feed unavailable: {}", e);
                Vec::new()
            });
        let comments = self
            .collaborators
            .comment_feed
            .fetch_comments()
            .await
            .unwrap_or_else(|e| {
                warn!("Comment feed unavailable: {}", e);
                Vec::new()
            });
        info!(
            "Analysis pass over {} markets, {} comments",
            markets.len(),
            comments.len()
        );

        let mut reports = Vec::with_capacity(markets.len());
        for market in &markets {
            let report = self.analyze_market(market, &comments).await;
            self.state.record(report.clone()).await;
            reports.push(report);
        }

        self.state.commit_pass(&reports).await;

        let swept = self.cache.cleanup().await;
        if swept.memory_removed > 0 || swept.disk_removed > 0 {
            debug!(
                "Cache sweep removed {} memory and {} disk entries",
                swept.memory_removed, swept.disk_removed
            );
        }
        reports
    }

    #[instrument(skip(self, market, comments), fields(market = %market.market_id))]
    async fn analyze_market(&self, market: &MarketSnapshot, comments: &[Comment]) -> MarketReport {
        let market_comments: Vec<Comment> = comments
            .iter()
            .filter(|c| c.market_id == market.market_id)
            .cloned()
            .collect();

        let mut links = Vec::new();
        for comment in &market_comments {
            let url = match comment.url.as_deref() {
                Some(url) if !url.is_empty() => url,
                _ => continue,
            };
            let analysis = self.analyzer.analyze(&comment.text, url).await;
            links.push(score_link(url, &comment.text, &analysis));
        }

        let credibility = summarize(&links);
        let risk = self
            .risk
            .score(market, credibility.link_variance, &market_comments)
            .await;

        let mut report = MarketReport {
            market_id: market.market_id.clone(),
            credibility_score: credibility.score,
            risk_index: risk.risk_index,
            confidence: credibility.confidence,
            links,
            credibility_reasons: credibility.reasons,
            risk_reasons: risk.reasons,
            metadata_uri: None,
            transaction_id: None,
            produced_at: now_millis(),
        };
        self.publish(&mut report).await;

        info!(
            "Market {}: credibility {}, risk {}, {} links",
            report.market_id,
            report.credibility_score,
            report.risk_index,
            report.links_analyzed()
        );
        report
    }

    /// Best-effort metadata upload and attestation.
    async fn publish(&self, report: &mut MarketReport) {
        let bound = self.config.feed_timeout();

        if let Some(publisher) = &self.collaborators.publisher {
            let metadata = AttestationMetadata::from(&*report);
            match tokio::time::timeout(bound, publisher.publish(&metadata)).await {
                Ok(Ok(uri)) => report.metadata_uri = Some(uri),
                Ok(Err(e)) => warn!("Metadata publish failed for {}: {}", report.market_id, e),
                Err(_) => warn!("Metadata publish timed out for {}", report.market_id),
            }
        }

        if let Some(attestor) = &self.collaborators.attestor {
            let uri = report.metadata_uri.clone().unwrap_or_default();
            let submit = attestor.submit(
                to_bytes32(&report.market_id),
                report.credibility_score,
                report.risk_index,
                &uri,
            );
            match tokio::time::timeout(bound, submit).await {
                Ok(Ok(tx)) => {
                    info!("Attestation submitted for {}: {}", report.market_id, tx);
                    report.transaction_id = Some(tx);
                }
                Ok(Err(e)) => warn!("Attestation failed for {}: {}", report.market_id, e),
                Err(_) => warn!("Attestation timed out for {}", report.market_id),
            }
        }
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<BatchScheduler> {
        &self.scheduler
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn state(&self) -> &Arc<OracleStateStore> {
        &self.state
    }

    pub fn cache(&self) -> &Arc<CacheManager<AnalysisResult>> {
        &self.cache
    }

    /// Health of the AI collaborator behind the scorer.
    pub async fn judge_state(&self) -> CollaboratorState {
        self.scorer.judge_state().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CollaboratorError, CollaboratorResult};
    use crate::oracle::ai_judge::{AiJudgment, SentimentJudgment};
    use crate::types::Provenance;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NeutralJudge;

    #[async_trait]
    impl AiJudge for NeutralJudge {
        fn name(&self) -> &str {
            "neutral"
        }

        async fn judge(&self, _content: &str, _url: &str) -> CollaboratorResult<AiJudgment> {
            Ok(AiJudgment {
                credibility: 70.0,
                manipulation_risk: 10.0,
                confidence: 0.8,
                reasoning: vec!["looks fine".to_string()],
                risk_factors: Vec::new(),
            })
        }
    }

    struct NoSentiment;

    #[async_trait]
    impl SentimentJudge for NoSentiment {
        fn name(&self) -> &str {
            "none"
        }

        async fn judge(
            &self,
            _comments: &[Comment],
            _question: &str,
        ) -> CollaboratorResult<SentimentJudgment> {
            Err(CollaboratorError::NotConfigured {
                collaborator: "none".to_string(),
            })
        }
    }

    struct CountingAttestor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AttestationSubmitter for CountingAttestor {
        async fn submit(
            &self,
            _market_id: [u8; 32],
            _credibility: u8,
            _risk: u8,
            _metadata_uri: &str,
        ) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("0xtx{}", n))
        }
    }

    fn collaborators(attestor: Option<Arc<dyn AttestationSubmitter>>) -> Collaborators {
        Collaborators {
            ai_judge: Arc::new(NeutralJudge),
            sentiment: Arc::new(NoSentiment),
            market_feed: Arc::new(StaticMarketFeed::fallback()),
            comment_feed: Arc::new(StaticCommentFeed::fallback()),
            publisher: None,
            attestor,
        }
    }

    async fn service(attestor: Option<Arc<dyn AttestationSubmitter>>) -> Arc<OracleService> {
        let store = SqliteCacheStore::open_in_memory().await.unwrap();
        Arc::new(OracleService::with_store(
            OracleConfig::default(),
            collaborators(attestor),
            store,
        ))
    }

    #[tokio::test]
    async fn test_analysis_pass_records_and_commits() {
        let attestor = Arc::new(CountingAttestor {
            calls: AtomicUsize::new(0),
        });
        let service = service(Some(attestor.clone())).await;

        let reports = service.run_analysis_pass().await;
        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.market_id, "bitcoin_market");
        assert!(report.links_analyzed() > 0);
        assert!(report.credibility_score <= 100);
        assert!(report.risk_index <= 100);
        assert_eq!(report.transaction_id.as_deref(), Some("0xtx0"));

        assert_eq!(service.state().get("bitcoin_market").await.as_ref(), Some(report));
        let status = service.state().status().await;
        assert_eq!(status.total_markets, 1);
        assert_eq!(status.total_attestations, 1);
        assert_eq!(status.passes_completed, 1);
        assert_eq!(attestor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_pass_reuses_cached_analyses() {
        let service = service(None).await;
        service.run_analysis_pass().await;
        let first = service.monitor().get_metrics().await;
        assert_eq!(first.cache_hit_rate, 0.0);

        service.run_analysis_pass().await;
        let second = service.monitor().get_metrics().await;
        assert_eq!(second.total_requests, first.total_requests * 2);
        assert!(second.cache_hit_rate > 0.0);
        assert_eq!(service.state().status().await.passes_completed, 2);
    }

    #[tokio::test]
    async fn test_direct_analysis_goes_through_cache() {
        let service = service(None).await;
        let content = "The central bank published its quarterly report on inflation today.";

        let first = service.analyze(content, "https://www.reuters.com/markets").await;
        let second = service.analyze(content, "https://www.reuters.com/markets").await;
        assert_eq!(first.provenance, Provenance::AiFused);
        assert_eq!(second.provenance, Provenance::CacheHit);
        assert_eq!(service.cache().memory_len().await, 1);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let service = service(None).await;
        service.init().await;
        service.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The first interval tick fires immediately.
        service.shutdown().await;
        assert!(service.state().status().await.passes_completed >= 1);
        assert!(service.tasks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_restart_after_shutdown() {
        let service = service(None).await;
        service.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        service.shutdown().await;
        let before = service.state().status().await.passes_completed;

        service.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        {
            let tasks = service.tasks.lock().await;
            assert_eq!(tasks.len(), 2);
            assert!(tasks.iter().all(|task| !task.is_finished()));
        }
        assert!(service.state().status().await.passes_completed > before);

        service.shutdown().await;
        assert!(service.tasks.lock().await.is_empty());
    }
}
