//! Main entry point for the TruthLens oracle
//!
//! Runs the analysis service with its background tasks, scores a few demo
//! requests through the scheduler and shuts down on Ctrl-C.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn, Level};
use truthlens_oracle::oracle::{OracleBuilder, OracleConfig, OracleService};
use truthlens_oracle::types::{AnalysisRequest, Priority};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("Starting TruthLens oracle");

    let config = OracleConfig::from_env();
    let service = Arc::new(OracleBuilder::from_config(config).build().await?);
    service.init().await;
    service.start().await;

    demo_requests(&service).await;

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received");

    let metrics = service.monitor().get_metrics().await;
    info!(
        "Served {} requests: {:.1}% cache hits, {:.1}% fallbacks, avg {:.0}ms ({:?})",
        metrics.total_requests,
        metrics.cache_hit_rate,
        metrics.fallback_rate,
        metrics.avg_latency_ms,
        metrics.status
    );
    for suggestion in service.monitor().get_suggestions().await {
        info!("Suggestion: {}", suggestion);
    }

    service.shutdown().await;
    Ok(())
}

/// Score a handful of requests through both scheduler paths.
async fn demo_requests(service: &OracleService) {
    let urgent = vec![AnalysisRequest::new("BTC TO THE MOON!!! guaranteed 100x", "demo_urgent")
        .with_priority(Priority::High)];
    for scheduled in service.scheduler().process_high_priority(urgent).await {
        info!(
            "Fast-track {}: credibility {:.1}, risk {:.1}, fallback {}",
            scheduled.market_id,
            scheduled.result.credibility_score,
            scheduled.result.risk_index,
            scheduled.fallback_used()
        );
    }

    let queued = [
        (
            "Federal Reserve holds rates steady, citing cooling inflation.",
            "https://www.reuters.com/markets",
            Priority::Medium,
        ),
        (
            "Insiders say this coin will explode tomorrow, buy now!",
            "https://cryptomoon.biz/alpha",
            Priority::Low,
        ),
    ];
    for (content, url, priority) in queued {
        let request = AnalysisRequest::new(content, "demo_batch")
            .with_url(url)
            .with_priority(priority);
        if let Some(results) = service.scheduler().enqueue(request).await {
            info!("Batch flushed early with {} results", results.len());
        }
    }

    let results = service.scheduler().flush().await;
    if results.is_empty() {
        warn!("Demo batch produced no results");
    }
    for scheduled in results {
        info!(
            "Batch {:?} {}: credibility {:.1}, risk {:.1}, provenance {:?}",
            scheduled.batch_index,
            scheduled.market_id,
            scheduled.result.credibility_score,
            scheduled.result.risk_index,
            scheduled.result.provenance
        );
    }
}
