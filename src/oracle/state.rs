//! Latest report per market and the aggregate oracle status.

use crate::oracle::types::{MarketReport, OracleStatus};
use crate::types::{now_millis, MarketId};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

/// Per-market registry with overwrite semantics.
///
/// Reports are written one at a time as a pass progresses. The aggregate
/// status is only replaced in [`OracleStateStore::commit_pass`], in a single
/// assignment under the write lock, so readers see either the previous
/// status or the new one.
#[derive(Default)]
pub struct OracleStateStore {
    reports: RwLock<HashMap<MarketId, MarketReport>>,
    status: RwLock<OracleStatus>,
}

impl OracleStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest report for its market, replacing any previous one.
    pub async fn record(&self, report: MarketReport) {
        self.reports
            .write()
            .await
            .insert(report.market_id.clone(), report);
    }

    /// Replace the aggregate status with the counts of a full pass.
    pub async fn commit_pass(&self, pass: &[MarketReport]) -> OracleStatus {
        let mut status = self.status.write().await;
        let next = OracleStatus {
            total_markets: pass.len(),
            total_attestations: pass.iter().filter(|r| r.is_attested()).count(),
            last_update: now_millis(),
            passes_completed: status.passes_completed + 1,
        };
        *status = next.clone();

        info!(
            "Pass {} committed: {} markets, {} attestations",
            next.passes_completed, next.total_markets, next.total_attestations
        );
        next
    }

    pub async fn get(&self, market_id: &str) -> Option<MarketReport> {
        self.reports.read().await.get(market_id).cloned()
    }

    /// All reports, ordered by market id.
    pub async fn all(&self) -> Vec<MarketReport> {
        let mut reports: Vec<_> = self.reports.read().await.values().cloned().collect();
        reports.sort_by(|a, b| a.market_id.cmp(&b.market_id));
        reports
    }

    pub async fn status(&self) -> OracleStatus {
        self.status.read().await.clone()
    }
}
