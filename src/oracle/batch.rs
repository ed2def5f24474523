//! Priority-aware batch scheduler with a bounded fast-track path.
//!
//! Requests accumulate in an append-only queue. Once the queue reaches
//! `batch_size` (or on an explicit [`BatchScheduler::flush`]) it is sorted by
//! priority, split into per-tier sub-batches and dispatched across a worker pool bounded
//! by a semaphore. Urgent requests skip the queue through
//! [`BatchScheduler::process_high_priority`], each under a strict timeout.
//!
//! Nothing here returns an error: every request ends in either a real result
//! or a tagged heuristic fallback.

use crate::error::PipelineError;
use crate::oracle::heuristics::Heuristics;
use crate::oracle::scorer::Analyzer;
use crate::types::{AnalysisRequest, AnalysisResult, FallbackReason, MarketId, Priority};
use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// Outcome of one scheduled request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledResult {
    pub market_id: MarketId,
    pub priority: Priority,
    /// Sub-batch the request was dispatched in, `None` for fast-track
    pub batch_index: Option<usize>,
    pub fast_track: bool,
    pub result: AnalysisResult,
}

impl ScheduledResult {
    pub fn fallback_used(&self) -> bool {
        self.result.is_fallback()
    }
}

/// Pending requests per priority tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityHistogram {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub queue_length: usize,
    pub batch_size: usize,
    pub worker_count: usize,
    pub priority_histogram: PriorityHistogram,
}

pub struct BatchScheduler {
    analyzer: Arc<dyn Analyzer>,
    heuristics: Heuristics,
    queue: Mutex<Vec<AnalysisRequest>>,
    /// Held for the whole of a flush so two flushes never take the same requests.
    processing: Mutex<()>,
    workers: Arc<Semaphore>,
    batch_size: usize,
    worker_count: usize,
    fast_track_timeout: Duration,
}

impl BatchScheduler {
    pub fn new(
        analyzer: Arc<dyn Analyzer>,
        batch_size: usize,
        worker_count: usize,
        fast_track_timeout: Duration,
    ) -> Self {
        let batch_size = batch_size.max(1);
        let worker_count = worker_count.max(1);
        Self {
            analyzer,
            heuristics: Heuristics::new(),
            queue: Mutex::new(Vec::new()),
            processing: Mutex::new(()),
            workers: Arc::new(Semaphore::new(worker_count)),
            batch_size,
            worker_count,
            fast_track_timeout,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Queue a request. Returns the flushed results when this request filled
    /// the queue up to `batch_size`.
    pub async fn enqueue(&self, request: AnalysisRequest) -> Option<Vec<ScheduledResult>> {
        let queued = {
            let mut queue = self.queue.lock().await;
            queue.push(request);
            queue.len()
        };
        debug!("Queued analysis request ({} pending)", queued);

        if queued >= self.batch_size {
            Some(self.process_batch().await)
        } else {
            None
        }
    }

    /// Process whatever is pending, even below `batch_size`.
    pub async fn flush(&self) -> Vec<ScheduledResult> {
        self.process_batch().await
    }

    /// Sort pending requests by priority, dispatch them in sub-batches and
    /// harvest the results in completion order.
    ///
    /// Requests queued while the flush runs stay pending for the next one.
    #[instrument(skip(self))]
    pub async fn process_batch(&self) -> Vec<ScheduledResult> {
        let _processing = self.processing.lock().await;

        let mut pending = self.queue.lock().await.clone();
        if pending.is_empty() {
            return Vec::new();
        }
        let taken = pending.len();
        pending.sort_by_key(|r| r.priority.rank());

        // A sub-batch never spans two priority tiers.
        let mut sub_batches: Vec<NonEmpty<AnalysisRequest>> = Vec::new();
        for tier in pending.chunk_by(|a, b| a.priority == b.priority) {
            sub_batches.extend(
                tier.chunks(self.batch_size)
                    .filter_map(|chunk| NonEmpty::from_slice(chunk)),
            );
        }
        info!(
            "Dispatching {} requests in {} sub-batches",
            taken,
            sub_batches.len()
        );

        let mut tasks = JoinSet::new();
        let mut in_flight = HashMap::new();
        for (batch_index, batch) in sub_batches.into_iter().enumerate() {
            let analyzer = self.analyzer.clone();
            let workers = self.workers.clone();
            let requests = batch.clone();
            let handle = tasks.spawn(async move {
                // The semaphore is never closed; a missing permit only loses the bound.
                let _permit = workers.acquire_owned().await.ok();
                let mut results = Vec::with_capacity(requests.len());
                for request in requests {
                    let result = analyzer.analyze(&request.content, request.url()).await;
                    results.push(ScheduledResult {
                        market_id: request.market_id,
                        priority: request.priority,
                        batch_index: Some(batch_index),
                        fast_track: false,
                        result,
                    });
                }
                results
            });
            in_flight.insert(handle.id(), (batch_index, batch));
        }

        let mut harvested = Vec::with_capacity(taken);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(results) => harvested.extend(results),
                Err(e) => {
                    error!("Sub-batch worker failed: {}", e);
                    if let Some((batch_index, batch)) = in_flight.remove(&e.id()) {
                        harvested.extend(batch.into_iter().map(|request| {
                            self.fallback_for(
                                request,
                                Some(batch_index),
                                false,
                                FallbackReason::CollaboratorFailure,
                            )
                        }));
                    }
                }
            }
        }

        self.queue.lock().await.drain(..taken);
        harvested
    }

    /// Score urgent requests immediately, bypassing the queue.
    ///
    /// Each request gets at most `fast_track_timeout` including the wait for a
    /// worker. Results come back in request order.
    #[instrument(skip(self, requests), fields(count = requests.len()))]
    pub async fn process_high_priority(
        &self,
        requests: Vec<AnalysisRequest>,
    ) -> Vec<ScheduledResult> {
        let mut tasks = JoinSet::new();
        let mut in_flight = HashMap::new();
        for (position, request) in requests.iter().cloned().enumerate() {
            let analyzer = self.analyzer.clone();
            let workers = self.workers.clone();
            let bound = self.fast_track_timeout;
            let handle = tasks.spawn(async move {
                let scored = tokio::time::timeout(bound, async {
                    let _permit = workers.acquire_owned().await.ok();
                    analyzer.analyze(&request.content, request.url()).await
                })
                .await;
                (position, scored.ok())
            });
            in_flight.insert(handle.id(), position);
        }

        let mut slots: Vec<Option<AnalysisResult>> = vec![None; requests.len()];
        let mut reasons = vec![FallbackReason::Timeout; requests.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, Some(result))) => slots[position] = Some(result),
                Ok((position, None)) => {
                    let err = PipelineError::SchedulingTimeout(self.fast_track_timeout);
                    warn!("{} for market {}", err, requests[position].market_id);
                }
                Err(e) => {
                    error!("Fast-track worker failed: {}", e);
                    if let Some(position) = in_flight.remove(&e.id()) {
                        reasons[position] = FallbackReason::CollaboratorFailure;
                    }
                }
            }
        }

        requests
            .into_iter()
            .zip(slots)
            .zip(reasons)
            .map(|((request, slot), reason)| match slot {
                Some(result) => ScheduledResult {
                    market_id: request.market_id,
                    priority: request.priority,
                    batch_index: None,
                    fast_track: true,
                    result,
                },
                None => self.fallback_for(request, None, true, reason),
            })
            .collect()
    }

    pub async fn status(&self) -> QueueStatus {
        let queue = self.queue.lock().await;
        let mut histogram = PriorityHistogram::default();
        for request in queue.iter() {
            match request.priority {
                Priority::High => histogram.high += 1,
                Priority::Medium => histogram.medium += 1,
                Priority::Low => histogram.low += 1,
            }
        }
        QueueStatus {
            queue_length: queue.len(),
            batch_size: self.batch_size,
            worker_count: self.worker_count,
            priority_histogram: histogram,
        }
    }

    fn fallback_for(
        &self,
        request: AnalysisRequest,
        batch_index: Option<usize>,
        fast_track: bool,
        reason: FallbackReason,
    ) -> ScheduledResult {
        let result = self
            .heuristics
            .fallback(&request.content, request.url(), reason);
        ScheduledResult {
            market_id: request.market_id,
            priority: request.priority,
            batch_index,
            fast_track,
            result,
        }
    }
}
