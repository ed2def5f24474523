//! PerformanceMonitor - rolling request metrics and resource sampling.
//!
//! Every completed analysis records one sample into a fixed-capacity window;
//! rates and averages are derived from the window on read. A separate
//! sampler task refreshes coarse CPU and memory figures on its own schedule.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

use crate::types::now_millis;

/// One completed analysis request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceSample {
    pub latency: Duration,
    pub cache_hit: bool,
    pub ai_used: bool,
    pub fallback_used: bool,
    pub errored: bool,
}

/// Coarse tier derived from average latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PerformanceStatus {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl PerformanceStatus {
    pub fn from_latency(avg: Duration) -> Self {
        match avg.as_secs_f64() {
            s if s < 1.0 => PerformanceStatus::Excellent,
            s if s < 3.0 => PerformanceStatus::Good,
            s if s < 5.0 => PerformanceStatus::Fair,
            _ => PerformanceStatus::Poor,
        }
    }
}

/// Host resource usage, both in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    /// Unix milliseconds, 0 before the first sample
    pub sampled_at: u64,
}

/// Metrics derived from the current window. Rates are percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Requests recorded since start or the last reset
    pub total_requests: u64,
    /// Samples currently in the window
    pub window_len: usize,
    pub cache_hit_rate: f64,
    pub error_rate: f64,
    pub ai_usage_rate: f64,
    pub fallback_rate: f64,
    pub avg_latency_ms: f64,
    pub resources: ResourceSnapshot,
    pub status: PerformanceStatus,
}

/// Rolling request metrics, safe to record from any number of tasks.
pub struct PerformanceMonitor {
    window: RwLock<VecDeque<PerformanceSample>>,
    capacity: usize,
    total_requests: AtomicU64,
    resources: RwLock<ResourceSnapshot>,
    sampler_interval: Duration,
}

impl PerformanceMonitor {
    pub fn new(capacity: usize, sampler_interval: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            total_requests: AtomicU64::new(0),
            resources: RwLock::new(ResourceSnapshot::default()),
            sampler_interval,
        }
    }

    /// Record one completed request, evicting the oldest sample when full.
    pub async fn record_request(
        &self,
        latency: Duration,
        cache_hit: bool,
        ai_used: bool,
        fallback_used: bool,
        errored: bool,
    ) {
        self.record(PerformanceSample {
            latency,
            cache_hit,
            ai_used,
            fallback_used,
            errored,
        })
        .await;
    }

    pub async fn record(&self, sample: PerformanceSample) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let mut window = self.window.write().await;
        if window.len() == self.capacity {
            window.pop_front();
        }
        window.push_back(sample);
    }

    pub async fn get_metrics(&self) -> PerformanceMetrics {
        let resources = *self.resources.read().await;
        let window = self.window.read().await;
        let n = window.len();

        let rate = |pred: fn(&PerformanceSample) -> bool| -> f64 {
            if n == 0 {
                0.0
            } else {
                window.iter().filter(|s| pred(s)).count() as f64 / n as f64 * 100.0
            }
        };

        let avg_latency = if n == 0 {
            Duration::ZERO
        } else {
            window.iter().map(|s| s.latency).sum::<Duration>() / n as u32
        };

        PerformanceMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            window_len: n,
            cache_hit_rate: rate(|s| s.cache_hit),
            error_rate: rate(|s| s.errored),
            ai_usage_rate: rate(|s| s.ai_used),
            fallback_rate: rate(|s| s.fallback_used),
            avg_latency_ms: avg_latency.as_secs_f64() * 1000.0,
            resources,
            status: PerformanceStatus::from_latency(avg_latency),
        }
    }

    pub async fn get_suggestions(&self) -> Vec<String> {
        suggestions_for(&self.get_metrics().await)
    }

    pub async fn reset(&self) {
        self.window.write().await.clear();
        self.total_requests.store(0, Ordering::Relaxed);
        info!("Performance metrics reset");
    }

    pub async fn resources(&self) -> ResourceSnapshot {
        *self.resources.read().await
    }

    /// Take one resource sample now.
    pub async fn sample_resources(&self) -> ResourceSnapshot {
        let snapshot = ResourceSnapshot {
            cpu_percent: read_cpu_percent().await.unwrap_or(50.0),
            memory_percent: read_memory_percent().await.unwrap_or(50.0),
            sampled_at: now_millis(),
        };
        *self.resources.write().await = snapshot;
        debug!(
            "Resource sample: cpu {:.1}%, memory {:.1}%",
            snapshot.cpu_percent, snapshot.memory_percent
        );
        snapshot
    }

    /// Periodic resource sampler. Returns once `shutdown` flips to true.
    pub async fn run_sampler(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Resource sampler running every {}s",
            self.sampler_interval.as_secs()
        );
        let mut interval = tokio::time::interval(self.sampler_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sample_resources().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Resource sampler stopped");
    }
}

/// Optimization hints for a metrics snapshot.
pub fn suggestions_for(metrics: &PerformanceMetrics) -> Vec<String> {
    let mut suggestions = Vec::new();

    if metrics.window_len > 10 {
        if metrics.cache_hit_rate < 30.0 {
            suggestions.push("Low cache hit rate - consider increasing cache TTL");
        } else if metrics.cache_hit_rate > 80.0 {
            suggestions.push("Excellent cache performance!");
        }
    }

    if metrics.avg_latency_ms > 5_000.0 {
        suggestions.push("High response times - consider using batch processing");
    } else if metrics.avg_latency_ms > 3_000.0 {
        suggestions.push("Moderate response times - consider optimizing prompts");
    }

    if metrics.error_rate > 10.0 {
        suggestions.push("High error rate - check AI service stability");
    } else if metrics.error_rate > 5.0 {
        suggestions.push("Moderate error rate - consider adding more fallbacks");
    }

    if metrics.fallback_rate > 50.0 {
        suggestions.push("High fallback usage - AI service may be unreliable");
    }

    if metrics.resources.cpu_percent > 80.0 {
        suggestions.push("High CPU usage - consider reducing concurrent requests");
    }
    if metrics.resources.memory_percent > 80.0 {
        suggestions.push("High memory usage - consider clearing cache more frequently");
    }

    if suggestions.is_empty() {
        suggestions.push("Performance is optimal!");
    }
    suggestions.into_iter().map(str::to_string).collect()
}

/// One-minute load average relative to available cores.
async fn read_cpu_percent() -> Option<f64> {
    let raw = tokio::fs::read_to_string("/proc/loadavg").await.ok()?;
    let load: f64 = raw.split_whitespace().next()?.parse().ok()?;
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1) as f64;
    Some((load / cores * 100.0).clamp(0.0, 100.0))
}

async fn read_memory_percent() -> Option<f64> {
    let raw = tokio::fs::read_to_string("/proc/meminfo").await.ok()?;
    let field = |name: &str| -> Option<f64> {
        raw.lines()
            .find(|line| line.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total <= 0.0 {
        return None;
    }
    Some(((1.0 - available / total) * 100.0).clamp(0.0, 100.0))
}
