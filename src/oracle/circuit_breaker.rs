//! Circuit breaker for external collaborator health.
//!
//! A collaborator that keeps failing is first marked degraded, then put in a
//! cooldown during which calls are skipped outright and answered with a
//! heuristic fallback. After the cooldown it is retried in degraded state.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Health state of one collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollaboratorState {
    Healthy,
    /// Failing but still called
    Degraded,
    /// Not called until the cooldown elapses
    CoolingDown,
}

#[derive(Debug, Clone)]
struct CollaboratorHealth {
    state: CollaboratorState,
    consecutive_failures: u32,
    recent: VecDeque<bool>,
    cooldown_start: Option<Instant>,
}

impl CollaboratorHealth {
    fn new() -> Self {
        Self {
            state: CollaboratorState::Healthy,
            consecutive_failures: 0,
            recent: VecDeque::new(),
            cooldown_start: None,
        }
    }

    fn push(&mut self, success: bool, sample_size: usize) {
        self.recent.push_back(success);
        while self.recent.len() > sample_size {
            self.recent.pop_front();
        }
    }

    fn success_rate(&self) -> f64 {
        if self.recent.is_empty() {
            return 1.0;
        }
        self.recent.iter().filter(|ok| **ok).count() as f64 / self.recent.len() as f64
    }
}

/// Point-in-time health figures for one collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct CollaboratorHealthStats {
    pub state: CollaboratorState,
    pub consecutive_failures: u32,
    pub success_rate: f64,
    pub attempts: usize,
}

/// Per-collaborator circuit breaker.
pub struct CircuitBreaker {
    health: HashMap<String, CollaboratorHealth>,
    failure_threshold: u32,
    cooldown: Duration,
    sample_size: usize,
    /// Below this success rate over a full sample a degraded collaborator cools down
    min_success_rate: f64,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration, sample_size: usize) -> Self {
        Self {
            health: HashMap::new(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
            sample_size: sample_size.max(1),
            min_success_rate: 0.3,
        }
    }

    #[instrument(skip(self))]
    pub fn record_success(&mut self, collaborator: &str) {
        let sample_size = self.sample_size;
        let health = self.entry(collaborator);
        health.consecutive_failures = 0;
        health.push(true, sample_size);

        if health.state == CollaboratorState::Degraded && health.success_rate() > 0.7 {
            health.state = CollaboratorState::Healthy;
            debug!("{} recovered to healthy", collaborator);
        }
    }

    #[instrument(skip(self))]
    pub fn record_failure(&mut self, collaborator: &str) {
        let threshold = self.failure_threshold;
        let sample_size = self.sample_size;
        let min_success_rate = self.min_success_rate;
        let health = self.entry(collaborator);
        health.consecutive_failures += 1;
        health.push(false, sample_size);

        match health.state {
            CollaboratorState::Healthy if health.consecutive_failures >= threshold => {
                health.state = CollaboratorState::Degraded;
                warn!(
                    "{} degraded after {} consecutive failures",
                    collaborator, health.consecutive_failures
                );
            }
            CollaboratorState::Degraded
                if health.consecutive_failures >= threshold * 2
                    || (health.recent.len() >= sample_size
                        && health.success_rate() < min_success_rate) =>
            {
                health.state = CollaboratorState::CoolingDown;
                health.cooldown_start = Some(Instant::now());
                warn!(
                    "{} cooling down: {} consecutive failures, {:.0}% success",
                    collaborator,
                    health.consecutive_failures,
                    health.success_rate() * 100.0
                );
            }
            _ => {}
        }
    }

    /// Whether `collaborator` may be called now. Ends an elapsed cooldown.
    pub fn allow(&mut self, collaborator: &str) -> bool {
        let cooldown = self.cooldown;
        let health = self.entry(collaborator);

        if health.state != CollaboratorState::CoolingDown {
            return true;
        }

        let elapsed = health
            .cooldown_start
            .map(|start| start.elapsed() >= cooldown)
            .unwrap_or(true);
        if elapsed {
            health.state = CollaboratorState::Degraded;
            health.cooldown_start = None;
            health.consecutive_failures = 0;
            debug!("{} cooldown over, retrying in degraded state", collaborator);
        }
        elapsed
    }

    pub fn state(&self, collaborator: &str) -> CollaboratorState {
        self.health
            .get(collaborator)
            .map(|h| h.state)
            .unwrap_or(CollaboratorState::Healthy)
    }

    pub fn stats(&self) -> HashMap<String, CollaboratorHealthStats> {
        self.health
            .iter()
            .map(|(name, h)| {
                (
                    name.clone(),
                    CollaboratorHealthStats {
                        state: h.state,
                        consecutive_failures: h.consecutive_failures,
                        success_rate: h.success_rate(),
                        attempts: h.recent.len(),
                    },
                )
            })
            .collect()
    }

    pub fn reset(&mut self) {
        self.health.clear();
        debug!("Reset collaborator health");
    }

    fn entry(&mut self, collaborator: &str) -> &mut CollaboratorHealth {
        self.health
            .entry(collaborator.to_string())
            .or_insert_with(CollaboratorHealth::new)
    }
}
