//! Call-rate limiting for paid collaborators, wrapping governor.

use crate::error::{CollaboratorError, CollaboratorResult};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Caps calls per second to one collaborator. Denied calls are not queued;
/// the caller falls back instead.
pub struct CollaboratorRateLimiter {
    limiter: DefaultDirectRateLimiter,
    collaborator: String,
    requests_per_second: u32,
    denied: AtomicU64,
}

impl CollaboratorRateLimiter {
    /// A zero rate is treated as one call per second.
    pub fn new(collaborator: impl Into<String>, requests_per_second: u32) -> Self {
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(Quota::per_second(rate)),
            collaborator: collaborator.into(),
            requests_per_second: rate.get(),
            denied: AtomicU64::new(0),
        }
    }

    /// Take a permit, or report the collaborator as rate limited.
    pub fn check(&self) -> CollaboratorResult<()> {
        self.limiter.check().map_err(|_| {
            self.denied.fetch_add(1, Ordering::Relaxed);
            debug!("Rate limit reached for {}", self.collaborator);
            CollaboratorError::RateLimited {
                collaborator: self.collaborator.clone(),
            }
        })
    }

    pub fn requests_per_second(&self) -> u32 {
        self.requests_per_second
    }

    /// Calls denied since construction.
    pub fn denied(&self) -> u64 {
        self.denied.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_is_capped() {
        let limiter = CollaboratorRateLimiter::new("openai", 3);
        let allowed = (0..10).filter(|_| limiter.check().is_ok()).count();
        assert_eq!(allowed, 3);
        assert_eq!(limiter.denied(), 7);
    }

    #[test]
    fn test_denial_is_rate_limited_error() {
        let limiter = CollaboratorRateLimiter::new("openai", 1);
        assert!(limiter.check().is_ok());
        assert_eq!(
            limiter.check(),
            Err(CollaboratorError::RateLimited {
                collaborator: "openai".to_string()
            })
        );
    }

    #[test]
    fn test_zero_rate_still_admits() {
        let limiter = CollaboratorRateLimiter::new("openai", 0);
        assert_eq!(limiter.requests_per_second(), 1);
        assert!(limiter.check().is_ok());
    }
}
