//! Error taxonomy for the analysis pipeline.
//!
//! None of these escape the scorer or scheduler boundary: cache errors are
//! logged and read as misses, collaborator errors and timeouts become
//! heuristic fallbacks.

use crate::types::FallbackReason;
use std::time::Duration;
use thiserror::Error;

/// Failure of an external collaborator (AI judge, sentiment judge, feeds).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollaboratorError {
    #[error("{collaborator} timed out after {timeout:?}")]
    Timeout {
        collaborator: String,
        timeout: Duration,
    },

    #[error("Rate limited calling {collaborator}")]
    RateLimited { collaborator: String },

    #[error("{collaborator} is cooling down after repeated failures")]
    CircuitOpen { collaborator: String },

    #[error("Malformed response from {collaborator}: {reason}")]
    Malformed { collaborator: String, reason: String },

    #[error("Request to {collaborator} failed: {reason}")]
    Request { collaborator: String, reason: String },

    #[error("{collaborator} is not configured")]
    NotConfigured { collaborator: String },
}

impl CollaboratorError {
    /// Fallback tag recorded on results produced after this error.
    pub fn fallback_reason(&self) -> FallbackReason {
        match self {
            CollaboratorError::Timeout { .. } => FallbackReason::Timeout,
            CollaboratorError::CircuitOpen { .. } => FallbackReason::CircuitOpen,
            _ => FallbackReason::CollaboratorFailure,
        }
    }

    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CollaboratorError::Timeout { .. }
                | CollaboratorError::RateLimited { .. }
                | CollaboratorError::Request { .. }
        )
    }
}

/// Unreadable or corrupt persisted cache record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Cache record {key} unreadable: {reason}")]
pub struct CacheIoError {
    pub key: String,
    pub reason: String,
}

/// Umbrella error for pipeline internals.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error(transparent)]
    CacheIo(#[from] CacheIoError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("Fast-track scoring exceeded {0:?}")]
    SchedulingTimeout(Duration),
}

pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;
