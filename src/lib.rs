//! TruthLens oracle - credibility and risk analysis for prediction-market content
//!
//! This crate fuses fast heuristics with an external AI judgment behind a
//! two-tier expiring cache, schedules analyses by priority, and keeps the
//! latest per-market report for attestation.

pub mod error;
pub mod types;
pub mod oracle;

// Re-export main types for convenience
pub use error::{CollaboratorError, PipelineError};
pub use types::{AnalysisRequest, AnalysisResult, Priority, Provenance};
