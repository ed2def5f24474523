//! Core types and data structures for the TruthLens analysis pipeline.

use serde::{Deserialize, Serialize};

/// Market identifier as published by the market feed.
pub type MarketId = String;

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Scheduling priority of an analysis request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    High = 1,
    Medium = 2,
    Low = 3,
}

impl Priority {
    /// Numeric rank, lower runs first.
    pub fn rank(&self) -> u8 {
        *self as u8
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// A piece of content waiting to be scored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Text to analyze
    pub content: String,
    /// Where the content was found, if known
    pub source_url: Option<String>,
    /// Market this content belongs to
    pub market_id: MarketId,
    pub priority: Priority,
}

impl AnalysisRequest {
    pub fn new(content: impl Into<String>, market_id: impl Into<MarketId>) -> Self {
        Self {
            content: content.into(),
            source_url: None,
            market_id: market_id.into(),
            priority: Priority::default(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Source URL or an empty string.
    pub fn url(&self) -> &str {
        self.source_url.as_deref().unwrap_or("")
    }
}

/// Where an analysis result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    CacheHit,
    AiFused,
    Fallback,
}

/// Why the heuristic fallback was used instead of an AI-fused result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackReason {
    /// Heuristics were conclusive, the AI call was skipped
    ShortCircuit,
    /// The AI collaborator errored or returned garbage
    CollaboratorFailure,
    /// The AI collaborator or the fast-track bound timed out
    Timeout,
    /// The AI collaborator is cooling down after repeated failures
    CircuitOpen,
}

/// Keyword-pattern manipulation signals, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternSignals {
    pub pump_indicators: f64,
    pub dump_indicators: f64,
    pub urgency_level: f64,
    pub emotional_manipulation: f64,
    pub overall_manipulation_risk: f64,
}

impl PatternSignals {
    /// Names of the categories scoring above `threshold`.
    pub fn flagged(&self, threshold: f64) -> Vec<String> {
        [
            ("pump_indicators", self.pump_indicators),
            ("dump_indicators", self.dump_indicators),
            ("urgency_level", self.urgency_level),
            ("emotional_manipulation", self.emotional_manipulation),
            ("overall_manipulation_risk", self.overall_manipulation_risk),
        ]
        .into_iter()
        .filter(|(_, v)| *v > threshold)
        .map(|(name, _)| name.to_string())
        .collect()
    }
}

/// Reputation tier of a source domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainTier {
    High,
    Medium,
    Low,
    Unknown,
    /// No URL was supplied
    Absent,
}

/// Domain reputation signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DomainSignals {
    /// Reputation score (0-100)
    pub domain_score: f64,
    /// Confidence in the classification (0-1)
    pub confidence: f64,
    pub tier: DomainTier,
}

impl Default for DomainSignals {
    fn default() -> Self {
        Self {
            domain_score: 50.0,
            confidence: 0.0,
            tier: DomainTier::Absent,
        }
    }
}

/// Credibility/risk assessment for one piece of content.
///
/// Every numeric field is clamped to its declared range at construction time
/// by the scorer, whatever the upstream collaborators returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Credibility (0-100)
    pub credibility_score: f64,
    /// Manipulation risk (0-100)
    pub risk_index: f64,
    /// Confidence (0-1)
    pub confidence: f64,
    pub reasoning: Vec<String>,
    /// Risk factors reported by the AI collaborator or derived from patterns
    pub risk_factors: Vec<String>,
    pub pattern_signals: PatternSignals,
    pub domain_signals: DomainSignals,
    pub provenance: Provenance,
    pub fallback_reason: Option<FallbackReason>,
    /// Unix milliseconds
    pub produced_at: u64,
}

impl AnalysisResult {
    pub fn is_fallback(&self) -> bool {
        self.provenance == Provenance::Fallback
    }

    /// Same result, re-tagged as served from cache.
    pub fn as_cache_hit(mut self) -> Self {
        self.provenance = Provenance::CacheHit;
        self
    }
}

/// Raw market record from the market feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    #[serde(alias = "marketId")]
    pub market_id: MarketId,
    #[serde(default)]
    pub question: String,
    #[serde(default, alias = "price24h")]
    pub price_24h: Vec<f64>,
    #[serde(default, alias = "volume24h")]
    pub volume_24h: Vec<f64>,
    #[serde(default)]
    pub current_price: f64,
    #[serde(default)]
    pub market_cap: f64,
    #[serde(default)]
    pub change_24h: f64,
}

/// Raw comment record from the comment feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    #[serde(alias = "marketId")]
    pub market_id: MarketId,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub score: i64,
}
