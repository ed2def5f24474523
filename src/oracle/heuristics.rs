//! Fast keyword and domain-reputation heuristics.
//!
//! These run before any AI call, decide whether the call is worth making at
//! all, and produce the fallback result when it fails.

use crate::types::{
    now_millis, AnalysisResult, DomainSignals, DomainTier, FallbackReason, PatternSignals,
    Provenance,
};
use tracing::debug;
use url::Url;

const PUMP_SIGNALS: &[&str] = &[
    "to the moon",
    "diamond hands",
    "hodl",
    "buy the dip",
    "rocket",
    "🚀",
    "moon",
    "💎",
    "ape in",
    "yolo",
    "guaranteed",
    "100x",
];

const DUMP_SIGNALS: &[&str] = &[
    "sell everything",
    "crash incoming",
    "bubble burst",
    "ponzi",
    "scam",
    "rug pull",
    "exit liquidity",
];

const URGENCY_WORDS: &[&str] = &[
    "now",
    "immediately",
    "last chance",
    "limited time",
    "don't miss",
    "act fast",
    "urgent",
    "breaking",
];

const EMOTIONAL_TRIGGERS: &[&str] = &[
    "fear",
    "greed",
    "fomo",
    "panic",
    "euphoria",
    "devastating",
    "amazing",
    "incredible",
    "shocking",
    "!!!",
];

const HIGH_REPUTATION: &[&str] = &[
    "reuters.com",
    "bloomberg.com",
    "wsj.com",
    "ft.com",
    "coindesk.com",
    "cointelegraph.com",
    "sec.gov",
    "cftc.gov",
];

const MEDIUM_REPUTATION: &[&str] = &[
    "yahoo.com",
    "marketwatch.com",
    "investing.com",
    "coinmarketcap.com",
    "coingecko.com",
];

const LOW_REPUTATION: &[&str] = &[
    "blogspot.com",
    "wordpress.com",
    "t.me",
    "telegram",
    ".biz",
    ".info",
    "pump.fun",
];

/// Pattern risk above which the AI call is skipped.
pub const SHORT_CIRCUIT_PATTERN_RISK: f64 = 0.7;
/// Domain score below which the AI call is skipped.
pub const SHORT_CIRCUIT_DOMAIN_SCORE: f64 = 30.0;
/// Fixed confidence of every heuristic-only result.
pub const FALLBACK_CONFIDENCE: f64 = 0.4;
/// Category threshold for listing a pattern as a risk factor.
const RISK_FACTOR_THRESHOLD: f64 = 0.3;

/// Keyword and domain heuristics with fixed word lists.
#[derive(Debug, Clone, Default)]
pub struct Heuristics;

impl Heuristics {
    pub fn new() -> Self {
        Self
    }

    /// Score keyword manipulation patterns.
    ///
    /// Each category counts distinct list entries found in the lowercased
    /// text, normalized by word count. The overall score blends the strongest
    /// category with the category mean, so one saturated category is enough
    /// to push content past the midpoint.
    pub fn pattern_signals(&self, content: &str) -> PatternSignals {
        let lowered = content.to_lowercase();
        let words = content.split_whitespace().count() as f64;

        let normalize = |list: &[&str], density: f64| -> f64 {
            let hits = list.iter().filter(|p| lowered.contains(*p)).count() as f64;
            (hits / (words * density).max(1.0)).min(1.0)
        };

        let pump = normalize(PUMP_SIGNALS, 0.1);
        let dump = normalize(DUMP_SIGNALS, 0.1);
        let urgency = normalize(URGENCY_WORDS, 0.05);
        let emotion = normalize(EMOTIONAL_TRIGGERS, 0.1);

        let categories = [pump, dump, urgency, emotion];
        let strongest = categories.iter().cloned().fold(0.0, f64::max);
        let mean = categories.iter().sum::<f64>() / categories.len() as f64;

        PatternSignals {
            pump_indicators: pump,
            dump_indicators: dump,
            urgency_level: urgency,
            emotional_manipulation: emotion,
            overall_manipulation_risk: (0.6 * strongest + 0.4 * mean).clamp(0.0, 1.0),
        }
    }

    /// Classify a source URL against the reputation lists.
    pub fn domain_signals(&self, url: &str) -> DomainSignals {
        if url.trim().is_empty() {
            return DomainSignals::default();
        }

        let host = match Url::parse(url.trim()) {
            Ok(parsed) => parsed.host_str().unwrap_or("").to_lowercase(),
            Err(e) => {
                debug!("Unparseable source url {}: {}", url, e);
                return DomainSignals {
                    domain_score: 50.0,
                    confidence: 0.3,
                    tier: DomainTier::Unknown,
                };
            }
        };

        let listed = |list: &[&str]| list.iter().any(|entry| host_matches(&host, entry));
        let (domain_score, confidence, tier) = if listed(HIGH_REPUTATION) {
            (85.0, 0.9, DomainTier::High)
        } else if listed(MEDIUM_REPUTATION) {
            (65.0, 0.7, DomainTier::Medium)
        } else if listed(LOW_REPUTATION) {
            (25.0, 0.8, DomainTier::Low)
        } else {
            (50.0, 0.5, DomainTier::Unknown)
        };

        DomainSignals {
            domain_score,
            confidence,
            tier,
        }
    }

    /// Whether the heuristics alone are conclusive enough to skip the AI call.
    pub fn is_conclusive(&self, patterns: &PatternSignals, domain: &DomainSignals) -> bool {
        patterns.overall_manipulation_risk > SHORT_CIRCUIT_PATTERN_RISK
            || domain.domain_score < SHORT_CIRCUIT_DOMAIN_SCORE
    }

    /// Heuristic-only result for `content`, computing the signals afresh.
    pub fn fallback(&self, content: &str, url: &str, reason: FallbackReason) -> AnalysisResult {
        let patterns = self.pattern_signals(content);
        let domain = self.domain_signals(url);
        self.fallback_from(patterns, domain, reason)
    }

    /// Heuristic-only result from already computed signals.
    pub fn fallback_from(
        &self,
        patterns: PatternSignals,
        domain: DomainSignals,
        reason: FallbackReason,
    ) -> AnalysisResult {
        let risk = patterns.overall_manipulation_risk;
        let credibility = (domain.domain_score - risk * 40.0).clamp(10.0, 90.0);
        let manipulation = (risk * 80.0 + 10.0).clamp(10.0, 90.0);

        let headline = match reason {
            FallbackReason::ShortCircuit => "Heuristic signals conclusive, AI analysis skipped",
            _ => "Fallback pattern-based analysis (AI unavailable)",
        };

        AnalysisResult {
            credibility_score: credibility,
            risk_index: manipulation,
            confidence: FALLBACK_CONFIDENCE,
            reasoning: vec![
                headline.to_string(),
                format!(
                    "Pattern manipulation risk {:.2}, domain score {:.0}",
                    risk, domain.domain_score
                ),
            ],
            risk_factors: patterns.flagged(RISK_FACTOR_THRESHOLD),
            pattern_signals: patterns,
            domain_signals: domain,
            provenance: Provenance::Fallback,
            fallback_reason: Some(reason),
            produced_at: now_millis(),
        }
    }
}

/// Match a host against a list entry on label boundaries.
///
/// `.biz` style entries match a suffix, dotless entries match any single
/// label, anything else matches the domain itself or one of its subdomains.
fn host_matches(host: &str, entry: &str) -> bool {
    if entry.starts_with('.') {
        host.ends_with(entry)
    } else if !entry.contains('.') {
        host.split('.').any(|label| label == entry)
    } else {
        host == entry
            || host
                .strip_suffix(entry)
                .is_some_and(|prefix| prefix.ends_with('.'))
    }
}
