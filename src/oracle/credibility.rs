//! Per-market credibility aggregation over linked sources.

use crate::oracle::types::LinkScore;
use crate::types::AnalysisResult;
use url::Url;

const REPUTABLE_HOSTS: &[&str] = &["reuters", "bbc", "apnews", "bloomberg", "ft.com", "wsj.com"];
const LOW_REPUTATION_HOSTS: &[&str] = &[".biz", "blogspot", "substack", "telegram", "t.me"];

/// Domain score used when neither the content nor the domain signal carries
/// any confidence.
pub fn domain_reputation_fallback(url: &str) -> f64 {
    let host = match Url::parse(url) {
        Ok(parsed) => parsed.host_str().unwrap_or("").to_lowercase(),
        Err(_) => return 20.0,
    };
    if REPUTABLE_HOSTS.iter().any(|k| host.contains(k)) {
        90.0
    } else if LOW_REPUTATION_HOSTS.iter().any(|k| host.contains(k)) {
        30.0
    } else {
        55.0
    }
}

/// Rewards concrete figures and direct quotes.
pub fn citation_score_fallback(text: &str) -> f64 {
    if text.is_empty() {
        return 40.0;
    }
    let numeric = text
        .chars()
        .any(|c| c.is_ascii_digit() || c == '%' || c == '$');
    let quoted = text.contains('"');

    let mut score = 40.0;
    if numeric {
        score += 20.0;
    }
    if quoted {
        score += 10.0;
    }
    score
}

/// Combine one link's content analysis with its domain reputation.
pub fn score_link(url: &str, text: &str, analysis: &AnalysisResult) -> LinkScore {
    let content_score = analysis.credibility_score;
    let content_confidence = analysis.confidence;
    let domain_score = analysis.domain_signals.domain_score;
    let domain_confidence = analysis.domain_signals.confidence;

    let weight = content_confidence + domain_confidence;
    let score = if weight > 0.0 {
        (content_score * content_confidence + domain_score * domain_confidence) / weight
    } else {
        0.6 * domain_reputation_fallback(url) + 0.3 * citation_score_fallback(text) + 7.0
    };

    LinkScore {
        url: url.to_string(),
        score: score.clamp(0.0, 100.0),
        confidence: (weight / 2.0).clamp(0.0, 1.0),
    }
}

/// Aggregate credibility for a market.
#[derive(Debug, Clone, PartialEq)]
pub struct CredibilitySummary {
    /// Mean link score, 50 with no links
    pub score: u8,
    /// Mean link confidence, 0.3 with no links
    pub confidence: f64,
    /// Spread between the best and worst link
    pub link_variance: f64,
    pub reasons: Vec<String>,
}

pub fn summarize(links: &[LinkScore]) -> CredibilitySummary {
    if links.is_empty() {
        return CredibilitySummary {
            score: 50,
            confidence: 0.3,
            link_variance: 0.0,
            reasons: vec![
                "No sources found; using neutral baseline.".to_string(),
                "Average analysis confidence: 0.30".to_string(),
            ],
        };
    }

    let n = links.len() as f64;
    let mean = links.iter().map(|l| l.score).sum::<f64>() / n;
    let confidence = links.iter().map(|l| l.confidence).sum::<f64>() / n;
    let max = links.iter().map(|l| l.score).fold(f64::MIN, f64::max);
    let min = links.iter().map(|l| l.score).fold(f64::MAX, f64::min);

    CredibilitySummary {
        score: mean.round().clamp(0.0, 100.0) as u8,
        confidence,
        link_variance: max - min,
        reasons: vec![
            format!("Analyzed {} source(s).", links.len()),
            format!("Average analysis confidence: {:.2}", confidence),
            "Combined content credibility and domain reputation analysis.".to_string(),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::heuristics::Heuristics;
    use crate::types::{DomainSignals, DomainTier, FallbackReason};

    fn link(score: f64, confidence: f64) -> LinkScore {
        LinkScore {
            url: "https://example.org".to_string(),
            score,
            confidence,
        }
    }

    #[test]
    fn test_fallback_helpers() {
        assert_eq!(domain_reputation_fallback("https://www.bbc.co.uk/news"), 90.0);
        assert_eq!(domain_reputation_fallback("https://x.substack.com/p/1"), 30.0);
        assert_eq!(domain_reputation_fallback("https://example.org"), 55.0);
        assert_eq!(domain_reputation_fallback("::::"), 20.0);

        assert_eq!(citation_score_fallback(""), 40.0);
        assert_eq!(citation_score_fallback("up 5%"), 60.0);
        assert_eq!(citation_score_fallback("he said \"soon\""), 50.0);
    }

    #[test]
    fn test_confidence_weighted_link_score() {
        let mut analysis = Heuristics::new().fallback("", "", FallbackReason::Timeout);
        analysis.credibility_score = 80.0;
        analysis.confidence = 0.5;
        analysis.domain_signals = DomainSignals {
            domain_score: 50.0,
            confidence: 0.5,
            tier: DomainTier::Unknown,
        };

        let scored = score_link("https://example.org", "text", &analysis);
        assert_eq!(scored.score, 65.0);
        assert_eq!(scored.confidence, 0.5);
    }

    #[test]
    fn test_zero_confidence_uses_fallback_blend() {
        let mut analysis = Heuristics::new().fallback("", "", FallbackReason::Timeout);
        analysis.confidence = 0.0;
        analysis.domain_signals.confidence = 0.0;

        let scored = score_link("https://www.reuters.com/a", "", &analysis);
        // 0.6 * 90 + 0.3 * 40 + 7
        assert!((scored.score - 73.0).abs() < 1e-9);
        assert_eq!(scored.confidence, 0.0);
    }

    #[test]
    fn test_summary() {
        let empty = summarize(&[]);
        assert_eq!(empty.score, 50);
        assert_eq!(empty.confidence, 0.3);
        assert_eq!(empty.link_variance, 0.0);

        let summary = summarize(&[link(80.0, 0.8), link(40.0, 0.4), link(60.0, 0.6)]);
        assert_eq!(summary.score, 60);
        assert!((summary.confidence - 0.6).abs() < 1e-9);
        assert_eq!(summary.link_variance, 40.0);
    }
}
