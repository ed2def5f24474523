//! Market risk index.
//!
//! Five bounded components with fixed weights: on-chain anomaly (0.30),
//! order flow (0.20), AI sentiment volatility (0.30), source-quality
//! variance (0.10) and an illiquidity penalty (0.10).

use crate::oracle::ai_judge::{SentimentJudge, SentimentJudgment};
use crate::types::{Comment, MarketSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const ORDER_FLOW_PLACEHOLDER: f64 = 40.0;
const SENTIMENT_FALLBACK: f64 = 30.0;
const ILLIQUID_VOLUME: f64 = 800.0;
const ILLIQUIDITY_PENALTY: f64 = 10.0;

/// Standard scores using the population standard deviation. A constant
/// series scores zero everywhere.
pub fn zscores(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    if std == 0.0 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - mean) / std).collect()
}

/// Deviation of the latest price/volume sample from its trailing window.
pub fn onchain_anomaly(prices: &[f64], volumes: &[f64]) -> f64 {
    let last_abs = |series: &[f64]| zscores(series).last().map(|z| z.abs()).unwrap_or(0.0);
    let z = last_abs(prices).max(last_abs(volumes));
    (60.0 + 10.0 * z).round().min(100.0)
}

/// Sentiment volatility from a sentiment judgment.
pub fn sentiment_volatility(judgment: &SentimentJudgment) -> f64 {
    let manipulation = judgment.manipulation_risk * 100.0;
    let extremity = judgment.sentiment_score.abs() * 50.0;
    let coordination = if judgment.coordinated_activity { 30.0 } else { 0.0 };
    (0.5 * manipulation + 0.3 * extremity + 0.2 * coordination)
        .round()
        .clamp(0.0, 100.0)
}

/// Penalty when the latest volume is thin or missing.
pub fn illiquidity_penalty(volumes: &[f64]) -> f64 {
    match volumes.last() {
        Some(v) if *v >= ILLIQUID_VOLUME => 0.0,
        _ => ILLIQUIDITY_PENALTY,
    }
}

/// Weighted components behind a risk index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskComponents {
    pub onchain_anomaly: f64,
    pub order_flow: f64,
    pub sentiment_volatility: f64,
    pub link_quality_variance: f64,
    pub illiquidity: f64,
}

impl RiskComponents {
    pub fn weighted(&self) -> u8 {
        let risk = 0.30 * self.onchain_anomaly
            + 0.20 * self.order_flow
            + 0.30 * self.sentiment_volatility
            + 0.10 * self.link_quality_variance
            + 0.10 * self.illiquidity;
        risk.round().clamp(0.0, 100.0) as u8
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    pub risk_index: u8,
    pub components: RiskComponents,
    pub reasons: Vec<String>,
}

/// Computes the risk index, consulting the sentiment judge when there are
/// comments to judge.
pub struct RiskScorer {
    sentiment: Arc<dyn SentimentJudge>,
    timeout: Duration,
}

impl RiskScorer {
    pub fn new(sentiment: Arc<dyn SentimentJudge>, timeout: Duration) -> Self {
        Self { sentiment, timeout }
    }

    async fn judge_sentiment(
        &self,
        comments: &[Comment],
        question: &str,
    ) -> Option<SentimentJudgment> {
        if comments.is_empty() {
            return None;
        }
        match tokio::time::timeout(self.timeout, self.sentiment.judge(comments, question)).await {
            Ok(Ok(judgment)) => Some(judgment.bounded()),
            Ok(Err(e)) => {
                warn!("Sentiment judgment unavailable: {}", e);
                None
            }
            Err(_) => {
                warn!("Sentiment judgment timed out after {:?}", self.timeout);
                None
            }
        }
    }

    #[instrument(skip(self, market, comments), fields(market = %market.market_id))]
    pub async fn score(
        &self,
        market: &MarketSnapshot,
        link_quality_variance: f64,
        comments: &[Comment],
    ) -> RiskAssessment {
        let question = if market.question.is_empty() {
            "Market prediction"
        } else {
            market.question.as_str()
        };
        let sentiment = self.judge_sentiment(comments, question).await;

        let components = RiskComponents {
            onchain_anomaly: onchain_anomaly(&market.price_24h, &market.volume_24h),
            order_flow: ORDER_FLOW_PLACEHOLDER,
            sentiment_volatility: sentiment
                .as_ref()
                .map(sentiment_volatility)
                .unwrap_or(SENTIMENT_FALLBACK),
            link_quality_variance: link_quality_variance.clamp(0.0, 100.0),
            illiquidity: illiquidity_penalty(&market.volume_24h),
        };
        let risk_index = components.weighted();

        let mut reasons = vec![
            format!("On-chain anomaly detection: {:.0}/100", components.onchain_anomaly),
            format!("Order flow analysis: {:.0}/100 (placeholder)", components.order_flow),
            format!("AI sentiment analysis: {:.0}/100", components.sentiment_volatility),
            format!("Source quality variance: {:.0}", components.link_quality_variance),
            format!("Illiquidity penalty: {:.0}", components.illiquidity),
        ];
        if let Some(s) = &sentiment {
            if s.coordinated_activity {
                reasons.push("Coordinated manipulation activity detected".to_string());
            }
            if s.manipulation_risk > 0.7 {
                reasons.push("High manipulation risk in sentiment patterns".to_string());
            }
            if s.sentiment_score.abs() > 0.8 {
                reasons.push("Extreme sentiment detected (potential manipulation)".to_string());
            }
        }

        debug!("Risk index {} for {}", risk_index, market.market_id);
        RiskAssessment {
            risk_index,
            components,
            reasons,
        }
    }
}
