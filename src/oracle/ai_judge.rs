//! External AI judgment collaborators.
//!
//! The scorer only sees the [`AiJudge`] and [`SentimentJudge`] traits. The
//! OpenAI implementations below talk to a chat-completions endpoint, retry
//! transient failures, and tolerate replies that are not clean JSON.

use crate::error::{CollaboratorError, CollaboratorResult};
use crate::oracle::heuristics::Heuristics;
use crate::oracle::types::OracleConfig;
use crate::types::Comment;
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::{strategy::ExponentialBackoff, RetryIf};
use tracing::{debug, instrument, warn};

/// Raw AI verdict on one piece of content. Values are as reported; the scorer
/// clamps them before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiJudgment {
    /// Nominally 0-100
    pub credibility: f64,
    /// Nominally 0-100
    pub manipulation_risk: f64,
    /// Nominally 0-1
    pub confidence: f64,
    pub reasoning: Vec<String>,
    pub risk_factors: Vec<String>,
}

/// AI verdict on the comment stream of one market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentJudgment {
    /// -1 (very bearish) to 1 (very bullish)
    pub sentiment_score: f64,
    /// 0-1
    pub manipulation_risk: f64,
    pub coordinated_activity: bool,
    /// 0-1
    pub confidence: f64,
    pub patterns: Vec<String>,
}

impl SentimentJudgment {
    /// Clamp every field into its declared range.
    pub fn bounded(mut self) -> Self {
        self.sentiment_score = finite_or(self.sentiment_score, 0.0).clamp(-1.0, 1.0);
        self.manipulation_risk = finite_or(self.manipulation_risk, 0.5).clamp(0.0, 1.0);
        self.confidence = finite_or(self.confidence, 0.5).clamp(0.0, 1.0);
        self.patterns.truncate(5);
        self
    }
}

/// Credibility/manipulation judgment for a piece of content.
#[async_trait]
pub trait AiJudge: Send + Sync {
    /// Collaborator name used for circuit breaking and logs.
    fn name(&self) -> &str;

    async fn judge(&self, content: &str, url: &str) -> CollaboratorResult<AiJudgment>;
}

/// Sentiment and coordination judgment over a market's comments.
#[async_trait]
pub trait SentimentJudge: Send + Sync {
    fn name(&self) -> &str;

    async fn judge(&self, comments: &[Comment], question: &str)
        -> CollaboratorResult<SentimentJudgment>;
}

/// Minimum non-blank length worth sending to the AI.
const MIN_CONTENT_CHARS: usize = 10;
/// Comments sent per sentiment request.
const MAX_SENTIMENT_COMMENTS: usize = 10;
const MAX_COMMENT_CHARS: usize = 200;
const MAX_PROMPT_CONTENT_CHARS: usize = 500;

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Thin chat-completions client shared by both judges.
pub struct OpenAiClient {
    http: Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    retry_attempts: usize,
}

impl OpenAiClient {
    pub fn new(config: &OracleConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.ai_timeout())
            .build()
            .context("Failed to build OpenAI HTTP client")?;

        Ok(Self {
            http,
            api_key: config.openai_api_key.clone(),
            model: config.openai_model.clone(),
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            retry_attempts: config.feed_retry_attempts,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// One completion, retrying transient failures with exponential backoff.
    #[instrument(skip(self, system, prompt))]
    pub async fn complete(
        &self,
        collaborator: &str,
        system: &str,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> CollaboratorResult<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| CollaboratorError::NotConfigured {
                collaborator: collaborator.to_string(),
            })?;

        let strategy = ExponentialBackoff::from_millis(100)
            .max_delay(Duration::from_secs(2))
            .take(self.retry_attempts);

        RetryIf::spawn(
            strategy,
            || self.complete_once(collaborator, api_key, system, prompt, temperature, max_tokens),
            |e: &CollaboratorError| e.is_transient(),
        )
        .await
    }

    async fn complete_once(
        &self,
        collaborator: &str,
        api_key: &str,
        system: &str,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> CollaboratorResult<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature,
            max_tokens,
        };

        let request_error = |reason: String| CollaboratorError::Request {
            collaborator: collaborator.to_string(),
            reason,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| request_error(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CollaboratorError::RateLimited {
                collaborator: collaborator.to_string(),
            });
        }
        if !status.is_success() {
            return Err(request_error(format!("HTTP {}", status)));
        }

        let body: ChatResponse = response.json().await.map_err(|e| CollaboratorError::Malformed {
            collaborator: collaborator.to_string(),
            reason: e.to_string(),
        })?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| CollaboratorError::Malformed {
                collaborator: collaborator.to_string(),
                reason: "empty completion".to_string(),
            })
    }
}

/// Pulls scores out of free text when the reply is not JSON.
struct ScoreExtractor {
    credibility: Regex,
    manipulation: Regex,
    confidence: Regex,
}

impl ScoreExtractor {
    fn new() -> Result<Self> {
        Ok(Self {
            credibility: Regex::new(r#"(?i)credibility(?:_score)?["']?\s*:\s*(\d+(?:\.\d+)?)"#)?,
            manipulation: Regex::new(r#"(?i)manipulation(?:_risk)?["']?\s*:\s*(\d+(?:\.\d+)?)"#)?,
            confidence: Regex::new(r#"(?i)confidence["']?\s*:\s*(\d+(?:\.\d+)?)"#)?,
        })
    }

    fn capture(re: &Regex, text: &str) -> Option<f64> {
        re.captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    fn extract(&self, text: &str) -> Option<AiJudgment> {
        let credibility = Self::capture(&self.credibility, text);
        let manipulation = Self::capture(&self.manipulation, text);
        let confidence = Self::capture(&self.confidence, text);

        if credibility.is_none() && manipulation.is_none() && confidence.is_none() {
            return None;
        }

        let summary: String = text.chars().take(200).collect();
        Some(AiJudgment {
            credibility: credibility.unwrap_or(50.0),
            manipulation_risk: manipulation.unwrap_or(50.0),
            confidence: confidence.unwrap_or(0.5).min(1.0),
            reasoning: vec![summary],
            risk_factors: vec!["parsing-fallback".to_string()],
        })
    }
}

fn finite_or(value: f64, default: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        default
    }
}

fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn strings(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Parse a JSON object out of a reply, tolerating code fences and prose.
fn json_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    if let Ok(Value::Object(map)) = serde_json::from_str(text.trim()) {
        return Some(map);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str(&text[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Content judge backed by OpenAI chat completions.
pub struct OpenAiJudge {
    client: Arc<OpenAiClient>,
    heuristics: Heuristics,
    extractor: ScoreExtractor,
}

impl OpenAiJudge {
    pub fn new(client: Arc<OpenAiClient>) -> Result<Self> {
        Ok(Self {
            client,
            heuristics: Heuristics::new(),
            extractor: ScoreExtractor::new().context("Failed to compile score patterns")?,
        })
    }

    fn prompt(&self, content: &str, url: &str) -> String {
        let patterns = self.heuristics.pattern_signals(content);
        let domain = self.heuristics.domain_signals(url);
        let excerpt: String = content.chars().take(MAX_PROMPT_CONTENT_CHARS).collect();

        format!(
            r#"As a financial misinformation detection expert, analyze this content.

CONTENT: "{excerpt}"
URL: "{url}"

PRE-ANALYSIS HINTS:
- Manipulation patterns detected: {pattern:.2}
- Domain reputation: {domain:.0}/100

ANALYZE FOR:
1. Credibility (factual accuracy, logical consistency)
2. Manipulation risk (emotional triggers, urgency tactics)
3. Source reliability (domain authority, editorial standards)
4. Market impact potential (audience reach, timing)

RESPOND WITH STRUCTURED JSON:
{{
    "credibility_score": <0-100>,
    "manipulation_risk": <0-100>,
    "confidence": <0.0-1.0>,
    "risk_factors": ["factor1", "factor2"],
    "reasoning": "Brief 2-sentence explanation"
}}"#,
            excerpt = excerpt,
            url = url,
            pattern = patterns.overall_manipulation_risk,
            domain = domain.domain_score,
        )
    }

    /// Interpret a completion as a judgment.
    pub fn parse_reply(&self, text: &str) -> CollaboratorResult<AiJudgment> {
        if let Some(map) = json_object(text) {
            let credibility = number(map.get("credibility_score").or(map.get("credibility")));
            let manipulation = number(map.get("manipulation_risk").or(map.get("manipulation")));
            if credibility.is_some() || manipulation.is_some() {
                let mut reasoning = strings(map.get("reasoning"));
                if reasoning.is_empty() {
                    reasoning.push("Analysis completed".to_string());
                }
                return Ok(AiJudgment {
                    credibility: credibility.unwrap_or(50.0),
                    manipulation_risk: manipulation.unwrap_or(50.0),
                    confidence: number(map.get("confidence")).unwrap_or(0.5),
                    reasoning,
                    risk_factors: strings(map.get("risk_factors")),
                });
            }
        }

        self.extractor
            .extract(text)
            .ok_or_else(|| CollaboratorError::Malformed {
                collaborator: self.name().to_string(),
                reason: "no scores in reply".to_string(),
            })
    }
}

#[async_trait]
impl AiJudge for OpenAiJudge {
    fn name(&self) -> &str {
        "openai"
    }

    #[instrument(skip(self, content))]
    async fn judge(&self, content: &str, url: &str) -> CollaboratorResult<AiJudgment> {
        if content.trim().chars().count() < MIN_CONTENT_CHARS {
            debug!("Content too short, skipping AI call");
            return Ok(AiJudgment {
                credibility: 40.0,
                manipulation_risk: 20.0,
                confidence: 0.3,
                reasoning: vec!["Content too short for reliable analysis".to_string()],
                risk_factors: Vec::new(),
            });
        }

        let reply = self
            .client
            .complete(
                self.name(),
                "You are a concise financial misinformation analyst.",
                &self.prompt(content, url),
                0.1,
                300,
            )
            .await?;

        self.parse_reply(&reply).map_err(|e| {
            warn!("Unusable AI reply: {}", e);
            e
        })
    }
}

/// Comment-stream judge backed by OpenAI chat completions.
pub struct OpenAiSentimentJudge {
    client: Arc<OpenAiClient>,
}

impl OpenAiSentimentJudge {
    pub fn new(client: Arc<OpenAiClient>) -> Self {
        Self { client }
    }

    fn prompt(comments: &[Comment], question: &str) -> String {
        let lines: Vec<String> = comments
            .iter()
            .take(MAX_SENTIMENT_COMMENTS)
            .map(|c| {
                let text: String = c.text.chars().take(MAX_COMMENT_CHARS).collect();
                let author = if c.author.is_empty() {
                    "unknown"
                } else {
                    c.author.as_str()
                };
                format!("Author: {} | Text: {}", author, text)
            })
            .collect();

        format!(
            r#"Analyze these market prediction comments for sentiment and potential manipulation.

Market Question: "{question}"

Comments:
{comments}

Respond with JSON in this exact format:
{{
    "sentiment_score": <-1.0 to 1.0>,
    "manipulation_risk": <0.0-1.0>,
    "confidence": <0.0-1.0>,
    "patterns": ["pattern1", "pattern2"],
    "coordinated_activity": <true/false>
}}"#,
            question = question,
            comments = lines.join("\n"),
        )
    }

    pub fn parse_reply(&self, text: &str) -> CollaboratorResult<SentimentJudgment> {
        let map = json_object(text).ok_or_else(|| CollaboratorError::Malformed {
            collaborator: self.name().to_string(),
            reason: "reply is not a JSON object".to_string(),
        })?;

        Ok(SentimentJudgment {
            sentiment_score: number(map.get("sentiment_score")).unwrap_or(0.0),
            manipulation_risk: number(map.get("manipulation_risk")).unwrap_or(0.5),
            coordinated_activity: map
                .get("coordinated_activity")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            confidence: number(map.get("confidence")).unwrap_or(0.5),
            patterns: strings(map.get("patterns")),
        }
        .bounded())
    }
}

#[async_trait]
impl SentimentJudge for OpenAiSentimentJudge {
    fn name(&self) -> &str {
        "openai-sentiment"
    }

    #[instrument(skip(self, comments), fields(comments = comments.len()))]
    async fn judge(
        &self,
        comments: &[Comment],
        question: &str,
    ) -> CollaboratorResult<SentimentJudgment> {
        let reply = self
            .client
            .complete(
                self.name(),
                "You are an expert in detecting market manipulation and coordinated misinformation campaigns. Respond only with valid JSON.",
                &Self::prompt(comments, question),
                0.2,
                600,
            )
            .await?;
        self.parse_reply(&reply)
    }
}
