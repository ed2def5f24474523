//! Mock collaborators shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use truthlens_oracle::error::{CollaboratorError, CollaboratorResult};
use truthlens_oracle::oracle::ai_judge::{AiJudge, AiJudgment, SentimentJudge, SentimentJudgment};
use truthlens_oracle::oracle::data_sources::{StaticCommentFeed, StaticMarketFeed};
use truthlens_oracle::oracle::Collaborators;
use truthlens_oracle::types::Comment;

/// AI judge with scripted behavior and a call counter.
pub struct MockJudge {
    pub behavior: JudgeBehavior,
    pub calls: AtomicUsize,
}

pub enum JudgeBehavior {
    Answer(AiJudgment),
    Fail,
    Sleep(Duration),
}

impl MockJudge {
    pub fn answering(credibility: f64, manipulation_risk: f64, confidence: f64) -> Arc<Self> {
        Self::with(JudgeBehavior::Answer(AiJudgment {
            credibility,
            manipulation_risk,
            confidence,
            reasoning: vec!["mock judgment".to_string()],
            risk_factors: Vec::new(),
        }))
    }

    pub fn failing() -> Arc<Self> {
        Self::with(JudgeBehavior::Fail)
    }

    pub fn sleeping(delay: Duration) -> Arc<Self> {
        Self::with(JudgeBehavior::Sleep(delay))
    }

    fn with(behavior: JudgeBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiJudge for MockJudge {
    fn name(&self) -> &str {
        "mock"
    }

    async fn judge(&self, _content: &str, _url: &str) -> CollaboratorResult<AiJudgment> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            JudgeBehavior::Answer(judgment) => Ok(judgment.clone()),
            JudgeBehavior::Fail => Err(CollaboratorError::Request {
                collaborator: "mock".to_string(),
                reason: "503 Service Unavailable".to_string(),
            }),
            JudgeBehavior::Sleep(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(AiJudgment {
                    credibility: 60.0,
                    manipulation_risk: 20.0,
                    confidence: 0.7,
                    reasoning: vec!["late judgment".to_string()],
                    risk_factors: Vec::new(),
                })
            }
        }
    }
}

/// Sentiment judge that is never configured.
pub struct SilentSentiment;

#[async_trait]
impl SentimentJudge for SilentSentiment {
    fn name(&self) -> &str {
        "silent"
    }

    async fn judge(
        &self,
        _comments: &[Comment],
        _question: &str,
    ) -> CollaboratorResult<SentimentJudgment> {
        Err(CollaboratorError::NotConfigured {
            collaborator: "silent".to_string(),
        })
    }
}

pub fn collaborators(judge: Arc<dyn AiJudge>) -> Collaborators {
    Collaborators {
        ai_judge: judge,
        sentiment: Arc::new(SilentSentiment),
        market_feed: Arc::new(StaticMarketFeed::fallback()),
        comment_feed: Arc::new(StaticCommentFeed::fallback()),
        publisher: None,
        attestor: None,
    }
}
