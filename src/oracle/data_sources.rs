//! Market and comment feeds.
//!
//! Feeds are plain I/O: fetch JSON records, retry with backoff, give up after
//! a bounded number of attempts. A feed error never stops an analysis pass;
//! the service logs it and carries on with an empty list.

use crate::oracle::types::OracleConfig;
use crate::types::{Comment, MarketSnapshot};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_retry::{strategy::ExponentialBackoff, Retry};
use tracing::{debug, instrument};

/// Source of market records.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    async fn fetch_markets(&self) -> Result<Vec<MarketSnapshot>>;
}

/// Source of comment records across all markets.
#[async_trait]
pub trait CommentFeed: Send + Sync {
    async fn fetch_comments(&self) -> Result<Vec<Comment>>;
}

/// GET a JSON array from a URL with a per-attempt timeout and retries.
pub struct HttpJsonFeed {
    http: Client,
    url: String,
    timeout: Duration,
    retry_attempts: usize,
}

impl HttpJsonFeed {
    pub fn new(url: impl Into<String>, config: &OracleConfig) -> Result<Self> {
        let url = url.into();
        url::Url::parse(&url).with_context(|| format!("Invalid feed url {}", url))?;

        let http = Client::builder()
            .timeout(config.feed_timeout())
            .build()
            .context("Failed to build feed HTTP client")?;

        Ok(Self {
            http,
            url,
            timeout: config.feed_timeout(),
            retry_attempts: config.feed_retry_attempts,
        })
    }

    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn fetch<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let strategy = ExponentialBackoff::from_millis(200)
            .max_delay(Duration::from_secs(5))
            .take(self.retry_attempts);

        let records = Retry::spawn(strategy, || self.fetch_once::<T>()).await?;
        debug!("Fetched {} records from {}", records.len(), self.url);
        Ok(records)
    }

    async fn fetch_once<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let request = async {
            let response = self
                .http
                .get(&self.url)
                .send()
                .await
                .context("Feed request failed")?
                .error_for_status()
                .context("Feed returned an error status")?;
            response
                .json::<Vec<T>>()
                .await
                .context("Feed returned malformed JSON")
        };

        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| anyhow!("Feed {} timed out after {:?}", self.url, self.timeout))?
    }
}

/// Market feed served from a custom JSON endpoint.
pub struct HttpMarketFeed {
    inner: HttpJsonFeed,
}

impl HttpMarketFeed {
    pub fn new(url: impl Into<String>, config: &OracleConfig) -> Result<Self> {
        Ok(Self {
            inner: HttpJsonFeed::new(url, config)?,
        })
    }
}

#[async_trait]
impl MarketFeed for HttpMarketFeed {
    async fn fetch_markets(&self) -> Result<Vec<MarketSnapshot>> {
        self.inner.fetch().await
    }
}

/// Comment feed served from a custom JSON endpoint.
pub struct HttpCommentFeed {
    inner: HttpJsonFeed,
}

impl HttpCommentFeed {
    pub fn new(url: impl Into<String>, config: &OracleConfig) -> Result<Self> {
        Ok(Self {
            inner: HttpJsonFeed::new(url, config)?,
        })
    }
}

#[async_trait]
impl CommentFeed for HttpCommentFeed {
    async fn fetch_comments(&self) -> Result<Vec<Comment>> {
        self.inner.fetch().await
    }
}

/// Fixed market records.
#[derive(Debug, Clone, Default)]
pub struct StaticMarketFeed {
    markets: Vec<MarketSnapshot>,
}

impl StaticMarketFeed {
    pub fn new(markets: Vec<MarketSnapshot>) -> Self {
        Self { markets }
    }

    /// The single bitcoin market used when no feed is configured.
    pub fn fallback() -> Self {
        Self::new(vec![MarketSnapshot {
            market_id: "bitcoin_market".to_string(),
            question: "Will BTC close above $80k this month?".to_string(),
            price_24h: vec![42_000.0, 43_500.0, 44_700.0, 46_100.0, 45_900.0, 47_000.0, 48_200.0],
            volume_24h: vec![
                1_000_000.0,
                1_200_000.0,
                950_000.0,
                5_000_000.0,
                600_000.0,
                700_000.0,
                800_000.0,
            ],
            current_price: 48_200.0,
            market_cap: 950_000_000_000.0,
            change_24h: 2.5,
        }])
    }
}

#[async_trait]
impl MarketFeed for StaticMarketFeed {
    async fn fetch_markets(&self) -> Result<Vec<MarketSnapshot>> {
        Ok(self.markets.clone())
    }
}

/// Fixed comment records.
#[derive(Debug, Clone, Default)]
pub struct StaticCommentFeed {
    comments: Vec<Comment>,
}

impl StaticCommentFeed {
    pub fn new(comments: Vec<Comment>) -> Self {
        Self { comments }
    }

    /// A small mix of reputable and promotional sources for the bitcoin market.
    pub fn fallback() -> Self {
        let comment = |url: &str, author: &str, text: &str| Comment {
            market_id: "bitcoin_market".to_string(),
            url: Some(url.to_string()),
            text: text.to_string(),
            author: author.to_string(),
            created_at: Some(chrono::Utc::now().to_rfc3339()),
            score: 0,
        };

        Self::new(vec![
            comment(
                "https://www.reuters.com/markets/bitcoin-hits-new-high",
                "reuters_reporter",
                "Institutional holders increased their Bitcoin positions by 15% this quarter according to recent SEC filings.",
            ),
            comment(
                "https://www.bloomberg.com/news/crypto-institutional-adoption",
                "bloomberg_analyst",
                "Bitcoin ETF inflows reached $2.1 billion last week, the highest since launch.",
            ),
            comment(
                "http://shady-crypto-news.biz/blog/123",
                "moon_boy_2024",
                "🚀🚀🚀 BTC TO THE MOON!!! My insider friend says they're buying MASSIVE amounts. 100K GUARANTEED!!! 💎",
            ),
            comment(
                "https://coindesk.com/markets/bitcoin-technical-analysis",
                "technical_trader",
                "BTC broke through resistance at $75K on strong volume; the 50-day MA crossed above the 200-day MA while RSI sits at 78.",
            ),
        ])
    }
}

#[async_trait]
impl CommentFeed for StaticCommentFeed {
    async fn fetch_comments(&self) -> Result<Vec<Comment>> {
        Ok(self.comments.clone())
    }
}
