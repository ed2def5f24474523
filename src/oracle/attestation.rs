//! Publishing analysis records: metadata upload and on-chain attestation.
//!
//! Both collaborators are optional. The service treats every failure here as
//! best-effort and still records the market report without a URI or
//! transaction id.

use crate::oracle::types::MarketReport;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument};

/// Stores a metadata document and returns its URI.
#[async_trait]
pub trait MetadataPublisher: Send + Sync {
    async fn publish(&self, metadata: &AttestationMetadata) -> Result<String>;
}

/// Submits an attestation and returns the transaction id.
#[async_trait]
pub trait AttestationSubmitter: Send + Sync {
    async fn submit(
        &self,
        market_id: [u8; 32],
        credibility: u8,
        risk: u8,
        metadata_uri: &str,
    ) -> Result<String>;
}

/// Document published alongside an attestation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationMetadata {
    pub market_id: String,
    pub credibility: u8,
    pub risk: u8,
    pub confidence: f64,
    pub links_analyzed: usize,
    pub credibility_reasons: Vec<String>,
    pub risk_reasons: Vec<String>,
    pub produced_at: u64,
}

impl From<&MarketReport> for AttestationMetadata {
    fn from(report: &MarketReport) -> Self {
        Self {
            market_id: report.market_id.clone(),
            credibility: report.credibility_score,
            risk: report.risk_index,
            confidence: report.confidence,
            links_analyzed: report.links_analyzed(),
            credibility_reasons: report.credibility_reasons.clone(),
            risk_reasons: report.risk_reasons.clone(),
            produced_at: report.produced_at,
        }
    }
}

/// Encode a market id as a 32-byte attestation key.
///
/// A `0x`-prefixed 64-digit hex string is decoded as-is. Anything else is
/// taken as UTF-8, zero-padded or truncated to 32 bytes.
pub fn to_bytes32(market_id: &str) -> [u8; 32] {
    let mut out = [0u8; 32];

    if market_id.len() == 66 && market_id.starts_with("0x") {
        if let Ok(bytes) = hex::decode(&market_id[2..]) {
            out.copy_from_slice(&bytes);
            return out;
        }
    }

    let bytes = market_id.as_bytes();
    let n = bytes.len().min(32);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PinRequest<'a> {
    pinata_content: &'a AttestationMetadata,
    pinata_metadata: PinName,
}

#[derive(Serialize)]
struct PinName {
    name: String,
}

#[derive(Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

/// Pins metadata JSON to IPFS through Pinata.
pub struct PinataPublisher {
    http: Client,
    jwt: String,
    endpoint: String,
}

impl PinataPublisher {
    pub fn new(jwt: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build Pinata HTTP client")?;
        Ok(Self {
            http,
            jwt: jwt.into(),
            endpoint: "https://api.pinata.cloud/pinning/pinJSONToIPFS".to_string(),
        })
    }
}

#[async_trait]
impl MetadataPublisher for PinataPublisher {
    #[instrument(skip(self, metadata), fields(market = %metadata.market_id))]
    async fn publish(&self, metadata: &AttestationMetadata) -> Result<String> {
        let request = PinRequest {
            pinata_content: metadata,
            pinata_metadata: PinName {
                name: format!("TruthLens-Attestation-{}", metadata.market_id),
            },
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.jwt)
            .json(&request)
            .send()
            .await
            .context("Pinata upload failed")?;

        if !response.status().is_success() {
            bail!("Pinata upload returned HTTP {}", response.status());
        }

        let pinned: PinResponse = response
            .json()
            .await
            .context("Pinata returned malformed JSON")?;
        if pinned.ipfs_hash.is_empty() {
            return Err(anyhow!("Pinata returned no content hash"));
        }

        let uri = format!("ipfs://{}", pinned.ipfs_hash);
        info!("Pinned metadata for {} at {}", metadata.market_id, uri);
        Ok(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_bytes32_pads_short_ids() {
        let key = to_bytes32("bitcoin_market");
        assert_eq!(&key[..14], b"bitcoin_market");
        assert!(key[14..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_to_bytes32_truncates_long_ids() {
        let id = "a".repeat(40);
        assert_eq!(to_bytes32(&id), [b'a'; 32]);
    }

    #[test]
    fn test_to_bytes32_decodes_hex() {
        let id = format!("0x{}", "ab".repeat(32));
        assert_eq!(to_bytes32(&id), [0xab; 32]);
    }

    #[test]
    fn test_to_bytes32_invalid_hex_is_text() {
        let id = format!("0x{}", "zz".repeat(32));
        assert_eq!(&to_bytes32(&id)[..4], b"0xzz");
    }

    #[test]
    fn test_metadata_from_report() {
        let report = MarketReport {
            market_id: "m".to_string(),
            credibility_score: 70,
            risk_index: 30,
            confidence: 0.6,
            links: Vec::new(),
            credibility_reasons: vec!["ok".to_string()],
            risk_reasons: Vec::new(),
            metadata_uri: None,
            transaction_id: None,
            produced_at: 1,
        };
        let metadata = AttestationMetadata::from(&report);
        assert_eq!(metadata.credibility, 70);
        assert_eq!(metadata.links_analyzed, 0);
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["marketId"], "m");
    }
}
