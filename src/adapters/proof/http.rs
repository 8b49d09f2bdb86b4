//! Proof HTTP Client - Price Proof Retrieval
//!
//! Fetches the current proof for an asset with
//! `GET {base_url}?pairs={asset_id}`. The service answers with a JSON
//! object whose `proof` field is a hex string.

use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Bytes;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::ports::proof_source::{ProofError, ProofSource};

/// Configuration for the proof client.
#[derive(Debug, Clone)]
pub struct ProofClientConfig {
  /// Endpoint; the asset id goes in the `pairs` query parameter.
  pub base_url: String,
  /// Request timeout.
  pub timeout: Duration,
}

impl Default for ProofClientConfig {
  fn default() -> Self {
    Self {
      base_url: "https://backend.brokex.trade/proof".to_string(),
      timeout: Duration::from_secs(10),
    }
  }
}

#[derive(Debug, Deserialize)]
struct ProofResponse {
  proof: Option<String>,
}

/// `ProofSource` backed by the proof REST service.
pub struct HttpProofSource {
  client: Client,
  base_url: String,
}

impl HttpProofSource {
  /// Create a client with its own connection pool.
  ///
  /// # Errors
  /// Returns an error if the HTTP client cannot be built.
  pub fn new(config: ProofClientConfig) -> Result<Self, ProofError> {
    let client = Client::builder().timeout(config.timeout).build()?;
    Ok(Self {
      client,
      base_url: config.base_url,
    })
  }
}

#[async_trait]
impl ProofSource for HttpProofSource {
  #[instrument(skip(self))]
  async fn fetch_proof(&self, asset_id: u64) -> Result<Bytes, ProofError> {
    let response = self
      .client
      .get(&self.base_url)
      .query(&[("pairs", asset_id)])
      .send()
      .await?;

    let status = response.status();
    if !status.is_success() {
      warn!(status = status.as_u16(), "Proof service returned an error status");
      return Err(ProofError::Status(status.as_u16()));
    }

    let body: ProofResponse = response.json().await?;
    let proof = decode_proof(body.proof)?;

    debug!(bytes = proof.len(), "Proof fetched");
    Ok(proof)
  }
}

fn decode_proof(proof: Option<String>) -> Result<Bytes, ProofError> {
  let raw = proof.ok_or(ProofError::MissingProof)?;
  let raw = raw.trim();
  if raw.is_empty() {
    return Err(ProofError::MissingProof);
  }
  Bytes::from_str(raw).map_err(|e| ProofError::Malformed(e.to_string()))
}
