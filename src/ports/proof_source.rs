//! Proof Source Port - Externally Issued Price Proofs
//!
//! Some venue entry points need a fresh proof blob for the traded asset.
//! The issuing service is a black box: ask for an asset, get bytes back
//! or a failure.

use alloy::primitives::Bytes;
use async_trait::async_trait;
use thiserror::Error;

/// Why a proof could not be obtained.
#[derive(Debug, Error)]
pub enum ProofError {
  /// Request never completed.
  #[error("proof request failed: {0}")]
  Http(#[from] reqwest::Error),

  /// Service answered with a non-success status.
  #[error("proof API error: HTTP {0}")]
  Status(u16),

  /// Response had no `proof` field.
  #[error("proof API error: 'proof' field missing in response")]
  MissingProof,

  /// `proof` was present but not valid hex.
  #[error("proof API returned a malformed proof: {0}")]
  Malformed(String),
}

/// Trait for proof providers.
#[async_trait]
pub trait ProofSource: Send + Sync + 'static {
  /// Fetch the current proof for `asset_id`.
  async fn fetch_proof(&self, asset_id: u64) -> Result<Bytes, ProofError>;
}
