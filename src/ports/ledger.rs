//! Ledger Client Port - On-chain Interaction Interface
//!
//! The only way the use cases touch the chain: read a balance, submit a
//! signed transaction, and wait for it to be included. Every call may
//! fail independently; failures carry an optional structured code so the
//! relay can tell "out of funds" apart from everything else.

use std::fmt;

use alloy::primitives::{Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::domain::Signer;

/// A transaction to be signed and sent by whichever signer the relay picks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
  /// Destination account or contract.
  pub to: Address,
  /// Native value attached, in wei.
  pub value: U256,
  /// Call data (empty for plain transfers).
  pub input: Bytes,
}

impl TxRequest {
  /// Plain native-currency transfer.
  pub fn transfer(to: Address, value: U256) -> Self {
    Self {
      to,
      value,
      input: Bytes::new(),
    }
  }

  /// Contract call with no attached value.
  pub const fn call(to: Address, input: Bytes) -> Self {
    Self {
      to,
      value: U256::ZERO,
      input,
    }
  }
}

/// Handle for a transaction accepted by the node but not yet confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTx {
  /// Transaction hash.
  pub tx_hash: TxHash,
  /// Sending address.
  pub from: Address,
}

/// A transaction included in a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Confirmation {
  /// Transaction hash.
  pub tx_hash: TxHash,
  /// Block the transaction was included in.
  pub block_number: u64,
}

/// Structured failure classes a ledger backend can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerErrorCode {
  /// Sender balance cannot cover value plus fees.
  InsufficientFunds,
  /// Transaction was mined but reverted.
  Reverted,
  /// Rejected before broadcast (signing, encoding, nonce).
  Rejected,
  /// Transport-level failure talking to the node.
  Network,
  /// A bounded wait expired.
  Timeout,
}

impl fmt::Display for LedgerErrorCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
      Self::Reverted => "REVERTED",
      Self::Rejected => "REJECTED",
      Self::Network => "NETWORK",
      Self::Timeout => "TIMEOUT",
    };
    f.write_str(s)
  }
}

/// Failure reported by a ledger client.
///
/// `code` is set when the backend knows the failure class. `rpc_code`
/// keeps the raw JSON-RPC error code when the node returned one. The
/// message is the node's text, untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct LedgerError {
  /// Structured failure class, when known.
  pub code: Option<LedgerErrorCode>,
  /// Raw JSON-RPC error code, when the node answered with an error object.
  pub rpc_code: Option<i64>,
  /// Human-readable reason.
  pub message: String,
}

impl LedgerError {
  /// Error with a structured code.
  pub fn new(code: LedgerErrorCode, message: impl Into<String>) -> Self {
    Self {
      code: Some(code),
      rpc_code: None,
      message: message.into(),
    }
  }

  /// Error carrying only the node's message.
  pub fn unclassified(message: impl Into<String>) -> Self {
    Self {
      code: None,
      rpc_code: None,
      message: message.into(),
    }
  }

  /// JSON-RPC error object returned by the node.
  pub fn rpc(rpc_code: i64, message: impl Into<String>) -> Self {
    Self {
      code: None,
      rpc_code: Some(rpc_code),
      message: message.into(),
    }
  }

  /// Shorthand for a structured out-of-funds failure.
  pub fn insufficient_funds(message: impl Into<String>) -> Self {
    Self::new(LedgerErrorCode::InsufficientFunds, message)
  }
}

/// Trait for chain access used by the relay and the rebalancer.
#[async_trait]
pub trait LedgerClient: Send + Sync + 'static {
  /// Native balance of an address, in wei.
  async fn balance(&self, address: Address) -> Result<U256, LedgerError>;

  /// Sign `request` with `signer` and broadcast it.
  ///
  /// Fee and nonce selection are the backend's defaults.
  async fn submit(&self, signer: &Signer, request: &TxRequest) -> Result<PendingTx, LedgerError>;

  /// Wait until a submitted transaction is included.
  ///
  /// Returns an error if it reverted or could not be tracked. No timeout
  /// is applied here; callers bound the wait if they need to.
  async fn await_confirmation(&self, pending: PendingTx) -> Result<Confirmation, LedgerError>;
}
