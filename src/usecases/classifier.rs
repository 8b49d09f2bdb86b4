//! Failure Classifier - Out-of-Funds Detection
//!
//! Decides whether a ledger failure means "this signer cannot pay for
//! the transaction". Only that class of failure rotates the relay to the
//! next signer.
//!
//! The structured code wins whenever the backend supplies one. Without a
//! code, the node's message is matched against known phrases. The phrase
//! match is best-effort: nodes word this error differently and the list
//! below only covers geth-style wording.

use crate::ports::ledger::{LedgerError, LedgerErrorCode};

/// Lowercase phrases a node uses for an unaffordable transaction.
pub const INSUFFICIENT_FUNDS_PHRASES: &[&str] = &[
  "insufficient funds",
  "insufficient balance for transaction",
];

/// Whether `err` means the signer lacks funds for value + fees.
pub fn is_insufficient_funds(err: &LedgerError) -> bool {
  match err.code {
    Some(code) => code == LedgerErrorCode::InsufficientFunds,
    None => message_mentions_insufficient_funds(&err.message),
  }
}

/// Case-insensitive phrase match on a free-text reason.
pub fn message_mentions_insufficient_funds(message: &str) -> bool {
  let lower = message.to_lowercase();
  INSUFFICIENT_FUNDS_PHRASES
    .iter()
    .any(|phrase| lower.contains(phrase))
}
