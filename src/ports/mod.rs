//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the use cases require from the
//! outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `LedgerClient`: balances, submission, confirmation
//! - `ProofSource`: external proof retrieval

pub mod ledger;
pub mod proof_source;

pub use ledger::{Confirmation, LedgerClient, LedgerError, LedgerErrorCode, PendingTx, TxRequest};
pub use proof_source::{ProofError, ProofSource};
