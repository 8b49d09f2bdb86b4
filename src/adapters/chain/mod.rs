//! Chain Adapters - JSON-RPC Interaction Layer
//!
//! Provides on-chain access via alloy-rs 0.9 for:
//! - RPC provider management and chain id validation
//! - the `LedgerClient` port (balances, signed submission, receipts)

pub mod ledger;
pub mod provider;

pub use ledger::AlloyLedger;
pub use provider::{ChainProvider, HttpProvider};
