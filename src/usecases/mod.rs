//! Use Cases Layer - Application Business Logic
//!
//! Orchestrates the domain with port interfaces to implement the
//! relayer's two workflows.
//!
//! Use cases:
//! - `TransactionRelay`: rotate through signers until one submission confirms
//! - `BalanceRebalancer`: top up under-funded signers from the treasury
//! - `classifier`: decide which ledger failures mean "out of funds"
//! - `CallTemplate`: venue calldata from a signature, filled per signer

pub mod classifier;
pub mod instruction;
pub mod rebalancer;
pub mod relay;

pub use instruction::{CallTemplate, InstructionError};
pub use rebalancer::{BalanceRebalancer, FundingAction, FundingFailure, RebalanceError, RebalanceReport};
pub use relay::{RelayCall, RelayError, RelayOptions, RelayReceipt, RotationCursor, TransactionRelay};
