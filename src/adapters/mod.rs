//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (blockchain RPC, HTTP). Each sub-module groups
//! adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `chain`: JSON-RPC ledger client via alloy-rs
//! - `proof`: proof service REST client
//! - `metrics`: Prometheus metrics export and health checks

pub mod chain;
pub mod metrics;
pub mod proof;
