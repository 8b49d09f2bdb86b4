//! Proof Adapters - External Proof Service Clients
//!
//! Implements the `ProofSource` port over HTTP.

pub mod http;

pub use http::{HttpProofSource, ProofClientConfig};
