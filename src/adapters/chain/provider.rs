//! Chain RPC Provider - alloy-rs 0.9 Connection Management
//!
//! Manages the JSON-RPC connection to the venue's chain. Validates
//! connectivity (and optionally the chain id) at startup and exposes a
//! shared provider for the ledger adapter.

use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::transports::http::{Client, Http};
use anyhow::{Context, Result};
use tracing::{info, instrument};

/// Concrete HTTP provider type returned by `ProviderBuilder::on_http`.
pub type HttpProvider = RootProvider<Http<Client>>;

/// Shared chain RPC provider backed by alloy-rs 0.9.
///
/// One instance serves every balance read, submission, and receipt
/// poll, so HTTP connections are pooled.
pub struct ChainProvider {
    provider: HttpProvider,
    chain_id: u64,
}

impl ChainProvider {
    /// Connect to the RPC endpoint and read its chain id.
    ///
    /// Fails if the endpoint is unreachable, or if `expected_chain_id`
    /// is set and the node reports something else.
    #[instrument(skip_all)]
    pub async fn connect(rpc_url: &str, expected_chain_id: Option<u64>) -> Result<Self> {
        // alloy 0.9: on_http() is synchronous
        let provider = ProviderBuilder::new().on_http(rpc_url.parse().context("Invalid RPC URL")?);

        let chain_id = provider
            .get_chain_id()
            .await
            .context("Failed to query chain ID")?;

        if let Some(expected) = expected_chain_id {
            if chain_id != expected {
                anyhow::bail!("Expected chain_id={expected}, RPC reports {chain_id}");
            }
        }

        info!(chain_id, "Connected to chain RPC");

        Ok(Self { provider, chain_id })
    }

    /// Chain id reported by the node at connect time.
    pub const fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Borrow the alloy provider.
    pub const fn inner(&self) -> &HttpProvider {
        &self.provider
    }

    /// Check if the RPC connection is healthy via a lightweight call.
    pub async fn is_healthy(&self) -> bool {
        self.provider.get_block_number().await.is_ok()
    }
}
