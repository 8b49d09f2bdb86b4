//! Alloy Ledger Client - Signing, Submission and Receipt Tracking
//!
//! Implements the `LedgerClient` port on top of the shared
//! [`ChainProvider`]. Each submission fetches the pending nonce,
//! estimates gas and EIP-1559 fees, signs locally with the signer's
//! key, and broadcasts the raw envelope.
//!
//! Before broadcasting, the sender's balance is checked against
//! `value + gas_limit * max_fee_per_gas`. A shortfall comes back with
//! the structured `InsufficientFunds` code instead of whatever text the
//! node would have used.

use std::sync::Arc;
use std::time::Duration;

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::Provider;
use alloy::rpc::types::TransactionRequest;
use alloy::transports::TransportError;
use async_trait::async_trait;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, instrument, warn};

use super::provider::ChainProvider;
use crate::domain::{wei_to_ether, Signer};
use crate::ports::ledger::{
    Confirmation, LedgerClient, LedgerError, LedgerErrorCode, PendingTx, TxRequest,
};

/// `LedgerClient` backed by a JSON-RPC node.
pub struct AlloyLedger {
    provider: Arc<ChainProvider>,
    poll_interval: Duration,
}

impl AlloyLedger {
    /// Create a ledger client polling receipts every `poll_interval`.
    pub const fn new(provider: Arc<ChainProvider>, poll_interval: Duration) -> Self {
        Self {
            provider,
            poll_interval,
        }
    }

    /// Fill nonce, gas and fees for `request` as sent by `from`.
    async fn prepare(&self, from: Address, request: &TxRequest) -> Result<TransactionRequest, LedgerError> {
        let rpc = self.provider.inner();

        let nonce = rpc
            .get_transaction_count(from)
            .pending()
            .await
            .map_err(map_transport_error)?;

        let tx = TransactionRequest::default()
            .with_from(from)
            .with_to(request.to)
            .with_value(request.value)
            .with_input(request.input.clone())
            .with_nonce(nonce)
            .with_chain_id(self.provider.chain_id());

        let gas_limit = rpc.estimate_gas(&tx).await.map_err(map_transport_error)?;
        let fees = rpc
            .estimate_eip1559_fees(None)
            .await
            .map_err(map_transport_error)?;

        debug!(
            nonce,
            gas_limit,
            max_fee_per_gas = fees.max_fee_per_gas,
            "Transaction prepared"
        );

        Ok(tx
            .with_gas_limit(gas_limit)
            .with_max_fee_per_gas(fees.max_fee_per_gas)
            .with_max_priority_fee_per_gas(fees.max_priority_fee_per_gas))
    }

    /// Reject up front if `from` cannot cover value plus the fee ceiling.
    async fn ensure_affordable(&self, from: Address, tx: &TransactionRequest) -> Result<(), LedgerError> {
        let gas_limit = tx.gas_limit().unwrap_or_default();
        let max_fee = tx.max_fee_per_gas().unwrap_or_default();
        let value = tx.value().unwrap_or_default();

        let cost = U256::from(gas_limit)
            .saturating_mul(U256::from(max_fee))
            .saturating_add(value);
        let balance = self.balance(from).await?;

        if balance < cost {
            return Err(LedgerError::insufficient_funds(format!(
                "insufficient funds for gas * price + value: have {} ETH, need {} ETH",
                wei_to_ether(balance),
                wei_to_ether(cost)
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for AlloyLedger {
    async fn balance(&self, address: Address) -> Result<U256, LedgerError> {
        self.provider
            .inner()
            .get_balance(address)
            .await
            .map_err(map_transport_error)
    }

    #[instrument(skip(self, signer, request), fields(from = %signer.address(), to = %request.to))]
    async fn submit(&self, signer: &Signer, request: &TxRequest) -> Result<PendingTx, LedgerError> {
        let from = signer.address();
        let tx = self.prepare(from, request).await?;
        self.ensure_affordable(from, &tx).await?;

        let wallet = EthereumWallet::from(signer.credential().clone());
        let envelope = tx
            .build(&wallet)
            .await
            .map_err(|e| LedgerError::new(LedgerErrorCode::Rejected, format!("signing failed: {e}")))?;

        let pending = self
            .provider
            .inner()
            .send_tx_envelope(envelope)
            .await
            .map_err(map_transport_error)?;

        Ok(PendingTx {
            tx_hash: *pending.tx_hash(),
            from,
        })
    }

    #[instrument(skip(self), fields(tx_hash = %pending.tx_hash))]
    async fn await_confirmation(&self, pending: PendingTx) -> Result<Confirmation, LedgerError> {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let receipt = match self
                .provider
                .inner()
                .get_transaction_receipt(pending.tx_hash)
                .await
            {
                Ok(receipt) => receipt,
                Err(e) => {
                    // Keep polling through transient node errors.
                    warn!(error = %e, "Receipt poll failed");
                    continue;
                }
            };

            let Some(receipt) = receipt else {
                continue;
            };

            if !receipt.status() {
                return Err(reverted(pending.tx_hash, receipt.block_number));
            }

            let Some(block_number) = receipt.block_number else {
                continue;
            };

            return Ok(Confirmation {
                tx_hash: pending.tx_hash,
                block_number,
            });
        }
    }
}

fn reverted(tx_hash: TxHash, block_number: Option<u64>) -> LedgerError {
    let at = block_number.map_or_else(String::new, |b| format!(" in block {b}"));
    LedgerError::new(
        LedgerErrorCode::Reverted,
        format!("transaction {tx_hash} reverted{at}"),
    )
}

/// Keep the node's own code and message when it answered with an error
/// object; anything else is a transport failure.
fn map_transport_error(err: TransportError) -> LedgerError {
    match err.as_error_resp() {
        Some(payload) => LedgerError::rpc(payload.code, payload.message.to_string()),
        None => LedgerError::new(LedgerErrorCode::Network, err.to_string()),
    }
}
