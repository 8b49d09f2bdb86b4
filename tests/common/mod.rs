//! Shared test fixtures: an in-memory ledger and Anvil dev keys.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, TxHash, B256, U256};
use async_trait::async_trait;
use tokio::sync::Semaphore;

use meta_relayer::domain::{Signer, SignerPool, SignerRole};
use meta_relayer::ports::{Confirmation, LedgerClient, LedgerError, PendingTx, TxRequest};

/// Anvil dev account private keys 0..5.
pub const ANVIL_KEYS: [&str; 5] = [
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
    "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d",
    "0x5de4111afa1a4b94908f83103eb1f1706367c2e68ca870fc3fb9a804cdab365a",
    "0x7c852118294e51e653712a81e05800f419141751be58f605c371e15141b007a6",
    "0x47e179ec197488593b187f80a00eb0da91f1b9d0b13f8733639f19c30a34926a",
];

/// One ether in wei.
pub const ETH: u128 = 1_000_000_000_000_000_000;

/// `tenths` tenths of an ether, in wei.
pub fn eth_tenths(tenths: u128) -> U256 {
    U256::from(tenths * ETH / 10)
}

/// Pool over the first `n` Anvil keys.
pub fn pool_of(n: usize) -> Arc<SignerPool> {
    Arc::new(SignerPool::from_private_keys(&ANVIL_KEYS[..n]).expect("anvil keys parse"))
}

/// Treasury on the last Anvil key (never part of `pool_of(n)` for n < 5).
pub fn treasury() -> Signer {
    Signer::from_private_key(ANVIL_KEYS[4], SignerRole::Treasury).expect("anvil key parses")
}

/// A submission the fake ledger received.
#[derive(Debug, Clone)]
pub struct SubmitCall {
    pub from: Address,
    pub request: TxRequest,
    pub accepted: bool,
}

#[derive(Default)]
struct State {
    balances: HashMap<Address, U256>,
    fail_from: HashMap<Address, LedgerError>,
    fail_to: HashMap<Address, LedgerError>,
    unreadable: HashSet<Address>,
    calls: Vec<SubmitCall>,
    mined: HashMap<TxHash, u64>,
    next_block: u64,
}

/// In-memory ledger. Transfers move balance; a sender that cannot cover
/// the value fails with the node's message and no structured code.
#[derive(Default)]
pub struct FakeLedger {
    state: Mutex<State>,
    confirmation_gate: Option<Arc<Semaphore>>,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Confirmations wait for a permit on `gate`.
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            state: Mutex::default(),
            confirmation_gate: Some(gate),
        }
    }

    pub fn set_balance(&self, address: Address, wei: U256) {
        self.state.lock().unwrap().balances.insert(address, wei);
    }

    pub fn balance_of(&self, address: Address) -> U256 {
        self.state
            .lock()
            .unwrap()
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default()
    }

    /// Every submission from `address` fails with `err`.
    pub fn fail_submissions_from(&self, address: Address, err: LedgerError) {
        self.state.lock().unwrap().fail_from.insert(address, err);
    }

    /// Every submission sent to `address` fails with `err`.
    pub fn fail_submissions_to(&self, address: Address, err: LedgerError) {
        self.state.lock().unwrap().fail_to.insert(address, err);
    }

    /// Balance reads for `address` fail.
    pub fn fail_balance_reads(&self, address: Address) {
        self.state.lock().unwrap().unreadable.insert(address);
    }

    pub fn calls(&self) -> Vec<SubmitCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn accepted_calls(&self) -> Vec<SubmitCall> {
        self.calls().into_iter().filter(|c| c.accepted).collect()
    }
}

#[async_trait]
impl LedgerClient for FakeLedger {
    async fn balance(&self, address: Address) -> Result<U256, LedgerError> {
        let state = self.state.lock().unwrap();
        if state.unreadable.contains(&address) {
            return Err(LedgerError::unclassified("request timed out"));
        }
        Ok(state.balances.get(&address).copied().unwrap_or_default())
    }

    async fn submit(&self, signer: &Signer, request: &TxRequest) -> Result<PendingTx, LedgerError> {
        let from = signer.address();
        let mut state = self.state.lock().unwrap();

        let scripted = state
            .fail_from
            .get(&from)
            .or_else(|| state.fail_to.get(&request.to))
            .cloned();
        let have = state.balances.get(&from).copied().unwrap_or_default();

        let outcome = match scripted {
            Some(err) => Err(err),
            None if have < request.value => Err(LedgerError::rpc(
                -32000,
                "insufficient funds for gas * price + value",
            )),
            None => Ok(()),
        };

        state.calls.push(SubmitCall {
            from,
            request: request.clone(),
            accepted: outcome.is_ok(),
        });
        outcome?;

        state.balances.insert(from, have - request.value);
        *state.balances.entry(request.to).or_default() += request.value;

        state.next_block += 1;
        let block = state.next_block;
        let tx_hash = B256::left_padding_from(&block.to_be_bytes());
        state.mined.insert(tx_hash, block);

        Ok(PendingTx { tx_hash, from })
    }

    async fn await_confirmation(&self, pending: PendingTx) -> Result<Confirmation, LedgerError> {
        if let Some(gate) = &self.confirmation_gate {
            let _permit = gate.acquire().await.expect("gate open");
        }

        let block = self
            .state
            .lock()
            .unwrap()
            .mined
            .get(&pending.tx_hash)
            .copied()
            .ok_or_else(|| LedgerError::unclassified("unknown transaction"))?;

        Ok(Confirmation {
            tx_hash: pending.tx_hash,
            block_number: block,
        })
    }
}
