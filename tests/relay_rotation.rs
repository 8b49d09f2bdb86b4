//! Relay Rotation Tests - Failover, Cursor Movement, Terminal Outcomes
//!
//! Drives `TransactionRelay` against the in-memory ledger and against
//! mockall mocks of the ledger and proof ports.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, U256};
use mockall::mock;
use tokio::sync::Semaphore;

use common::{eth_tenths, pool_of, FakeLedger};
use meta_relayer::domain::Signer;
use meta_relayer::ports::{
    Confirmation, LedgerClient, LedgerError, LedgerErrorCode, PendingTx, ProofError, ProofSource,
    TxRequest,
};
use meta_relayer::usecases::relay::AttemptOutcome;
use meta_relayer::usecases::{RelayCall, RelayError, RelayOptions, TransactionRelay};

// ---- Mock Definitions ----

mock! {
    pub Ledger {}

    #[async_trait::async_trait]
    impl LedgerClient for Ledger {
        async fn balance(&self, address: Address) -> Result<U256, LedgerError>;
        async fn submit(&self, signer: &Signer, request: &TxRequest) -> Result<PendingTx, LedgerError>;
        async fn await_confirmation(&self, pending: PendingTx) -> Result<Confirmation, LedgerError>;
    }
}

mock! {
    pub Proofs {}

    #[async_trait::async_trait]
    impl ProofSource for Proofs {
        async fn fetch_proof(&self, asset_id: u64) -> Result<Bytes, ProofError>;
    }
}

// ---- Helpers ----

fn venue() -> Address {
    Address::repeat_byte(0xAA)
}

/// Builder sending `value` to the venue; context is the signer's index.
fn send_value(value: U256) -> impl FnMut(&Signer) -> anyhow::Result<RelayCall<usize>> + Send {
    move |signer| {
        Ok(RelayCall {
            request: TxRequest::transfer(venue(), value),
            context: signer.index().unwrap_or_default(),
        })
    }
}

/// Fund signers `funded` with 1 ETH, leave the rest at zero.
fn ledger_with_funded(pool: &meta_relayer::domain::SignerPool, funded: &[usize]) -> Arc<FakeLedger> {
    let ledger = FakeLedger::new();
    for &i in funded {
        ledger.set_balance(pool.at(i as isize).address(), eth_tenths(10));
    }
    Arc::new(ledger)
}

// ---- Rotation and failover ----

#[tokio::test]
async fn test_fails_over_until_first_funded_signer() {
    let pool = pool_of(4);
    let ledger = ledger_with_funded(&pool, &[2, 3]);
    let relay = TransactionRelay::new(Arc::clone(&ledger), Arc::clone(&pool));

    let receipt = relay.relay(send_value(eth_tenths(1))).await.unwrap();

    assert_eq!(receipt.signer_index, 2);
    assert_eq!(receipt.context, 2);
    assert_eq!(receipt.signer, pool.at(2).address());
    assert_eq!(relay.cursor_position(), 3);

    // Signers 0 and 1 refused, signer 2 confirmed, signer 3 untouched.
    let calls = ledger.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(ledger.accepted_calls().len(), 1);
    assert!(calls.iter().all(|c| c.from != pool.at(3).address()));

    let outcomes: Vec<_> = receipt.attempts.iter().map(|a| &a.outcome).collect();
    assert!(matches!(outcomes[0], AttemptOutcome::InsufficientFunds { .. }));
    assert!(matches!(outcomes[1], AttemptOutcome::InsufficientFunds { .. }));
    assert!(matches!(outcomes[2], AttemptOutcome::Confirmed { .. }));
}

#[tokio::test]
async fn test_structured_funds_code_also_rotates() {
    let pool = pool_of(2);
    let ledger = ledger_with_funded(&pool, &[0, 1]);
    ledger.fail_submissions_from(
        pool.at(0).address(),
        LedgerError::insufficient_funds("balance below value + max fee"),
    );
    let relay = TransactionRelay::new(Arc::clone(&ledger), Arc::clone(&pool));

    let receipt = relay.relay(send_value(eth_tenths(1))).await.unwrap();

    assert_eq!(receipt.signer_index, 1);
    assert_eq!(relay.cursor_position(), 0);
}

#[tokio::test]
async fn test_all_signers_lacking_funds_leaves_cursor_unchanged() {
    let pool = pool_of(3);
    let ledger = ledger_with_funded(&pool, &[]);
    let relay = TransactionRelay::new(Arc::clone(&ledger), Arc::clone(&pool));

    let err = relay.relay(send_value(eth_tenths(1))).await.unwrap_err();

    match err {
        RelayError::AllSignersFailed { attempts } => {
            let tried: Vec<_> = attempts.iter().map(|a| a.signer_index).collect();
            assert_eq!(tried, vec![0, 1, 2]);
        }
        other => panic!("expected AllSignersFailed, got {other:?}"),
    }
    assert_eq!(relay.cursor_position(), 0);
    assert!(ledger.accepted_calls().is_empty());
}

#[tokio::test]
async fn test_rotation_wraps_from_last_signer() {
    let pool = pool_of(3);
    let ledger = ledger_with_funded(&pool, &[0, 1, 2]);
    let relay = TransactionRelay::new(Arc::clone(&ledger), Arc::clone(&pool));

    // Two successes move the cursor to N-1.
    relay.relay(send_value(eth_tenths(1))).await.unwrap();
    relay.relay(send_value(eth_tenths(1))).await.unwrap();
    assert_eq!(relay.cursor_position(), 2);

    let receipt = relay.relay(send_value(eth_tenths(1))).await.unwrap();
    assert_eq!(receipt.signer_index, 2);
    assert_eq!(relay.cursor_position(), 0);
}

#[tokio::test]
async fn test_failover_search_wraps_past_end_of_pool() {
    let pool = pool_of(3);
    let ledger = ledger_with_funded(&pool, &[0, 1]);
    let relay = TransactionRelay::new(Arc::clone(&ledger), Arc::clone(&pool));

    relay.relay(send_value(eth_tenths(1))).await.unwrap();
    relay.relay(send_value(eth_tenths(1))).await.unwrap();
    assert_eq!(relay.cursor_position(), 2);

    // Signer 2 is empty, so the search continues at signer 0.
    let receipt = relay.relay(send_value(eth_tenths(1))).await.unwrap();
    let tried: Vec<_> = receipt.attempts.iter().map(|a| a.signer_index).collect();
    assert_eq!(tried, vec![2, 0]);
    assert_eq!(relay.cursor_position(), 1);
}

// ---- Terminal failures ----

#[tokio::test]
async fn test_non_funds_error_stops_immediately() {
    let pool = pool_of(3);
    let mut mock_ledger = MockLedger::new();

    mock_ledger
        .expect_submit()
        .withf(|signer, _| signer.index() == Some(0))
        .times(1)
        .returning(|_, _| {
            Err(LedgerError::new(
                LedgerErrorCode::Reverted,
                "execution reverted: invalid signature",
            ))
        });
    mock_ledger.expect_await_confirmation().never();
    mock_ledger.expect_balance().never();

    let relay = TransactionRelay::new(Arc::new(mock_ledger), Arc::clone(&pool));
    let err = relay.relay(send_value(U256::ZERO)).await.unwrap_err();

    match err {
        RelayError::Submission {
            signer_index,
            source,
            ..
        } => {
            assert_eq!(signer_index, 0);
            assert_eq!(source.code, Some(LedgerErrorCode::Reverted));
        }
        other => panic!("expected Submission, got {other:?}"),
    }
    assert_eq!(relay.cursor_position(), 0);
}

#[tokio::test]
async fn test_revert_during_confirmation_is_terminal() {
    let pool = pool_of(2);
    let mut mock_ledger = MockLedger::new();

    mock_ledger.expect_submit().times(1).returning(|signer, _| {
        Ok(PendingTx {
            tx_hash: Default::default(),
            from: signer.address(),
        })
    });
    mock_ledger
        .expect_await_confirmation()
        .times(1)
        .returning(|_| Err(LedgerError::new(LedgerErrorCode::Reverted, "transaction reverted")));

    let relay = TransactionRelay::new(Arc::new(mock_ledger), pool);
    let err = relay.relay(send_value(U256::ZERO)).await.unwrap_err();

    assert!(matches!(err, RelayError::Submission { signer_index: 0, .. }));
    assert_eq!(relay.cursor_position(), 0);
}

#[tokio::test]
async fn test_builder_failure_submits_nothing() {
    let pool = pool_of(2);
    let ledger = ledger_with_funded(&pool, &[0, 1]);
    let relay = TransactionRelay::new(Arc::clone(&ledger), pool);

    let err = relay
        .relay(|_signer: &Signer| -> anyhow::Result<RelayCall<()>> {
            anyhow::bail!("deadline already passed")
        })
        .await
        .unwrap_err();

    match err {
        RelayError::Instruction { signer_index, reason } => {
            assert_eq!(signer_index, 0);
            assert!(reason.contains("deadline"));
        }
        other => panic!("expected Instruction, got {other:?}"),
    }
    assert!(ledger.calls().is_empty());
}

#[tokio::test]
async fn test_confirmation_timeout_is_reported_as_timeout() {
    let pool = pool_of(2);
    let gate = Arc::new(Semaphore::new(0));
    let ledger = Arc::new(FakeLedger::gated(Arc::clone(&gate)));
    ledger.set_balance(pool.at(0).address(), eth_tenths(10));

    let options = RelayOptions {
        confirmation_timeout: Some(Duration::from_millis(50)),
    };
    let relay = TransactionRelay::with_options(Arc::clone(&ledger), Arc::clone(&pool), options);

    let err = relay.relay(send_value(eth_tenths(1))).await.unwrap_err();

    match err {
        RelayError::Submission { source, .. } => {
            assert_eq!(source.code, Some(LedgerErrorCode::Timeout));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(relay.cursor_position(), 0);
}

// ---- Proof-requiring instructions ----

#[tokio::test]
async fn test_proof_failure_touches_no_signer() {
    let pool = pool_of(3);
    let mut mock_ledger = MockLedger::new();
    mock_ledger.expect_submit().never();
    mock_ledger.expect_balance().never();
    mock_ledger.expect_await_confirmation().never();

    let mut proofs = MockProofs::new();
    proofs
        .expect_fetch_proof()
        .withf(|asset_id| *asset_id == 7)
        .times(1)
        .returning(|_| Err(ProofError::Status(503)));

    let relay = TransactionRelay::new(Arc::new(mock_ledger), pool);
    let mut builder_calls = 0;
    let err = relay
        .relay_with_proof(&proofs, 7, |_signer, _proof| -> anyhow::Result<RelayCall<()>> {
            builder_calls += 1;
            anyhow::bail!("builder must not run")
        })
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::ProofUnavailable(ProofError::Status(503))));
    assert_eq!(builder_calls, 0);
    assert_eq!(relay.cursor_position(), 0);
}

#[tokio::test]
async fn test_proof_is_passed_to_every_attempt() {
    let pool = pool_of(2);
    let ledger = ledger_with_funded(&pool, &[1]);

    let mut proofs = MockProofs::new();
    proofs
        .expect_fetch_proof()
        .times(1)
        .returning(|_| Ok(Bytes::from_static(&[0xde, 0xad])));

    let relay = TransactionRelay::new(Arc::clone(&ledger), Arc::clone(&pool));
    let receipt = relay
        .relay_with_proof(&proofs, 1, |signer, proof| {
            Ok(RelayCall {
                request: TxRequest {
                    to: venue(),
                    value: eth_tenths(1),
                    input: proof.clone(),
                },
                context: signer.index(),
            })
        })
        .await
        .unwrap();

    assert_eq!(receipt.context, Some(1));
    let calls = ledger.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.request.input.as_ref() == [0xde, 0xad]));
}

// ---- Concurrency ----

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_relays_each_confirm_once() {
    let pool = pool_of(3);
    let ledger = ledger_with_funded(&pool, &[0, 1, 2]);
    let relay = Arc::new(TransactionRelay::new(Arc::clone(&ledger), Arc::clone(&pool)));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move { relay.relay(send_value(eth_tenths(1))).await })
        })
        .collect();

    for handle in handles {
        let receipt = handle.await.unwrap().unwrap();
        assert_eq!(receipt.attempts.len(), 1);
    }

    assert_eq!(ledger.accepted_calls().len(), 6);
    assert!(relay.cursor_position() < pool.count());
}

#[tokio::test]
async fn test_overlapping_relays_start_on_distinct_signers() {
    let pool = pool_of(3);
    let gate = Arc::new(Semaphore::new(0));
    let ledger = Arc::new(FakeLedger::gated(Arc::clone(&gate)));
    for signer in pool.iter() {
        ledger.set_balance(signer.address(), eth_tenths(10));
    }
    let relay = Arc::new(TransactionRelay::new(Arc::clone(&ledger), Arc::clone(&pool)));

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move { relay.relay(send_value(eth_tenths(1))).await })
        })
        .collect();

    // All three are submitted and parked on confirmation at the same time.
    while ledger.calls().len() < 3 {
        tokio::task::yield_now().await;
    }
    let senders: HashSet<Address> = ledger.calls().iter().map(|c| c.from).collect();
    assert_eq!(senders, pool.addresses().into_iter().collect::<HashSet<_>>());

    gate.add_permits(3);
    let mut used = HashSet::new();
    for handle in handles {
        let receipt = handle.await.unwrap().unwrap();
        assert_eq!(receipt.attempts.len(), 1);
        used.insert(receipt.signer_index);
    }

    assert_eq!(used, HashSet::from([0, 1, 2]));
    // The slot-2 success ends the lap whichever order they confirm in.
    assert_eq!(relay.cursor_position(), 0);
}
