//! Rebalancer Tests - Treasury Top-ups Against an In-memory Ledger

mod common;

use std::sync::Arc;

use alloy::primitives::U256;
use tokio::sync::Semaphore;

use common::{eth_tenths, pool_of, treasury, FakeLedger};
use meta_relayer::ports::LedgerError;
use meta_relayer::usecases::rebalancer::FundingFailure;
use meta_relayer::usecases::{BalanceRebalancer, FundingAction, RebalanceError};

fn setup(balances: &[u128], treasury_tenths: u128) -> (Arc<FakeLedger>, BalanceRebalancer<FakeLedger>) {
    let pool = pool_of(balances.len());
    let ledger = Arc::new(FakeLedger::new());
    for (i, tenths) in balances.iter().enumerate() {
        ledger.set_balance(pool.at(i as isize).address(), eth_tenths(*tenths));
    }
    let treasury = treasury();
    ledger.set_balance(treasury.address(), eth_tenths(treasury_tenths));

    let rebalancer = BalanceRebalancer::new(Arc::clone(&ledger), pool, treasury, eth_tenths(5));
    (ledger, rebalancer)
}

#[tokio::test]
async fn test_worked_example() {
    // threshold 0.5, signers [0.2, 0.6, 0.1], treasury 1.0
    let (ledger, rebalancer) = setup(&[2, 6, 1], 10);

    let report = rebalancer.run().await.unwrap();

    assert_eq!(report.topped_up(), 2);
    assert_eq!(report.sufficient(), 1);
    assert_eq!(report.failed(), 0);
    assert!(!report.treasury_underfunded);

    assert_eq!(report.signers[0].transferred(), Some(eth_tenths(3)));
    assert_eq!(report.signers[1].action, FundingAction::Sufficient);
    assert_eq!(report.signers[2].transferred(), Some(eth_tenths(4)));
    assert_eq!(report.total_transferred(), eth_tenths(7));

    assert_eq!(ledger.balance_of(rebalancer.treasury_address()), eth_tenths(3));
    for entry in &report.signers {
        assert!(ledger.balance_of(entry.address) >= eth_tenths(5));
    }
}

#[tokio::test]
async fn test_second_run_transfers_nothing() {
    let (ledger, rebalancer) = setup(&[2, 6, 1], 10);

    rebalancer.run().await.unwrap();
    let transfers_after_first = ledger.accepted_calls().len();

    let report = rebalancer.run().await.unwrap();

    assert_eq!(report.topped_up(), 0);
    assert_eq!(report.sufficient(), 3);
    assert_eq!(ledger.accepted_calls().len(), transfers_after_first);
}

#[tokio::test]
async fn test_treasury_exhausted_for_last_signer() {
    // Needs 0.3 + 0.2 + 0.4 = 0.9, treasury has 0.8.
    let (ledger, rebalancer) = setup(&[2, 3, 1], 8);

    let report = rebalancer.run().await.unwrap();

    assert!(matches!(report.signers[0].action, FundingAction::ToppedUp { .. }));
    assert!(matches!(report.signers[1].action, FundingAction::ToppedUp { .. }));
    match &report.signers[2].action {
        FundingAction::Failed {
            failure: FundingFailure::TreasuryExhausted { needed, available },
        } => {
            assert_eq!(*needed, eth_tenths(4));
            assert_eq!(*available, eth_tenths(3));
        }
        other => panic!("expected treasury exhausted, got {other:?}"),
    }
    assert_eq!(ledger.balance_of(rebalancer.treasury_address()), eth_tenths(3));
}

#[tokio::test]
async fn test_treasury_equal_to_shortfall_is_not_spent() {
    let (ledger, rebalancer) = setup(&[1], 4);

    let report = rebalancer.run().await.unwrap();

    assert!(report.treasury_underfunded);
    assert!(matches!(
        report.signers[0].action,
        FundingAction::Failed {
            failure: FundingFailure::TreasuryExhausted { .. }
        }
    ));
    assert!(ledger.calls().is_empty());
}

#[tokio::test]
async fn test_transfer_failure_does_not_stop_the_run() {
    let (ledger, rebalancer) = setup(&[2, 6, 1], 10);
    let first = pool_of(3).at(0).address();
    ledger.fail_submissions_to(first, LedgerError::unclassified("nonce too low"));

    let report = rebalancer.run().await.unwrap();

    assert!(matches!(
        report.signers[0].action,
        FundingAction::Failed {
            failure: FundingFailure::Transfer { .. }
        }
    ));
    assert_eq!(report.signers[1].action, FundingAction::Sufficient);
    assert_eq!(report.signers[2].transferred(), Some(eth_tenths(4)));
}

#[tokio::test]
async fn test_unreadable_signer_balance_is_isolated() {
    let (ledger, rebalancer) = setup(&[2, 6, 1], 10);
    let middle = pool_of(3).at(1).address();
    ledger.fail_balance_reads(middle);

    let report = rebalancer.run().await.unwrap();

    assert_eq!(report.signers[1].prior_balance, None);
    assert!(matches!(
        report.signers[1].action,
        FundingAction::Failed {
            failure: FundingFailure::BalanceUnavailable { .. }
        }
    ));
    assert_eq!(report.topped_up(), 2);
}

#[tokio::test]
async fn test_unreadable_treasury_aborts_before_any_transfer() {
    let (ledger, rebalancer) = setup(&[2], 10);
    ledger.fail_balance_reads(rebalancer.treasury_address());

    let err = rebalancer.run().await.unwrap_err();

    assert!(matches!(err, RebalanceError::Ledger(_)));
    assert!(ledger.calls().is_empty());
}

#[tokio::test]
async fn test_overlapping_run_is_rejected() {
    let pool = pool_of(1);
    let gate = Arc::new(Semaphore::new(0));
    let ledger = Arc::new(FakeLedger::gated(Arc::clone(&gate)));
    ledger.set_balance(pool.at(0).address(), U256::ZERO);
    let treasury = treasury();
    ledger.set_balance(treasury.address(), eth_tenths(10));

    let rebalancer = Arc::new(BalanceRebalancer::new(
        Arc::clone(&ledger),
        pool,
        treasury,
        eth_tenths(5),
    ));

    let running = {
        let rebalancer = Arc::clone(&rebalancer);
        tokio::spawn(async move { rebalancer.run().await })
    };

    // Wait until the first run is blocked on its transfer confirmation.
    while ledger.calls().is_empty() {
        tokio::task::yield_now().await;
    }

    assert!(matches!(rebalancer.run().await, Err(RebalanceError::AlreadyRunning)));

    gate.add_permits(1);
    let report = running.await.unwrap().unwrap();
    assert_eq!(report.topped_up(), 1);
}

#[tokio::test]
async fn test_report_serializes_for_operators() {
    let (_ledger, rebalancer) = setup(&[2, 6], 10);

    let report = rebalancer.run().await.unwrap();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["signers"][0]["action"]["action"], "topped_up");
    assert_eq!(json["signers"][1]["action"]["action"], "sufficient");
}

