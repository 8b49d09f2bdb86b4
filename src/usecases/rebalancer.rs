//! Balance Rebalancer Use Case - Treasury Top-ups for the Signer Pool
//!
//! Brings every pool signer up to the target threshold by sending the
//! exact shortfall from the treasury. Meant to be invoked periodically.
//!
//! Rebalance flow:
//! 1. Read treasury balance (warn if at or below the threshold)
//! 2. For each signer in pool order: read balance, skip if sufficient,
//!    otherwise re-read the treasury and transfer the shortfall
//! 3. Return a per-signer report
//!
//! One signer's failure never stops the run. The treasury is re-read for
//! every transfer instead of tracked locally, so spends made elsewhere
//! between transfers are seen.

use std::sync::Arc;

use alloy::primitives::{Address, TxHash, U256};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::domain::{wei_to_ether, Signer, SignerPool};
use crate::ports::ledger::{LedgerClient, LedgerError, TxRequest};

/// Run-level rebalancer failures.
#[derive(Debug, Error)]
pub enum RebalanceError {
  /// Another run is still in progress.
  #[error("a rebalance run is already in progress")]
  AlreadyRunning,

  /// The treasury balance could not be read; nothing was attempted.
  #[error("failed to read treasury balance: {0}")]
  Ledger(#[source] LedgerError),
}

/// Why a signer was not topped up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FundingFailure {
  /// Treasury balance did not exceed the shortfall.
  TreasuryExhausted {
    /// Shortfall in wei.
    needed: U256,
    /// Treasury balance at the time, in wei.
    available: U256,
  },
  /// Signer or treasury balance could not be read.
  BalanceUnavailable {
    /// Ledger reason text.
    reason: String,
  },
  /// Transfer was rejected or did not confirm.
  Transfer {
    /// Ledger reason text.
    reason: String,
  },
}

impl std::fmt::Display for FundingFailure {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::TreasuryExhausted { needed, available } => write!(
        f,
        "treasury exhausted: needed {} ETH, treasury has {} ETH",
        wei_to_ether(*needed),
        wei_to_ether(*available)
      ),
      Self::BalanceUnavailable { reason } => write!(f, "balance unavailable: {reason}"),
      Self::Transfer { reason } => write!(f, "transfer failed: {reason}"),
    }
  }
}

/// What the run did for one signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FundingAction {
  /// Already at or above the threshold.
  Sufficient,
  /// Shortfall transferred and confirmed.
  ToppedUp {
    /// Amount sent, in wei.
    amount: U256,
    /// Transfer hash.
    tx_hash: TxHash,
    /// Inclusion block.
    block_number: u64,
  },
  /// Nothing transferred.
  Failed {
    /// Reason.
    failure: FundingFailure,
  },
}

/// One report line.
#[derive(Debug, Clone, Serialize)]
pub struct SignerFunding {
  /// Pool position.
  pub index: usize,
  /// Signer address.
  pub address: Address,
  /// Balance read at the start of this signer's step (`None` if unreadable).
  pub prior_balance: Option<U256>,
  /// Action taken.
  pub action: FundingAction,
}

impl SignerFunding {
  /// Amount transferred to this signer, if any.
  pub const fn transferred(&self) -> Option<U256> {
    match self.action {
      FundingAction::ToppedUp { amount, .. } => Some(amount),
      _ => None,
    }
  }
}

/// Result of a full rebalance run.
#[derive(Debug, Clone, Serialize)]
pub struct RebalanceReport {
  /// When the run started.
  pub started_at: DateTime<Utc>,
  /// When the run finished.
  pub finished_at: DateTime<Utc>,
  /// Treasury address.
  pub treasury: Address,
  /// Treasury balance before any transfer.
  pub treasury_initial_balance: U256,
  /// Whether the treasury started at or below the threshold.
  pub treasury_underfunded: bool,
  /// Target balance per signer.
  pub threshold: U256,
  /// One entry per pool signer, in pool order.
  pub signers: Vec<SignerFunding>,
}

impl RebalanceReport {
  /// Number of signers topped up.
  pub fn topped_up(&self) -> usize {
    self
      .signers
      .iter()
      .filter(|s| matches!(s.action, FundingAction::ToppedUp { .. }))
      .count()
  }

  /// Number of signers already sufficient.
  pub fn sufficient(&self) -> usize {
    self
      .signers
      .iter()
      .filter(|s| s.action == FundingAction::Sufficient)
      .count()
  }

  /// Number of signers that could not be funded.
  pub fn failed(&self) -> usize {
    self
      .signers
      .iter()
      .filter(|s| matches!(s.action, FundingAction::Failed { .. }))
      .count()
  }

  /// Total wei sent from the treasury.
  pub fn total_transferred(&self) -> U256 {
    self
      .signers
      .iter()
      .filter_map(SignerFunding::transferred)
      .fold(U256::ZERO, |acc, amount| acc + amount)
  }
}

/// Tops up pool signers from the treasury.
pub struct BalanceRebalancer<L: LedgerClient> {
  ledger: Arc<L>,
  pool: Arc<SignerPool>,
  treasury: Signer,
  threshold: U256,
  /// Held for the duration of a run.
  run_lock: tokio::sync::Mutex<()>,
}

impl<L: LedgerClient> BalanceRebalancer<L> {
  /// Create a rebalancer.
  pub fn new(ledger: Arc<L>, pool: Arc<SignerPool>, treasury: Signer, threshold: U256) -> Self {
    Self {
      ledger,
      pool,
      treasury,
      threshold,
      run_lock: tokio::sync::Mutex::new(()),
    }
  }

  /// Target balance per signer, in wei.
  pub const fn threshold(&self) -> U256 {
    self.threshold
  }

  /// Treasury address.
  pub const fn treasury_address(&self) -> Address {
    self.treasury.address()
  }

  /// Run one rebalance pass over the whole pool.
  ///
  /// # Errors
  /// [`RebalanceError::AlreadyRunning`] if a run is in progress, or
  /// [`RebalanceError::Ledger`] if the treasury balance cannot be read.
  /// Per-signer failures are reported, not returned.
  #[instrument(skip(self), fields(treasury = %self.treasury.address(), signers = self.pool.count()))]
  pub async fn run(&self) -> Result<RebalanceReport, RebalanceError> {
    let _running = self
      .run_lock
      .try_lock()
      .map_err(|_| RebalanceError::AlreadyRunning)?;

    let started_at = Utc::now();
    let treasury_address = self.treasury.address();

    let treasury_initial_balance = self
      .ledger
      .balance(treasury_address)
      .await
      .map_err(RebalanceError::Ledger)?;

    info!(
      balance = %wei_to_ether(treasury_initial_balance),
      threshold = %wei_to_ether(self.threshold),
      "Treasury balance"
    );

    let treasury_underfunded = treasury_initial_balance <= self.threshold;
    if treasury_underfunded {
      warn!(
        balance = %wei_to_ether(treasury_initial_balance),
        threshold = %wei_to_ether(self.threshold),
        "Treasury at or below threshold, may not fund every signer"
      );
    }

    let mut signers = Vec::with_capacity(self.pool.count());
    for (index, signer) in self.pool.iter().enumerate() {
      signers.push(self.fund_signer(index, signer).await);
    }

    let report = RebalanceReport {
      started_at,
      finished_at: Utc::now(),
      treasury: treasury_address,
      treasury_initial_balance,
      treasury_underfunded,
      threshold: self.threshold,
      signers,
    };

    info!(
      topped_up = report.topped_up(),
      sufficient = report.sufficient(),
      failed = report.failed(),
      transferred = %wei_to_ether(report.total_transferred()),
      "Rebalance run complete"
    );

    Ok(report)
  }

  async fn fund_signer(&self, index: usize, signer: &Signer) -> SignerFunding {
    let address = signer.address();

    let balance = match self.ledger.balance(address).await {
      Ok(balance) => balance,
      Err(e) => {
        error!(index, address = %address, error = %e, "Failed to read signer balance");
        return SignerFunding {
          index,
          address,
          prior_balance: None,
          action: FundingAction::Failed {
            failure: FundingFailure::BalanceUnavailable { reason: e.message },
          },
        };
      }
    };

    info!(index, address = %address, balance = %wei_to_ether(balance), "Signer balance");

    let action = if balance >= self.threshold {
      FundingAction::Sufficient
    } else {
      self.top_up(index, address, self.threshold - balance).await
    };

    SignerFunding {
      index,
      address,
      prior_balance: Some(balance),
      action,
    }
  }

  async fn top_up(&self, index: usize, address: Address, missing: U256) -> FundingAction {
    info!(index, missing = %wei_to_ether(missing), "Signer below threshold");

    let available = match self.ledger.balance(self.treasury.address()).await {
      Ok(balance) => balance,
      Err(e) => {
        error!(index, error = %e, "Failed to re-read treasury balance");
        return FundingAction::Failed {
          failure: FundingFailure::BalanceUnavailable { reason: e.message },
        };
      }
    };

    if available <= missing {
      let failure = FundingFailure::TreasuryExhausted {
        needed: missing,
        available,
      };
      error!(index, address = %address, "{failure}");
      return FundingAction::Failed { failure };
    }

    let request = TxRequest::transfer(address, missing);
    let transfer = async {
      let pending = self.ledger.submit(&self.treasury, &request).await?;
      info!(index, tx_hash = %pending.tx_hash, "Top-up submitted");
      self.ledger.await_confirmation(pending).await
    };

    match transfer.await {
      Ok(confirmation) => {
        info!(
          index,
          amount = %wei_to_ether(missing),
          tx_hash = %confirmation.tx_hash,
          block = confirmation.block_number,
          "Top-up confirmed"
        );
        FundingAction::ToppedUp {
          amount: missing,
          tx_hash: confirmation.tx_hash,
          block_number: confirmation.block_number,
        }
      }
      Err(e) => {
        error!(index, address = %address, error = %e, "Top-up failed");
        FundingAction::Failed {
          failure: FundingFailure::Transfer { reason: e.message },
        }
      }
    }
  }
}
