//! Transaction Relay Use Case - Rotating Signer Submission
//!
//! Submits one pre-authorized instruction through the signer pool.
//! Signers are tried in rotation order starting at the shared cursor;
//! a signer that cannot pay is skipped, any other failure stops the
//! relay immediately.
//!
//! Relay flow (explicit state machine):
//! 1. `Trying(attempt)`: build and submit via signer `(start + attempt) mod N`,
//!    where `start` is the slot leased from the cursor
//! 2. confirmed → `Done`: cursor moves past the signer that succeeded
//! 3. out of funds → `Trying(attempt + 1)`
//! 4. any other failure → `Failed`
//! 5. `attempt == N` → `Exhausted`

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use alloy::primitives::{Address, Bytes, TxHash};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, field, info, instrument, warn, Span};
use uuid::Uuid;

use crate::domain::{Signer, SignerPool};
use crate::ports::ledger::{Confirmation, LedgerClient, LedgerError, LedgerErrorCode, TxRequest};
use crate::ports::proof_source::{ProofError, ProofSource};
use crate::usecases::classifier;

/// What the instruction builder hands back for a chosen signer.
#[derive(Debug, Clone)]
pub struct RelayCall<C> {
  /// Transaction to sign and send.
  pub request: TxRequest,
  /// Caller data echoed back in the receipt.
  pub context: C,
}

/// Outcome of trying one signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptOutcome {
  /// Included in a block.
  Confirmed {
    /// Inclusion block.
    block_number: u64,
  },
  /// Signer could not pay; the relay moved on.
  InsufficientFunds {
    /// Ledger reason text.
    reason: String,
  },
  /// Terminal failure on this signer.
  Failed {
    /// Ledger or builder reason text.
    reason: String,
  },
}

/// One signer tried during a relay call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayAttempt {
  /// Pool position of the signer.
  pub signer_index: usize,
  /// Signer address.
  pub signer: Address,
  /// What happened.
  pub outcome: AttemptOutcome,
}

/// Successful relay result.
#[derive(Debug, Clone, Serialize)]
pub struct RelayReceipt<C> {
  /// Correlation id of this relay call (also on its tracing span).
  pub relay_id: Uuid,
  /// Hash of the confirmed transaction.
  pub tx_hash: TxHash,
  /// Inclusion block.
  pub block_number: u64,
  /// Pool position of the signer that succeeded.
  pub signer_index: usize,
  /// Address of the signer that succeeded.
  pub signer: Address,
  /// Caller context from the builder.
  pub context: C,
  /// Every signer tried, in order. The last one is the success.
  pub attempts: Vec<RelayAttempt>,
}

/// Terminal relay failures.
#[derive(Debug, Error)]
pub enum RelayError {
  /// Every signer in the pool lacked funds.
  #[error(
    "all signers failed (likely insufficient funds on all {} configured signers)",
    .attempts.len()
  )]
  AllSignersFailed {
    /// One entry per signer, in the order tried.
    attempts: Vec<RelayAttempt>,
  },

  /// A signer failed for a reason other than funds.
  #[error("submission via signer {signer_index} ({signer}) failed: {source}")]
  Submission {
    /// Pool position of the failing signer.
    signer_index: usize,
    /// Address of the failing signer.
    signer: Address,
    /// Ledger error, unmodified.
    #[source]
    source: LedgerError,
  },

  /// The builder refused to produce a transaction.
  #[error("instruction could not be built for signer {signer_index}: {reason}")]
  Instruction {
    /// Pool position of the signer offered to the builder.
    signer_index: usize,
    /// Builder error text.
    reason: String,
  },

  /// The proof service failed; no signer was tried.
  #[error("proof unavailable: {0}")]
  ProofUnavailable(#[source] ProofError),
}

/// Tuning knobs for a relay instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayOptions {
  /// Upper bound on each of submission and confirmation.
  ///
  /// `None` waits as long as the ledger client does.
  pub confirmation_timeout: Option<Duration>,
}

/// Cursor value captured when a relay starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorSnapshot {
  /// Pool position the relay starts from.
  pub position: usize,
  base: usize,
  commits: u64,
}

#[derive(Debug)]
struct CursorState {
  position: usize,
  in_flight: usize,
  commits: u64,
}

/// Next signer to try, shared by every relay on one pool.
///
/// Only successful relays move the position. Relays running at the same
/// time are handed consecutive start slots (`position + in_flight`), so
/// they begin on different signers instead of queueing on one.
///
/// A commit is accepted if nobody else committed since the snapshot, or
/// if it lands further along the lap than the current position. A slow
/// relay therefore cannot drag the cursor back to a stale position.
#[derive(Debug)]
pub struct RotationCursor {
  len: usize,
  state: Mutex<CursorState>,
}

impl RotationCursor {
  /// Cursor over a pool of `len` signers, starting at 0.
  pub fn new(len: usize) -> Self {
    Self {
      len: len.max(1),
      state: Mutex::new(CursorState {
        position: 0,
        in_flight: 0,
        commits: 0,
      }),
    }
  }

  /// Current position.
  pub fn position(&self) -> usize {
    self.lock().position
  }

  /// Relays currently holding a start slot.
  pub fn in_flight(&self) -> usize {
    self.lock().in_flight
  }

  /// Capture the slot the next relay would start from, without reserving it.
  pub fn snapshot(&self) -> CursorSnapshot {
    let state = self.lock();
    self.capture(&state)
  }

  /// Reserve a start slot for one relay.
  ///
  /// The slot is released when the returned lease is dropped.
  pub fn begin(&self) -> CursorLease<'_> {
    let mut state = self.lock();
    let snapshot = self.capture(&state);
    state.in_flight += 1;
    CursorLease {
      cursor: self,
      snapshot,
    }
  }

  /// Move past `succeeded` unless a newer commit already went further.
  ///
  /// Returns whether the cursor moved.
  pub fn commit(&self, snapshot: CursorSnapshot, succeeded: usize) -> bool {
    let mut state = self.lock();
    let next = (succeeded + 1) % self.len;
    let since = state.commits - snapshot.commits;

    let accepted = since == 0
      || (since < self.len as u64
        && self.lap(snapshot.base, next) > self.lap(snapshot.base, state.position));
    if !accepted {
      return false;
    }
    state.position = next;
    state.commits += 1;
    true
  }

  fn capture(&self, state: &CursorState) -> CursorSnapshot {
    CursorSnapshot {
      position: (state.position + state.in_flight) % self.len,
      base: state.position,
      commits: state.commits,
    }
  }

  /// Steps from `from` to `to`, in `1..=len`.
  const fn lap(&self, from: usize, to: usize) -> usize {
    (to + self.len - from - 1) % self.len + 1
  }

  fn release(&self) {
    let mut state = self.lock();
    state.in_flight = state.in_flight.saturating_sub(1);
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, CursorState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// A reserved start slot, held for the lifetime of one relay.
#[derive(Debug)]
pub struct CursorLease<'a> {
  cursor: &'a RotationCursor,
  snapshot: CursorSnapshot,
}

impl CursorLease<'_> {
  /// Pool position this relay starts from.
  pub const fn start(&self) -> usize {
    self.snapshot.position
  }

  /// Commit a success on `succeeded`; see [`RotationCursor::commit`].
  pub fn commit(&self, succeeded: usize) -> bool {
    self.cursor.commit(self.snapshot, succeeded)
  }
}

impl Drop for CursorLease<'_> {
  fn drop(&mut self) {
    self.cursor.release();
  }
}

enum RelayState<C> {
  Trying { attempt: usize },
  Done(RelayReceipt<C>),
  Failed(RelayError),
  Exhausted,
}

enum AttemptError {
  Ledger(LedgerError),
  Instruction(String),
}

/// Relays instructions through a rotating signer pool.
pub struct TransactionRelay<L: LedgerClient> {
  ledger: Arc<L>,
  pool: Arc<SignerPool>,
  cursor: RotationCursor,
  /// One lock per signer; held from build through broadcast so nonces
  /// on a signer are used in submission order.
  signer_locks: Vec<tokio::sync::Mutex<()>>,
  options: RelayOptions,
}

impl<L: LedgerClient> TransactionRelay<L> {
  /// Create a relay with default options (unbounded waits).
  pub fn new(ledger: Arc<L>, pool: Arc<SignerPool>) -> Self {
    Self::with_options(ledger, pool, RelayOptions::default())
  }

  /// Create a relay with explicit options.
  pub fn with_options(ledger: Arc<L>, pool: Arc<SignerPool>, options: RelayOptions) -> Self {
    let count = pool.count();
    Self {
      ledger,
      cursor: RotationCursor::new(count),
      signer_locks: (0..count).map(|_| tokio::sync::Mutex::new(())).collect(),
      pool,
      options,
    }
  }

  /// The pool this relay rotates over.
  pub fn pool(&self) -> &SignerPool {
    &self.pool
  }

  /// Position the next relay will start from.
  pub fn cursor_position(&self) -> usize {
    self.cursor.position()
  }

  /// Relay one instruction.
  ///
  /// `build` is called once per signer tried and must produce the
  /// transaction for that signer. At most one transaction is confirmed
  /// per call.
  ///
  /// # Errors
  /// - [`RelayError::AllSignersFailed`] if every signer lacked funds
  /// - [`RelayError::Submission`] on the first non-funds failure
  /// - [`RelayError::Instruction`] if `build` fails
  #[instrument(skip_all, fields(relay_id = field::Empty, pool_size = self.pool.count()))]
  pub async fn relay<C, F>(&self, mut build: F) -> Result<RelayReceipt<C>, RelayError>
  where
    C: Send,
    F: FnMut(&Signer) -> anyhow::Result<RelayCall<C>> + Send,
  {
    let relay_id = Uuid::new_v4();
    Span::current().record("relay_id", field::display(relay_id));

    let total = self.pool.count();
    let lease = self.cursor.begin();
    let mut attempts: Vec<RelayAttempt> = Vec::with_capacity(total);
    let mut state = RelayState::Trying { attempt: 0 };

    loop {
      state = match state {
        RelayState::Trying { attempt } if attempt >= total => RelayState::Exhausted,

        RelayState::Trying { attempt } => {
          let logical = (lease.start() + attempt) as isize;
          let idx = self.pool.wrap(logical);
          let signer = self.pool.at(logical);
          let address = signer.address();

          info!(
            signer_index = idx,
            address = %address,
            attempt = attempt + 1,
            total,
            "Trying signer"
          );

          match self.attempt(idx, signer, &mut build).await {
            Ok((confirmation, context)) => {
              attempts.push(RelayAttempt {
                signer_index: idx,
                signer: address,
                outcome: AttemptOutcome::Confirmed {
                  block_number: confirmation.block_number,
                },
              });
              RelayState::Done(RelayReceipt {
                relay_id,
                tx_hash: confirmation.tx_hash,
                block_number: confirmation.block_number,
                signer_index: idx,
                signer: address,
                context,
                attempts: std::mem::take(&mut attempts),
              })
            }
            Err(AttemptError::Ledger(err)) if classifier::is_insufficient_funds(&err) => {
              warn!(
                signer_index = idx,
                address = %address,
                reason = %err,
                "Signer has insufficient funds, trying next"
              );
              attempts.push(RelayAttempt {
                signer_index: idx,
                signer: address,
                outcome: AttemptOutcome::InsufficientFunds {
                  reason: err.message,
                },
              });
              RelayState::Trying {
                attempt: attempt + 1,
              }
            }
            Err(AttemptError::Ledger(err)) => RelayState::Failed(RelayError::Submission {
              signer_index: idx,
              signer: address,
              source: err,
            }),
            Err(AttemptError::Instruction(reason)) => RelayState::Failed(RelayError::Instruction {
              signer_index: idx,
              reason,
            }),
          }
        }

        RelayState::Done(receipt) => {
          if !lease.commit(receipt.signer_index) {
            debug!("Cursor already advanced by a concurrent relay");
          }
          info!(
            tx_hash = %receipt.tx_hash,
            block = receipt.block_number,
            signer_index = receipt.signer_index,
            attempts = receipt.attempts.len(),
            "Relay confirmed"
          );
          return Ok(receipt);
        }

        RelayState::Failed(err) => {
          warn!(error = %err, "Relay failed");
          return Err(err);
        }

        RelayState::Exhausted => {
          warn!(total, "All signers lack funds");
          return Err(RelayError::AllSignersFailed {
            attempts: std::mem::take(&mut attempts),
          });
        }
      };
    }
  }

  /// Fetch a proof for `asset_id`, then relay with it.
  ///
  /// A proof failure is returned before any signer is tried.
  ///
  /// # Errors
  /// [`RelayError::ProofUnavailable`], or anything [`Self::relay`] returns.
  pub async fn relay_with_proof<P, C, F>(
    &self,
    proofs: &P,
    asset_id: u64,
    mut build: F,
  ) -> Result<RelayReceipt<C>, RelayError>
  where
    P: ProofSource + ?Sized,
    C: Send,
    F: FnMut(&Signer, &Bytes) -> anyhow::Result<RelayCall<C>> + Send,
  {
    let proof = proofs
      .fetch_proof(asset_id)
      .await
      .map_err(RelayError::ProofUnavailable)?;

    debug!(asset_id, proof_len = proof.len(), "Proof received");

    self.relay(move |signer| build(signer, &proof)).await
  }

  /// Build, submit, and confirm via one signer.
  async fn attempt<C, F>(
    &self,
    idx: usize,
    signer: &Signer,
    build: &mut F,
  ) -> Result<(Confirmation, C), AttemptError>
  where
    C: Send,
    F: FnMut(&Signer) -> anyhow::Result<RelayCall<C>> + Send,
  {
    let (pending, context) = {
      let _nonce_guard = self.signer_locks[idx].lock().await;

      let call = build(signer).map_err(|e| AttemptError::Instruction(format!("{e:#}")))?;
      let pending = self
        .bounded("submission", self.ledger.submit(signer, &call.request))
        .await
        .map_err(AttemptError::Ledger)?;

      (pending, call.context)
    };

    debug!(tx_hash = %pending.tx_hash, "Transaction submitted, awaiting confirmation");

    let confirmation = self
      .bounded("confirmation", self.ledger.await_confirmation(pending))
      .await
      .map_err(AttemptError::Ledger)?;

    Ok((confirmation, context))
  }

  async fn bounded<T>(
    &self,
    what: &str,
    fut: impl Future<Output = Result<T, LedgerError>> + Send,
  ) -> Result<T, LedgerError> {
    match self.options.confirmation_timeout {
      None => fut.await,
      Some(limit) => tokio::time::timeout(limit, fut).await.unwrap_or_else(|_| {
        Err(LedgerError::new(
          LedgerErrorCode::Timeout,
          format!("{what} did not complete within {limit:?}"),
        ))
      }),
    }
  }
}
