//! Configuration Module - TOML-based Relayer Configuration
//!
//! Loads and validates configuration from `config.toml`. Signer and
//! treasury keys may come from the file or from environment variables
//! (`RELAYER_SIGNER_KEYS`, `RELAYER_TREASURY_KEY`). Everything is read
//! once at startup; there is no reload.

pub mod loader;

use std::fmt;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use crate::domain::{ether_to_wei, Signer, SignerError, SignerPool, SignerRole};
use crate::usecases::relay::RelayOptions;

/// Fatal configuration problems. All of them stop the process at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
  /// Config file could not be read.
  #[error("failed to read config file {path}: {source}")]
  Io {
    /// Path that was read.
    path: String,
    /// Underlying I/O error.
    #[source]
    source: std::io::Error,
  },

  /// Config file is not valid TOML for this schema.
  #[error("failed to parse config: {0}")]
  Parse(#[from] toml::de::Error),

  /// No signer keys configured.
  #[error("no signer keys configured (set [signers].private_keys or RELAYER_SIGNER_KEYS)")]
  EmptySignerPool,

  /// No treasury key configured.
  #[error("no treasury key configured (set [treasury].private_key or RELAYER_TREASURY_KEY)")]
  MissingTreasuryKey,

  /// A key failed to parse.
  #[error(transparent)]
  Signer(SignerError),

  /// The treasury is also a pool signer.
  #[error("treasury address {0} is also a pool signer; the treasury must not relay instructions")]
  TreasuryInPool(Address),

  /// A field has an unusable value.
  #[error("invalid {field}: {reason}")]
  Invalid {
    /// Dotted field path.
    field: &'static str,
    /// What is wrong with it.
    reason: String,
  },
}

impl From<SignerError> for ConfigError {
  fn from(err: SignerError) -> Self {
    match err {
      SignerError::EmptyPool => Self::EmptySignerPool,
      other => Self::Signer(other),
    }
  }
}

/// Top-level relayer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Process identity and logging.
  #[serde(default)]
  pub relayer: RelayerConfig,
  /// Chain endpoint and venue contract.
  pub chain: ChainConfig,
  /// Relay signer keys.
  #[serde(default)]
  pub signers: SignersConfig,
  /// Treasury key.
  #[serde(default)]
  pub treasury: TreasuryConfig,
  /// Rebalancing policy.
  pub rebalance: RebalanceConfig,
  /// Proof service.
  #[serde(default)]
  pub proof: ProofConfig,
  /// Metrics and health probes.
  #[serde(default)]
  pub metrics: MetricsConfig,
}

/// Process identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
  /// Human-readable name for logs.
  #[serde(default = "default_name")]
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

impl Default for RelayerConfig {
  fn default() -> Self {
    Self {
      name: default_name(),
      log_level: default_log_level(),
    }
  }
}

/// Chain access configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
  /// JSON-RPC HTTP endpoint.
  pub rpc_url: String,
  /// Refuse to start if the node reports a different chain id.
  pub expected_chain_id: Option<u64>,
  /// Trading venue contract that receives relayed calls.
  pub venue_contract: String,
  /// Bound on submission and on confirmation wait. Unset waits forever.
  pub confirmation_timeout_seconds: Option<u64>,
  /// Receipt polling interval while waiting for inclusion.
  #[serde(default = "default_receipt_poll_interval")]
  pub receipt_poll_interval_ms: u64,
}

/// Relay signer keys.
#[derive(Clone, Default, Deserialize)]
pub struct SignersConfig {
  /// Hex private keys, in rotation order.
  #[serde(default)]
  pub private_keys: Vec<String>,
}

/// Treasury key.
#[derive(Clone, Default, Deserialize)]
pub struct TreasuryConfig {
  /// Hex private key of the funding identity.
  pub private_key: Option<String>,
}

/// Rebalancing policy.
#[derive(Debug, Clone, Deserialize)]
pub struct RebalanceConfig {
  /// Target balance per signer, in ether.
  pub threshold: Decimal,
  /// Seconds between runs in daemon mode.
  #[serde(default = "default_rebalance_interval")]
  pub interval_seconds: u64,
}

/// Proof service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProofConfig {
  /// Base URL; the asset id is sent as the `pairs` query parameter.
  #[serde(default = "default_proof_url")]
  pub base_url: String,
  /// Request timeout in seconds.
  #[serde(default = "default_proof_timeout")]
  pub timeout_seconds: u64,
}

impl Default for ProofConfig {
  fn default() -> Self {
    Self {
      base_url: default_proof_url(),
      timeout_seconds: default_proof_timeout(),
    }
  }
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Enable Prometheus metrics export.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Metrics server bind address.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
  /// Health check endpoint port.
  #[serde(default = "default_health_port")]
  pub health_port: u16,
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: default_true(),
      bind_address: default_metrics_addr(),
      health_port: default_health_port(),
    }
  }
}

impl fmt::Debug for SignersConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SignersConfig")
      .field("private_keys", &format_args!("[{} redacted]", self.private_keys.len()))
      .finish()
  }
}

impl fmt::Debug for TreasuryConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let shown = if self.private_key.is_some() { "Some(<redacted>)" } else { "None" };
    f.debug_struct("TreasuryConfig")
      .field("private_key", &format_args!("{shown}"))
      .finish()
  }
}

impl AppConfig {
  /// Build the relay signer pool.
  pub fn signer_pool(&self) -> Result<SignerPool, ConfigError> {
    Ok(SignerPool::from_private_keys(&self.signers.private_keys)?)
  }

  /// Build the treasury identity.
  pub fn treasury_signer(&self) -> Result<Signer, ConfigError> {
    let key = self
      .treasury
      .private_key
      .as_deref()
      .filter(|k| !k.trim().is_empty())
      .ok_or(ConfigError::MissingTreasuryKey)?;
    Ok(Signer::from_private_key(key, SignerRole::Treasury)?)
  }

  /// Target balance in wei.
  pub fn threshold_wei(&self) -> Result<U256, ConfigError> {
    ether_to_wei(self.rebalance.threshold).map_err(|e| ConfigError::Invalid {
      field: "rebalance.threshold",
      reason: e.to_string(),
    })
  }

  /// Venue contract address.
  pub fn venue_contract(&self) -> Result<Address, ConfigError> {
    self
      .chain
      .venue_contract
      .parse()
      .map_err(|e| ConfigError::Invalid {
        field: "chain.venue_contract",
        reason: format!("{e}"),
      })
  }

  /// Relay options derived from `[chain]`.
  pub fn relay_options(&self) -> RelayOptions {
    RelayOptions {
      confirmation_timeout: self
        .chain
        .confirmation_timeout_seconds
        .map(Duration::from_secs),
    }
  }
}

// Default value functions for serde

fn default_name() -> String {
  "meta-relayer".to_string()
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

fn default_receipt_poll_interval() -> u64 {
  1_000
}

fn default_rebalance_interval() -> u64 {
  900 // 15 minutes
}

fn default_proof_url() -> String {
  "https://backend.brokex.trade/proof".to_string()
}

fn default_proof_timeout() -> u64 {
  10
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}

fn default_health_port() -> u16 {
  8080
}
