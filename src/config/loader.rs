//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, applying key overrides from the
//! environment, validating every parameter, and providing clear error
//! messages for misconfiguration.

use std::path::Path;

use tracing::info;

use super::{AppConfig, ConfigError};

/// Comma-separated signer keys; replaces `[signers].private_keys`.
pub const SIGNER_KEYS_ENV: &str = "RELAYER_SIGNER_KEYS";

/// Treasury key; replaces `[treasury].private_key`.
pub const TREASURY_KEY_ENV: &str = "RELAYER_TREASURY_KEY";

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns a [`ConfigError`] if:
/// - the file doesn't exist or can't be read
/// - TOML parsing fails
/// - validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
    path: path.display().to_string(),
    source,
  })?;

  let mut config = parse_config(&content)?;
  apply_key_overrides(
    &mut config,
    std::env::var(SIGNER_KEYS_ENV).ok(),
    std::env::var(TREASURY_KEY_ENV).ok(),
  );

  validate_config(&config)?;

  info!(
    signers = config.signers.private_keys.len(),
    threshold = %config.rebalance.threshold,
    interval_seconds = config.rebalance.interval_seconds,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse TOML without validating.
///
/// # Errors
/// Returns [`ConfigError::Parse`] on malformed TOML or missing sections.
pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
  Ok(toml::from_str(content)?)
}

/// Replace file-provided keys with environment-provided ones when set.
pub fn apply_key_overrides(
  config: &mut AppConfig,
  signer_keys: Option<String>,
  treasury_key: Option<String>,
) {
  if let Some(keys) = signer_keys.filter(|k| !k.trim().is_empty()) {
    config.signers.private_keys = keys
      .split(',')
      .map(str::trim)
      .filter(|k| !k.is_empty())
      .map(str::to_string)
      .collect();
  }

  if let Some(key) = treasury_key.filter(|k| !k.trim().is_empty()) {
    config.treasury.private_key = Some(key.trim().to_string());
  }
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - a usable RPC URL and venue contract address
/// - a non-empty signer pool with parseable keys
/// - a treasury key that is not also a pool signer
/// - a positive threshold and rebalance interval
///
/// # Errors
/// Returns the first violated rule.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
  // Chain validation
  config
    .chain
    .rpc_url
    .parse::<reqwest::Url>()
    .map_err(|e| ConfigError::Invalid {
      field: "chain.rpc_url",
      reason: e.to_string(),
    })?;
  config.venue_contract()?;

  if config.chain.confirmation_timeout_seconds == Some(0) {
    return Err(ConfigError::Invalid {
      field: "chain.confirmation_timeout_seconds",
      reason: "must be positive when set".into(),
    });
  }
  if config.chain.receipt_poll_interval_ms == 0 {
    return Err(ConfigError::Invalid {
      field: "chain.receipt_poll_interval_ms",
      reason: "must be positive".into(),
    });
  }

  // Identity validation
  let pool = config.signer_pool()?;
  let treasury = config.treasury_signer()?;
  if pool.contains(treasury.address()) {
    return Err(ConfigError::TreasuryInPool(treasury.address()));
  }

  // Rebalance validation
  if config.threshold_wei()?.is_zero() {
    return Err(ConfigError::Invalid {
      field: "rebalance.threshold",
      reason: "must be positive".into(),
    });
  }
  if config.rebalance.interval_seconds == 0 {
    return Err(ConfigError::Invalid {
      field: "rebalance.interval_seconds",
      reason: "must be positive".into(),
    });
  }

  // Proof validation
  if config.proof.base_url.trim().is_empty() {
    return Err(ConfigError::Invalid {
      field: "proof.base_url",
      reason: "must not be empty".into(),
    });
  }

  Ok(())
}
