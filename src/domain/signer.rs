//! Signing identities and the ordered signer pool.
//!
//! A `Signer` pairs an on-chain address with the key that authorizes
//! transactions for it. The `SignerPool` is loaded once at startup and
//! never changes afterwards; every pool is non-empty by construction.

use std::fmt;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer as _;
use thiserror::Error;

/// Errors raised while building signers from key material.
#[derive(Debug, Error)]
pub enum SignerError {
    /// No signing keys were configured.
    #[error("signer pool is empty: at least one private key is required")]
    EmptyPool,

    /// A key could not be parsed.
    #[error("invalid private key for {role}: {reason}")]
    InvalidKey {
        /// Which identity the key belongs to (e.g. "signer 3", "treasury").
        role: String,
        /// Parser message. Never contains the key itself.
        reason: String,
    },
}

/// What a signer is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignerRole {
    /// Member of the relay pool at the given position.
    Pool {
        /// Position in the pool, 0-based.
        index: usize,
    },
    /// Funding source for the rebalancer. Never relays instructions.
    Treasury,
}

/// An identity able to sign and submit transactions.
#[derive(Clone)]
pub struct Signer {
    address: Address,
    key: PrivateKeySigner,
    role: SignerRole,
}

impl Signer {
    /// Wrap an already-parsed key.
    pub fn new(key: PrivateKeySigner, role: SignerRole) -> Self {
        Self {
            address: key.address(),
            key,
            role,
        }
    }

    /// Parse a hex-encoded private key (with or without `0x`).
    pub fn from_private_key(private_key_hex: &str, role: SignerRole) -> Result<Self, SignerError> {
        let key_hex = private_key_hex.trim();
        let key_hex = key_hex.strip_prefix("0x").unwrap_or(key_hex);

        let key: PrivateKeySigner = key_hex.parse().map_err(|e| SignerError::InvalidKey {
            role: role.to_string(),
            reason: format!("{e}"),
        })?;

        Ok(Self::new(key, role))
    }

    /// On-chain address.
    pub const fn address(&self) -> Address {
        self.address
    }

    /// Role of this identity.
    pub const fn role(&self) -> SignerRole {
        self.role
    }

    /// Pool position, or `None` for the treasury.
    pub const fn index(&self) -> Option<usize> {
        match self.role {
            SignerRole::Pool { index } => Some(index),
            SignerRole::Treasury => None,
        }
    }

    /// Key material used by ledger adapters to sign.
    pub const fn credential(&self) -> &PrivateKeySigner {
        &self.key
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("address", &self.address)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for SignerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pool { index } => write!(f, "signer {index}"),
            Self::Treasury => write!(f, "treasury"),
        }
    }
}

/// Ordered, fixed-size, non-empty set of relay signers.
#[derive(Debug, Clone)]
pub struct SignerPool {
    signers: Vec<Signer>,
}

impl SignerPool {
    /// Build a pool from keys in configuration order.
    pub fn new(keys: Vec<PrivateKeySigner>) -> Result<Self, SignerError> {
        if keys.is_empty() {
            return Err(SignerError::EmptyPool);
        }

        let signers = keys
            .into_iter()
            .enumerate()
            .map(|(index, key)| Signer::new(key, SignerRole::Pool { index }))
            .collect();

        Ok(Self { signers })
    }

    /// Parse hex keys in configuration order.
    pub fn from_private_keys<S: AsRef<str>>(keys: &[S]) -> Result<Self, SignerError> {
        if keys.is_empty() {
            return Err(SignerError::EmptyPool);
        }

        let signers = keys
            .iter()
            .enumerate()
            .map(|(index, key)| Signer::from_private_key(key.as_ref(), SignerRole::Pool { index }))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { signers })
    }

    /// Number of signers. Always at least 1.
    pub fn count(&self) -> usize {
        self.signers.len()
    }

    /// Signer at a logical index, wrapping in both directions.
    pub fn at(&self, index: isize) -> &Signer {
        &self.signers[self.wrap(index)]
    }

    /// Map a logical index into `0..count()`.
    pub fn wrap(&self, index: isize) -> usize {
        let n = self.signers.len() as isize;
        // ((index % n) + n) % n
        index.rem_euclid(n) as usize
    }

    /// Signers in pool order.
    pub fn iter(&self) -> impl Iterator<Item = &Signer> {
        self.signers.iter()
    }

    /// Addresses in pool order.
    pub fn addresses(&self) -> Vec<Address> {
        self.signers.iter().map(Signer::address).collect()
    }

    /// Whether an address belongs to the pool.
    pub fn contains(&self, address: Address) -> bool {
        self.signers.iter().any(|s| s.address == address)
    }
}
