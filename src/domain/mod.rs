//! Domain layer - Signers, pools, and native amounts.
//!
//! No I/O here. The only external types are alloy primitives and the
//! local key type, which every other layer shares.

pub mod signer;
pub mod units;

pub use signer::{Signer, SignerError, SignerPool, SignerRole};
pub use units::{ether_to_wei, wei_to_ether, AmountError};
