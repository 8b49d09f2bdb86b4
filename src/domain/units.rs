//! Native-currency amount helpers.
//!
//! All balances and transfers are carried as `U256` wei. Decimal ether
//! only appears at the edges: configuration input and log/report output.

use alloy::primitives::U256;
use alloy::primitives::utils::{format_ether, parse_ether, UnitsError};
use rust_decimal::Decimal;
use thiserror::Error;

/// Fractional digits of one ether in wei.
const WEI_DECIMALS: u32 = 18;

/// Errors converting a decimal ether amount to wei.
#[derive(Debug, Error)]
pub enum AmountError {
    #[error("amount must not be negative, got {0}")]
    Negative(Decimal),

    #[error("amount {0} has more than 18 fractional digits")]
    SubWei(Decimal),

    #[error("amount {amount} is not representable in wei: {source}")]
    Unrepresentable {
        amount: Decimal,
        #[source]
        source: UnitsError,
    },
}

/// Convert a decimal ether amount (e.g. `0.5`) to wei.
///
/// # Errors
/// [`AmountError::Negative`] for negative amounts and
/// [`AmountError::SubWei`] for more than 18 fractional digits.
pub fn ether_to_wei(amount: Decimal) -> Result<U256, AmountError> {
    if amount.is_sign_negative() {
        return Err(AmountError::Negative(amount));
    }
    let normalized = amount.normalize();
    if normalized.scale() > WEI_DECIMALS {
        return Err(AmountError::SubWei(amount));
    }
    parse_ether(&normalized.to_string()).map_err(|source| AmountError::Unrepresentable {
        amount: normalized,
        source,
    })
}

/// Human-readable ether string for logs and reports.
pub fn wei_to_ether(amount: U256) -> String {
    format_ether(amount)
}
