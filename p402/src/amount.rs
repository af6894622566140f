//! Amount parsing in smallest currency units.
//!
//! Amounts on the wire are decimal integer strings and are always compared as
//! [`U256`]. Human-readable prices such as `"0.001"` are converted with
//! [`parse_price`] given the currency's decimal places.

use alloy_primitives::U256;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Errors from amount and price parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    /// Input was empty.
    #[error("amount is empty")]
    Empty,
    /// Input contains something other than ASCII digits.
    #[error("amount '{0}' is not a decimal integer")]
    NotAnInteger(String),
    /// Input does not fit in 256 bits.
    #[error("amount '{0}' overflows 256 bits")]
    Overflow(String),
    /// Human price could not be parsed.
    #[error("price '{0}' is not a valid decimal number")]
    InvalidPrice(String),
    /// Human price is negative.
    #[error("price '{0}' is negative")]
    NegativePrice(String),
    /// Human price has more fractional digits than the currency allows.
    #[error("price '{price}' has more than {decimals} fractional digits")]
    TooPrecise {
        /// The offending input.
        price: String,
        /// Decimal places of the currency.
        decimals: u8,
    },
}

/// Parses a smallest-unit amount given as a decimal integer string.
///
/// Only ASCII digits are accepted: no sign, no hex prefix, no separators.
///
/// # Errors
///
/// Returns [`AmountError`] if the input is empty, non-decimal, or exceeds 256 bits.
pub fn parse_amount(raw: &str) -> Result<U256, AmountError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AmountError::Empty);
    }
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AmountError::NotAnInteger(raw.to_owned()));
    }
    U256::from_str_radix(raw, 10).map_err(|_| AmountError::Overflow(raw.to_owned()))
}

/// Converts a human-readable price into smallest units.
///
/// `parse_price("0.5", 18)` yields `500000000000000000`.
///
/// # Errors
///
/// Returns [`AmountError`] if the price is not a non-negative decimal or carries
/// more fractional digits than `decimals`.
pub fn parse_price(price: &str, decimals: u8) -> Result<U256, AmountError> {
    let trimmed = price.trim();
    let value =
        Decimal::from_str(trimmed).map_err(|_| AmountError::InvalidPrice(trimmed.to_owned()))?;
    if value.is_sign_negative() && !value.is_zero() {
        return Err(AmountError::NegativePrice(trimmed.to_owned()));
    }
    let value = value.normalize();
    let scale = value.scale();
    if scale > u32::from(decimals) {
        return Err(AmountError::TooPrecise {
            price: trimmed.to_owned(),
            decimals,
        });
    }
    let mantissa = value.mantissa().unsigned_abs();
    let exponent = u32::from(decimals) - scale;
    U256::from(10u8)
        .checked_pow(U256::from(exponent))
        .and_then(|scale| U256::from(mantissa).checked_mul(scale))
        .ok_or_else(|| AmountError::Overflow(trimmed.to_owned()))
}

/// Renders a smallest-unit amount with `decimals` fractional digits, trimming
/// trailing zeros. Used for log lines and route descriptions.
#[must_use]
pub fn format_amount(amount: U256, decimals: u8) -> String {
    let digits = amount.to_string();
    let decimals = usize::from(decimals);
    if decimals == 0 {
        return digits;
    }
    let padded = format!("{digits:0>width$}", width = decimals + 1);
    let (whole, frac) = padded.split_at(padded.len() - decimals);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        whole.to_owned()
    } else {
        format!("{whole}.{frac}")
    }
}
