//! Native value amounts
//!
//! The Ledger counts value in an integer base unit (18 decimals by default).
//! Humans enter decimals. Conversion is exact: an input with more fractional
//! digits than the unit supports is rejected, never rounded.

use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default number of decimals in the native unit
pub const DEFAULT_NATIVE_DECIMALS: u32 = 18;

/// Amount in the Ledger's native integer unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct NativeAmount(u128);

impl NativeAmount {
    /// Zero
    pub const ZERO: NativeAmount = NativeAmount(0);

    /// Wrap a raw native value
    pub fn new(value: u128) -> Self {
        Self(value)
    }

    /// Raw native value
    pub fn value(&self) -> u128 {
        self.0
    }

    /// True for zero
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Parse a human-entered decimal ("1.25") into native units
    pub fn parse_human(input: &str, decimals: u32) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidAmount("empty".to_string()));
        }
        let amount = Decimal::from_str(trimmed)
            .map_err(|e| Error::InvalidAmount(format!("'{}': {}", trimmed, e)))?;
        Self::from_decimal(amount, decimals)
    }

    /// Convert a decimal into native units
    pub fn from_decimal(amount: Decimal, decimals: u32) -> Result<Self> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(Error::InvalidAmount(format!("negative amount {}", amount)));
        }

        let amount = amount.normalize();
        let scale = amount.scale();
        if scale > decimals {
            return Err(Error::Precision {
                amount: amount.to_string(),
                decimals,
            });
        }

        let mantissa = u128::try_from(amount.mantissa().abs())
            .map_err(|_| Error::OutOfRange(amount.to_string()))?;
        let factor = 10u128
            .checked_pow(decimals - scale)
            .ok_or_else(|| Error::OutOfRange(amount.to_string()))?;
        mantissa
            .checked_mul(factor)
            .map(Self)
            .ok_or_else(|| Error::OutOfRange(amount.to_string()))
    }

    /// Convert back to a decimal (fails above ~7.9e28 base units)
    pub fn to_decimal(&self, decimals: u32) -> Result<Decimal> {
        let value = i128::try_from(self.0).map_err(|_| Error::OutOfRange(self.0.to_string()))?;
        Decimal::try_from_i128_with_scale(value, decimals)
            .map(|d| d.normalize())
            .map_err(|e| Error::OutOfRange(format!("{}: {}", self.0, e)))
    }

    /// Human-readable rendering, raw base units when out of decimal range
    pub fn format_units(&self, decimals: u32) -> String {
        match self.to_decimal(decimals) {
            Ok(decimal) => decimal.to_string(),
            Err(_) => format!("{} base units", self.0),
        }
    }
}

impl fmt::Display for NativeAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<NativeAmount> for String {
    fn from(amount: NativeAmount) -> Self {
        amount.0.to_string()
    }
}

impl TryFrom<String> for NativeAmount {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value
            .trim()
            .parse::<u128>()
            .map(Self)
            .map_err(|e| Error::InvalidAmount(format!("'{}': {}", value, e)))
    }
}
