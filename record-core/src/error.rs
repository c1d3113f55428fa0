//! Error types for the record model

use thiserror::Error;

/// Result type for record model operations
pub type Result<T> = std::result::Result<T, Error>;

/// Record model errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Amount text could not be parsed or is negative
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Amount has more fractional digits than the native unit supports
    #[error("Amount precision exceeds {decimals} decimals: {amount}")]
    Precision {
        /// Offending amount
        amount: String,
        /// Native unit decimals
        decimals: u32,
    },

    /// Amount does not fit the target representation
    #[error("Amount out of range: {0}")]
    OutOfRange(String),
}
