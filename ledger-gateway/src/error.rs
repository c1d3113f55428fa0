//! Error types for gateway operations

use crate::gateway::Capability;
use thiserror::Error;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Gateway errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Network or provider failure
    #[error("Ledger unreachable: {0}")]
    Unreachable(String),

    /// Ledger refused the write for a business reason
    #[error("Ledger rejected the write: {reason}")]
    Rejected {
        /// Reason string as reported by the Ledger
        reason: String,
    },

    /// Signer declined to authorize the write
    #[error("Signer declined to authorize the transaction")]
    UserCancelled,

    /// Optional Ledger operation not offered by this deployment
    #[error("Unsupported ledger operation: {0}")]
    UnsupportedOperation(Capability),

    /// Blob store could not persist the payload
    #[error("Storage failure: {0}")]
    StorageFailure(String),
}

impl GatewayError {
    /// Classify a provider's free-text failure message
    pub fn from_provider_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();

        if lower.contains("user rejected") || lower.contains("user denied") {
            return GatewayError::UserCancelled;
        }

        if lower.contains("network")
            || lower.contains("timeout")
            || lower.contains("timed out")
            || lower.contains("connection")
        {
            return GatewayError::Unreachable(message.to_string());
        }

        let reason = message
            .strip_prefix("execution reverted: ")
            .unwrap_or(message)
            .to_string();
        GatewayError::Rejected { reason }
    }
}
