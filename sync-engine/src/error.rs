//! Error types for the sync engine

use crate::notification::Severity;
use ledger_gateway::{ActionKind, Capability, GatewayError};
use thiserror::Error;

/// Result type for sync engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Sync engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// Local, pre-submission field check failed; nothing reached the Ledger
    #[error("Invalid {field}: {message}")]
    Validation {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        message: String,
    },

    /// Ledger refused the write for a business reason
    #[error("{reason}")]
    LedgerRejected {
        /// Reason as reported by the Ledger
        reason: String,
    },

    /// Network or provider failure
    #[error("Ledger unreachable: {0}")]
    LedgerUnreachable(String),

    /// Signer declined to authorize the write
    #[error("Transaction was rejected by user")]
    UserCancelled,

    /// Write confirmed but its postcondition does not hold
    #[error("Verification mismatch: {0}")]
    VerificationMismatch(String),

    /// Optional Ledger operation not offered by this deployment
    #[error("Feature not available: {0}")]
    UnsupportedOperation(Capability),

    /// Blob store could not persist the document
    #[error("Storage failure: {0}")]
    Storage(String),

    /// Same action on the same target is already running
    #[error("{kind} already in flight for {target}")]
    AlreadyInFlight {
        /// Action kind
        kind: ActionKind,
        /// Target identity
        target: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<GatewayError> for Error {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unreachable(msg) => Error::LedgerUnreachable(msg),
            GatewayError::Rejected { reason } => Error::LedgerRejected { reason },
            GatewayError::UserCancelled => Error::UserCancelled,
            GatewayError::UnsupportedOperation(capability) => Error::UnsupportedOperation(capability),
            GatewayError::StorageFailure(msg) => Error::Storage(msg),
        }
    }
}

/// Known Ledger rejection reasons and the guidance shown for them
const REJECTION_GUIDANCE: &[(&str, &str)] = &[
    ("Invalid patient address", "Invalid patient address provided"),
    (
        "Only ambulance services",
        "Only authorized ambulance services can request emergency access",
    ),
    (
        "Record already exists",
        "Emergency service record already exists for this patient",
    ),
    ("Request is not pending", "This request has already been processed"),
    (
        "Not a batch access request",
        "Only requests covering all records can be approved as batch access",
    ),
    ("Invalid insurance provider address", "Invalid insurance provider address provided"),
];

/// Rejections worded differently when the grant is for batch processing
const BATCH_REJECTION_GUIDANCE: &[(&str, &str)] = &[(
    "Only ambulance services",
    "Only authorized ambulance services can request batch access",
)];

fn lookup(table: &[(&str, &'static str)], reason: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(needle, _)| reason.contains(needle))
        .map(|(_, guidance)| *guidance)
}

/// Guidance for a Ledger rejection reason, if it is a known one
pub fn rejection_guidance(reason: &str) -> Option<&'static str> {
    lookup(REJECTION_GUIDANCE, reason)
}

/// Guidance for a rejected batch access grant
pub fn batch_rejection_guidance(reason: &str) -> Option<&'static str> {
    lookup(BATCH_REJECTION_GUIDANCE, reason).or_else(|| rejection_guidance(reason))
}

impl Error {
    /// Shorthand for a validation failure
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Error::Validation {
            field,
            message: message.into(),
        }
    }

    /// Severity of the notification this error surfaces as
    pub fn severity(&self) -> Severity {
        match self {
            Error::Validation { .. }
            | Error::UserCancelled
            | Error::UnsupportedOperation(_)
            | Error::AlreadyInFlight { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// User-facing text, replacing the raw error where guidance exists
    pub fn user_message(&self, context: &str) -> String {
        self.user_message_with(context, rejection_guidance)
    }

    /// Like [`Error::user_message`], with a different rejection guidance table
    pub fn user_message_with(
        &self,
        context: &str,
        guidance: impl Fn(&str) -> Option<&'static str>,
    ) -> String {
        match self {
            Error::UserCancelled => self.to_string(),
            Error::LedgerRejected { reason } => match guidance(reason) {
                Some(guidance) => guidance.to_string(),
                None => format!("{}: {}", context, reason),
            },
            Error::LedgerUnreachable(_) => {
                format!("{}: could not reach the ledger, check your connection and try again", context)
            }
            _ => format!("{}: {}", context, self),
        }
    }
}
