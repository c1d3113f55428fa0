//! Ledger gateway interface

use crate::{
    action::{PendingHandle, Receipt},
    signer::SignedWrite,
    GatewayError, Result,
};
use async_trait::async_trait;
use record_core::{Address, CollectionKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

/// Optional Ledger operations a deployment may or may not expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Read a patient's insurance claims
    PatientClaims,
    /// File an insurance claim
    SubmitInsuranceClaim,
    /// Approve all-records requests
    BatchAccess,
    /// Emergency access grant and check
    EmergencyAccess,
    /// Read hospital bookings
    Bookings,
}

impl Capability {
    /// Every optional operation
    pub const ALL: [Capability; 5] = [
        Capability::PatientClaims,
        Capability::SubmitInsuranceClaim,
        Capability::BatchAccess,
        Capability::EmergencyAccess,
        Capability::Bookings,
    ];

    /// Capability needed to read a collection, if any
    pub fn for_collection(kind: CollectionKind) -> Option<Capability> {
        match kind {
            CollectionKind::Claims => Some(Capability::PatientClaims),
            CollectionKind::Bookings => Some(Capability::Bookings),
            CollectionKind::Records | CollectionKind::PermissionRequests => None,
        }
    }

    /// Stable identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::PatientClaims => "patient_claims",
            Capability::SubmitInsuranceClaim => "submit_insurance_claim",
            Capability::BatchAccess => "batch_access",
            Capability::EmergencyAccess => "emergency_access",
            Capability::Bookings => "bookings",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Set of optional operations a gateway declared
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities(HashSet<Capability>);

impl Capabilities {
    /// Every optional operation available
    pub fn all() -> Self {
        Self(Capability::ALL.into_iter().collect())
    }

    /// Only the mandatory operations
    pub fn none() -> Self {
        Self::default()
    }

    /// Add a capability
    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    /// Remove a capability
    pub fn without(mut self, capability: Capability) -> Self {
        self.0.remove(&capability);
        self
    }

    /// Check availability
    pub fn supports(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// Fail fast when an operation is unavailable
    pub fn require(&self, capability: Capability) -> Result<()> {
        if self.supports(capability) {
            Ok(())
        } else {
            Err(GatewayError::UnsupportedOperation(capability))
        }
    }
}

/// Ledger gateway trait
///
/// Every call may fail with [`GatewayError::Unreachable`] or
/// [`GatewayError::Rejected`]; implementations never retry.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Gateway name (for logs)
    fn name(&self) -> &str;

    /// Optional operations this deployment offers. Queried once per engine.
    fn capabilities(&self) -> Capabilities;

    /// Raw tuples of one collection for `owner`, exactly as decoded
    async fn read_collection(&self, kind: CollectionKind, owner: &Address) -> Result<Value>;

    /// Submit a signed write
    async fn submit_write(&self, signed: SignedWrite) -> Result<PendingHandle>;

    /// Wait until the write is included or rejected
    async fn await_confirmation(&self, handle: &PendingHandle) -> Result<Receipt>;

    /// Whether `caller` currently holds access to `target`'s records
    async fn check_access(&self, caller: &Address, target: &Address) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_negotiation() {
        let caps = Capabilities::all().without(Capability::PatientClaims);
        assert!(caps.supports(Capability::BatchAccess));
        assert_eq!(
            caps.require(Capability::PatientClaims),
            Err(GatewayError::UnsupportedOperation(Capability::PatientClaims))
        );
        assert!(Capabilities::none().with(Capability::Bookings).require(Capability::Bookings).is_ok());
    }

    #[test]
    fn test_collection_capabilities() {
        assert_eq!(Capability::for_collection(CollectionKind::Records), None);
        assert_eq!(
            Capability::for_collection(CollectionKind::Claims),
            Some(Capability::PatientClaims)
        );
    }
}
