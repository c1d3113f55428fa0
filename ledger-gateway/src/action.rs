//! Ledger write actions and their handles

use crate::gateway::Capability;
use chrono::{DateTime, Utc};
use record_core::{Address, DataType, NativeAmount};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of write, used to key in-flight guards and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Owner approves a permission request
    ApprovePermission,
    /// Owner declines a permission request
    DeclinePermission,
    /// Owner approves an all-records request
    ApproveBatchAccess,
    /// Emergency service elevates itself on a patient
    GrantEmergencyAccess,
    /// Provider appends a record to a patient's history
    AddRecord,
    /// Patient files an insurance claim
    SubmitInsuranceClaim,
}

impl ActionKind {
    /// Stable identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::ApprovePermission => "approve_permission",
            ActionKind::DeclinePermission => "decline_permission",
            ActionKind::ApproveBatchAccess => "approve_batch_access",
            ActionKind::GrantEmergencyAccess => "grant_emergency_access",
            ActionKind::AddRecord => "add_record",
            ActionKind::SubmitInsuranceClaim => "submit_insurance_claim",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A Ledger-mutating call with its arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WriteAction {
    /// Approve a pending permission request
    ApprovePermission {
        /// Request id
        request_id: u64,
    },

    /// Decline a pending permission request
    DeclinePermission {
        /// Request id
        request_id: u64,
    },

    /// Approve a pending all-records request
    ApproveBatchAccess {
        /// Request id
        request_id: u64,
    },

    /// Grant the signer emergency access to a patient's records
    GrantEmergencyAccess {
        /// Patient
        patient: Address,
    },

    /// Append a record to a patient's history
    AddRecord {
        /// Patient
        patient: Address,
        /// Content id of the payload
        ipfs_cid: String,
        /// Data type
        data_type: DataType,
        /// Payload key ciphertext
        encrypted_symmetric_key: String,
    },

    /// File an insurance claim
    SubmitInsuranceClaim {
        /// Insurer that reviews the claim
        insurer: Address,
        /// Content id of the supporting document
        ipfs_hash: String,
        /// Amount in native units
        claim_amount: NativeAmount,
        /// Diagnosis
        diagnosis: String,
        /// Treating hospital
        hospital_name: String,
    },
}

impl WriteAction {
    /// Action kind
    pub fn kind(&self) -> ActionKind {
        match self {
            WriteAction::ApprovePermission { .. } => ActionKind::ApprovePermission,
            WriteAction::DeclinePermission { .. } => ActionKind::DeclinePermission,
            WriteAction::ApproveBatchAccess { .. } => ActionKind::ApproveBatchAccess,
            WriteAction::GrantEmergencyAccess { .. } => ActionKind::GrantEmergencyAccess,
            WriteAction::AddRecord { .. } => ActionKind::AddRecord,
            WriteAction::SubmitInsuranceClaim { .. } => ActionKind::SubmitInsuranceClaim,
        }
    }

    /// Identity the action targets (request id, patient, or claim document)
    pub fn target(&self) -> String {
        match self {
            WriteAction::ApprovePermission { request_id }
            | WriteAction::DeclinePermission { request_id }
            | WriteAction::ApproveBatchAccess { request_id } => request_id.to_string(),
            WriteAction::GrantEmergencyAccess { patient } => patient.to_string(),
            WriteAction::AddRecord { patient, ipfs_cid, .. } => format!("{}/{}", patient, ipfs_cid),
            WriteAction::SubmitInsuranceClaim { ipfs_hash, .. } => ipfs_hash.clone(),
        }
    }

    /// Optional Ledger operation this action relies on
    pub fn required_capability(&self) -> Option<Capability> {
        match self {
            WriteAction::ApproveBatchAccess { .. } => Some(Capability::BatchAccess),
            WriteAction::GrantEmergencyAccess { .. } => Some(Capability::EmergencyAccess),
            WriteAction::SubmitInsuranceClaim { .. } => Some(Capability::SubmitInsuranceClaim),
            _ => None,
        }
    }
}

/// Handle for a submitted, not yet confirmed write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingHandle {
    /// Transaction hash
    pub tx_hash: String,

    /// Action kind
    pub kind: ActionKind,

    /// Submission time
    pub submitted_at: DateTime<Utc>,
}

/// Confirmation of a write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Transaction hash
    pub tx_hash: String,

    /// Block that included the write
    pub block_number: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_target() {
        let action = WriteAction::GrantEmergencyAccess {
            patient: Address::new("0xpatient"),
        };
        assert_eq!(action.kind(), ActionKind::GrantEmergencyAccess);
        assert_eq!(action.target(), "0xpatient");
        assert_eq!(action.required_capability(), Some(Capability::EmergencyAccess));

        let approve = WriteAction::ApprovePermission { request_id: 7 };
        assert_eq!(approve.target(), "7");
        assert_eq!(approve.required_capability(), None);
    }
}
