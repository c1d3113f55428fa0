//! Core types for the record model
//!
//! All types are designed for:
//! - Stable JSON shape (camelCase fields, SCREAMING_SNAKE_CASE enums)
//! - Lossless re-normalization of serialized values
//! - Read-only use by consumers; the Ledger is the only source of change

use crate::amount::NativeAmount;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ledger account address (owner, provider, requester, insurer)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Sentinel used when a record tuple carries no provider
    pub const UNKNOWN_PROVIDER: &'static str = "Unknown Provider";

    /// Sentinel used when any other party field is missing
    pub const UNKNOWN_PARTY: &'static str = "Unknown";

    /// Create new address
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Provider sentinel
    pub fn unknown_provider() -> Self {
        Self::new(Self::UNKNOWN_PROVIDER)
    }

    /// Party sentinel
    pub fn unknown_party() -> Self {
        Self::new(Self::UNKNOWN_PARTY)
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the empty string
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// `0x` followed by 40 hex digits
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == 42
            && self.0.starts_with("0x")
            && self.0[2..].chars().all(|c| c.is_ascii_hexdigit())
    }

    /// Leading 10 characters, used in notification text
    pub fn short(&self) -> &str {
        self.0.get(..10).unwrap_or(&self.0)
    }

    /// Trailing `n` characters
    pub fn tail(&self, n: usize) -> &str {
        let start = self.0.len().saturating_sub(n);
        self.0.get(start..).unwrap_or(&self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

/// Record data type (Ledger enum order)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    /// Electronic health record
    Ehr,
    /// Personal health record
    Phr,
    /// Laboratory result
    LabResult,
    /// Prescription
    Prescription,
    /// Imaging study
    Imaging,
    /// Insurance claim document
    InsuranceClaim,
    /// Record written by an emergency service
    EmergencyRecord,
    /// Code the client does not recognise
    Unknown,
}

impl DataType {
    /// Decode the Ledger's numeric code
    pub fn from_code(code: u64) -> Self {
        match code {
            0 => DataType::Ehr,
            1 => DataType::Phr,
            2 => DataType::LabResult,
            3 => DataType::Prescription,
            4 => DataType::Imaging,
            5 => DataType::InsuranceClaim,
            6 => DataType::EmergencyRecord,
            _ => DataType::Unknown,
        }
    }

    /// Numeric code sent on writes (`None` for [`DataType::Unknown`])
    pub fn code(&self) -> Option<u8> {
        match self {
            DataType::Ehr => Some(0),
            DataType::Phr => Some(1),
            DataType::LabResult => Some(2),
            DataType::Prescription => Some(3),
            DataType::Imaging => Some(4),
            DataType::InsuranceClaim => Some(5),
            DataType::EmergencyRecord => Some(6),
            DataType::Unknown => None,
        }
    }

    /// Parse from the serialized name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "EHR" => Some(DataType::Ehr),
            "PHR" => Some(DataType::Phr),
            "LAB_RESULT" => Some(DataType::LabResult),
            "PRESCRIPTION" => Some(DataType::Prescription),
            "IMAGING" => Some(DataType::Imaging),
            "INSURANCE_CLAIM" => Some(DataType::InsuranceClaim),
            "EMERGENCY_RECORD" => Some(DataType::EmergencyRecord),
            "UNKNOWN" => Some(DataType::Unknown),
            _ => None,
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            DataType::Ehr => "EHR",
            DataType::Phr => "PHR",
            DataType::LabResult => "Lab Results",
            DataType::Prescription => "Prescription",
            DataType::Imaging => "Imaging",
            DataType::InsuranceClaim => "Insurance Claim",
            DataType::EmergencyRecord => "Emergency Record",
            DataType::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Kind of access a permission request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionType {
    /// Read access
    View,
    /// Write access
    Edit,
    /// Emergency access
    Emergency,
    /// Insurer processing a claim
    InsuranceProcessing,
    /// Laboratory processing
    LabProcessing,
    /// Pharmacy processing
    PrescriptionProcessing,
}

impl PermissionType {
    /// Decode the Ledger's numeric code
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(PermissionType::View),
            1 => Some(PermissionType::Edit),
            2 => Some(PermissionType::Emergency),
            3 => Some(PermissionType::InsuranceProcessing),
            4 => Some(PermissionType::LabProcessing),
            5 => Some(PermissionType::PrescriptionProcessing),
            _ => None,
        }
    }

    /// Parse from the serialized name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "VIEW" => Some(PermissionType::View),
            "EDIT" => Some(PermissionType::Edit),
            "EMERGENCY" => Some(PermissionType::Emergency),
            "INSURANCE_PROCESSING" => Some(PermissionType::InsuranceProcessing),
            "LAB_PROCESSING" => Some(PermissionType::LabProcessing),
            "PRESCRIPTION_PROCESSING" => Some(PermissionType::PrescriptionProcessing),
            _ => None,
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            PermissionType::View => "View Access",
            PermissionType::Edit => "Edit Access",
            PermissionType::Emergency => "Emergency Access",
            PermissionType::InsuranceProcessing => "Insurance Processing",
            PermissionType::LabProcessing => "Lab Processing",
            PermissionType::PrescriptionProcessing => "Prescription Processing",
        }
    }
}

/// Permission request state machine
///
/// `Pending → {Approved, Rejected}`, `Approved → Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    /// Awaiting the owner's decision
    Pending,
    /// Owner approved
    Approved,
    /// Owner declined
    Rejected,
    /// Approved access has been used up
    Completed,
}

impl RequestStatus {
    /// Decode the Ledger's numeric code
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(RequestStatus::Pending),
            1 => Some(RequestStatus::Approved),
            2 => Some(RequestStatus::Rejected),
            3 => Some(RequestStatus::Completed),
            _ => None,
        }
    }

    /// Parse from the serialized name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(RequestStatus::Pending),
            "APPROVED" => Some(RequestStatus::Approved),
            "REJECTED" => Some(RequestStatus::Rejected),
            "COMPLETED" => Some(RequestStatus::Completed),
            _ => None,
        }
    }

    /// Whether the Ledger may move a request from `self` to `next`
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        matches!(
            (self, next),
            (RequestStatus::Pending, RequestStatus::Approved)
                | (RequestStatus::Pending, RequestStatus::Rejected)
                | (RequestStatus::Approved, RequestStatus::Completed)
        )
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "Pending",
            RequestStatus::Approved => "Approved",
            RequestStatus::Rejected => "Rejected",
            RequestStatus::Completed => "Completed",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Insurance claim status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
    /// Awaiting insurer review
    Pending,
    /// Insurer approved
    Approved,
    /// Insurer rejected
    Rejected,
}

impl ClaimStatus {
    /// Decode the Ledger's numeric code
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(ClaimStatus::Pending),
            1 => Some(ClaimStatus::Approved),
            2 => Some(ClaimStatus::Rejected),
            _ => None,
        }
    }

    /// Parse from the serialized name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(ClaimStatus::Pending),
            "APPROVED" => Some(ClaimStatus::Approved),
            "REJECTED" => Some(ClaimStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ClaimStatus::Pending => "Pending",
            ClaimStatus::Approved => "Approved",
            ClaimStatus::Rejected => "Rejected",
        };
        write!(f, "{}", label)
    }
}

/// Collections tracked per signed-in identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    /// Health records owned by the identity
    Records,
    /// Permission requests addressed to the identity
    PermissionRequests,
    /// Insurance claims filed by the identity
    Claims,
    /// Hospital bookings
    Bookings,
}

impl CollectionKind {
    /// All kinds, in refresh order
    pub const ALL: [CollectionKind; 4] = [
        CollectionKind::Records,
        CollectionKind::PermissionRequests,
        CollectionKind::Claims,
        CollectionKind::Bookings,
    ];

    /// Stable identifier (metrics labels, dedupe keys)
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Records => "records",
            CollectionKind::PermissionRequests => "permission_requests",
            CollectionKind::Claims => "claims",
            CollectionKind::Bookings => "bookings",
        }
    }

    /// Wording used in user-facing messages
    pub fn label(&self) -> &'static str {
        match self {
            CollectionKind::Records => "health records",
            CollectionKind::PermissionRequests => "permission requests",
            CollectionKind::Claims => "insurance claims",
            CollectionKind::Bookings => "appointments",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Health record, identified by `(owner, ipfs_cid)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    /// Record owner (patient)
    pub owner: Address,

    /// Content identifier of the encrypted payload (never empty)
    pub ipfs_cid: String,

    /// Data type
    pub data_type: DataType,

    /// Provider that wrote the record
    pub provider: Address,

    /// Unix seconds
    pub timestamp: u64,

    /// Ledger validity flag
    pub is_valid: bool,

    /// Opaque ciphertext of the payload key
    pub encrypted_symmetric_key: String,
}

impl HealthRecord {
    /// Written by an emergency service
    pub fn is_emergency(&self) -> bool {
        self.data_type == DataType::EmergencyRecord
    }
}

/// Access request addressed to a record owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    /// Ledger-assigned request id
    pub request_id: u64,

    /// Requesting party
    pub requester: Address,

    /// Target record; empty means every record of the owner
    pub ipfs_cid: String,

    /// Requested access
    pub permission_type: PermissionType,

    /// Current status
    pub status: RequestStatus,

    /// Unix seconds
    pub request_date: u64,

    /// Unix seconds
    pub expiry_date: u64,

    /// Incentive offered, zero if not incentive-based
    pub incentive_amount: NativeAmount,

    /// Whether the requester offers an incentive
    pub is_incentive_based: bool,
}

impl PermissionRequest {
    /// Request made by an insurer
    pub fn is_insurance_request(&self) -> bool {
        self.permission_type == PermissionType::InsuranceProcessing
    }

    /// Request covering every record of the owner
    pub fn is_batch_request(&self) -> bool {
        self.ipfs_cid.is_empty()
    }
}

/// Insurance claim filed by a patient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    /// Ledger-assigned claim id
    pub claim_id: u64,

    /// Filing patient
    pub patient: Address,

    /// Content identifier of the supporting document
    pub ipfs_hash: String,

    /// Claimed amount in native units
    pub claim_amount: NativeAmount,

    /// Diagnosis text
    pub diagnosis: String,

    /// Treating hospital
    pub hospital_name: String,

    /// Unix seconds
    pub timestamp: u64,

    /// Current status
    pub status: ClaimStatus,

    /// Present only when rejected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,

    /// Insurer reviewing the claim
    pub insurance_provider: Address,
}

/// Hospital booking (read-only projection)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    /// Hospital
    pub hospital_name: String,

    /// Room type
    pub room_type: String,

    /// Unix seconds
    pub booking_date: u64,
}

impl Booking {
    /// "General Room", "ICU Room", ...
    pub fn appointment_type(&self) -> String {
        format!("{} Room", self.room_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_codes() {
        assert_eq!(DataType::from_code(6), DataType::EmergencyRecord);
        assert_eq!(DataType::from_code(42), DataType::Unknown);
        assert_eq!(DataType::EmergencyRecord.code(), Some(6));
        assert_eq!(DataType::Unknown.code(), None);
        assert_eq!(DataType::from_name("lab_result"), Some(DataType::LabResult));
    }

    #[test]
    fn test_request_status_transitions() {
        assert!(RequestStatus::Pending.can_transition_to(RequestStatus::Approved));
        assert!(RequestStatus::Pending.can_transition_to(RequestStatus::Rejected));
        assert!(RequestStatus::Approved.can_transition_to(RequestStatus::Completed));
        assert!(!RequestStatus::Rejected.can_transition_to(RequestStatus::Approved));
        assert!(!RequestStatus::Pending.can_transition_to(RequestStatus::Completed));
    }

    #[test]
    fn test_address_helpers() {
        let addr = Address::new("0x1234567890abcdef1234567890abcdef12345678");
        assert!(addr.is_well_formed());
        assert_eq!(addr.short(), "0x12345678");
        assert_eq!(addr.tail(8), "12345678");
        assert!(!Address::new("0x12").is_well_formed());
        assert_eq!(Address::new("ab").tail(8), "ab");
    }

    #[test]
    fn test_serialized_shape() {
        let record = HealthRecord {
            owner: Address::new("0xowner"),
            ipfs_cid: "QmCid".to_string(),
            data_type: DataType::EmergencyRecord,
            provider: Address::unknown_provider(),
            timestamp: 10,
            is_valid: true,
            encrypted_symmetric_key: String::new(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["ipfsCid"], "QmCid");
        assert_eq!(json["dataType"], "EMERGENCY_RECORD");
        assert_eq!(json["provider"], "Unknown Provider");
    }
}
