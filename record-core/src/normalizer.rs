//! Raw Ledger tuple normalization
//!
//! The Ledger hands back whatever its ABI decoder produced: `null`, an object
//! per tuple, a positional array per tuple, wide integers as numbers, decimal
//! strings or `0x` hex. Each `normalize_*` function turns that into domain
//! values and never fails:
//!
//! - Input that is not a sequence yields an empty collection
//! - Elements missing their identity field are dropped
//! - Elements whose status/type code is unrecognised are dropped
//! - Every other missing field receives the default documented on the function
//! - Wide integers are narrowed; a value that does not fit is treated as missing
//!
//! Positional tuples follow the field order of the `*_FIELDS` constants.

use crate::amount::NativeAmount;
use crate::types::{
    Address, Booking, Claim, ClaimStatus, DataType, HealthRecord, PermissionRequest,
    PermissionType, RequestStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Positional field order of a health record tuple
pub const RECORD_FIELDS: &[&str] = &[
    "ipfsCid",
    "dataType",
    "provider",
    "timestamp",
    "isValid",
    "encryptedSymmetricKey",
    "owner",
];

/// Positional field order of a permission request tuple
pub const REQUEST_FIELDS: &[&str] = &[
    "requestId",
    "requester",
    "ipfsCid",
    "permissionType",
    "status",
    "requestDate",
    "expiryDate",
    "incentiveAmount",
    "isIncentiveBased",
];

/// Positional field order of a claim tuple
pub const CLAIM_FIELDS: &[&str] = &[
    "claimId",
    "patient",
    "ipfsHash",
    "claimAmount",
    "diagnosis",
    "hospitalName",
    "timestamp",
    "status",
    "rejectionReason",
    "insuranceProvider",
];

/// Positional field order of a booking tuple
pub const BOOKING_FIELDS: &[&str] = &["hospitalName", "roomType", "bookingDate"];

/// Display ordering applied after normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrder {
    /// Keep the order the Ledger returned
    LedgerOrder,
    /// Reverse the Ledger's order.
    ///
    /// The Ledger appends, so this usually reads most-recent first. It is a
    /// display convention only: nothing guarantees the Ledger's return order
    /// is chronological.
    #[default]
    MostRecentFirst,
}

/// Normalize health record tuples owned by `owner`.
///
/// Identity: non-empty `ipfsCid`. Defaults: unknown `dataType` →
/// [`DataType::Unknown`], missing `provider` → "Unknown Provider", missing
/// `timestamp` → 0, missing `isValid` → false, missing
/// `encryptedSymmetricKey` → "", missing `owner` → the queried owner.
pub fn normalize_records(raw: &Value, owner: &Address, order: RecordOrder) -> Vec<HealthRecord> {
    normalize_with(raw, "records", RECORD_FIELDS, order, |tuple| {
        let ipfs_cid = tuple.identity_text("ipfsCid")?;

        Some(HealthRecord {
            owner: tuple.text("owner").map(Address::new).unwrap_or_else(|| owner.clone()),
            ipfs_cid,
            data_type: tuple
                .code("dataType", |code| Some(DataType::from_code(code)), DataType::from_name)
                .unwrap_or(DataType::Unknown),
            provider: tuple
                .text("provider")
                .map(Address::new)
                .unwrap_or_else(Address::unknown_provider),
            timestamp: tuple.int("timestamp").unwrap_or(0),
            is_valid: tuple.flag("isValid").unwrap_or(false),
            encrypted_symmetric_key: tuple.text("encryptedSymmetricKey").unwrap_or_default(),
        })
    })
}

/// Normalize permission request tuples.
///
/// Identity: `requestId`. Unrecognised `permissionType` or `status` drops the
/// element. Defaults: missing `requester` → "Unknown", missing `ipfsCid` → ""
/// (batch request), missing dates → 0, missing `incentiveAmount` → 0, missing
/// `isIncentiveBased` → false.
pub fn normalize_permission_requests(raw: &Value, order: RecordOrder) -> Vec<PermissionRequest> {
    normalize_with(raw, "permission_requests", REQUEST_FIELDS, order, |tuple| {
        let request_id = tuple.int("requestId")?;
        let permission_type =
            tuple.code("permissionType", PermissionType::from_code, PermissionType::from_name)?;
        let status = tuple.code("status", RequestStatus::from_code, RequestStatus::from_name)?;

        Some(PermissionRequest {
            request_id,
            requester: tuple
                .text("requester")
                .map(Address::new)
                .unwrap_or_else(Address::unknown_party),
            ipfs_cid: tuple.text("ipfsCid").unwrap_or_default(),
            permission_type,
            status,
            request_date: tuple.int("requestDate").unwrap_or(0),
            expiry_date: tuple.int("expiryDate").unwrap_or(0),
            incentive_amount: tuple
                .wide("incentiveAmount")
                .map(NativeAmount::new)
                .unwrap_or_default(),
            is_incentive_based: tuple.flag("isIncentiveBased").unwrap_or(false),
        })
    })
}

/// Normalize insurance claim tuples filed by `patient`.
///
/// Identity: `claimId`. Unrecognised `status` drops the element. Defaults:
/// missing `patient` → the queried patient, missing text fields → "", missing
/// `claimAmount` → 0, missing `insuranceProvider` → "Unknown".
/// `rejectionReason` is kept only for rejected claims.
pub fn normalize_claims(raw: &Value, patient: &Address, order: RecordOrder) -> Vec<Claim> {
    normalize_with(raw, "claims", CLAIM_FIELDS, order, |tuple| {
        let claim_id = tuple.int("claimId")?;
        let status = tuple.code("status", ClaimStatus::from_code, ClaimStatus::from_name)?;
        let rejection_reason = match status {
            ClaimStatus::Rejected => tuple.text("rejectionReason").filter(|r| !r.is_empty()),
            _ => None,
        };

        Some(Claim {
            claim_id,
            patient: tuple.text("patient").map(Address::new).unwrap_or_else(|| patient.clone()),
            ipfs_hash: tuple.text("ipfsHash").unwrap_or_default(),
            claim_amount: tuple.wide("claimAmount").map(NativeAmount::new).unwrap_or_default(),
            diagnosis: tuple.text("diagnosis").unwrap_or_default(),
            hospital_name: tuple.text("hospitalName").unwrap_or_default(),
            timestamp: tuple.int("timestamp").unwrap_or(0),
            status,
            rejection_reason,
            insurance_provider: tuple
                .text("insuranceProvider")
                .map(Address::new)
                .unwrap_or_else(Address::unknown_party),
        })
    })
}

/// Normalize booking tuples.
///
/// Identity: non-empty `hospitalName`. Defaults: missing `roomType` → "",
/// missing `bookingDate` → 0.
pub fn normalize_bookings(raw: &Value, order: RecordOrder) -> Vec<Booking> {
    normalize_with(raw, "bookings", BOOKING_FIELDS, order, |tuple| {
        Some(Booking {
            hospital_name: tuple.identity_text("hospitalName")?,
            room_type: tuple.text("roomType").unwrap_or_default(),
            booking_date: tuple.int("bookingDate").unwrap_or(0),
        })
    })
}

fn normalize_with<T>(
    raw: &Value,
    kind: &'static str,
    fields: &'static [&'static str],
    order: RecordOrder,
    convert: impl Fn(&Tuple<'_>) -> Option<T>,
) -> Vec<T> {
    let items = match raw {
        Value::Array(items) => items,
        Value::Null => return Vec::new(),
        other => {
            debug!(kind, value_type = json_type(other), "ledger returned a non-sequence");
            return Vec::new();
        }
    };

    let mut normalized: Vec<T> = items
        .iter()
        .filter_map(|value| convert(&Tuple { value, fields }))
        .collect();

    let dropped = items.len() - normalized.len();
    if dropped > 0 {
        debug!(kind, dropped, kept = normalized.len(), "dropped malformed ledger tuples");
    }

    if order == RecordOrder::MostRecentFirst {
        normalized.reverse();
    }
    normalized
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One raw tuple, addressable by field name whether it arrived as an object
/// or a positional array
struct Tuple<'a> {
    value: &'a Value,
    fields: &'static [&'static str],
}

impl<'a> Tuple<'a> {
    fn get(&self, name: &str) -> Option<&'a Value> {
        let field = match self.value {
            Value::Object(map) => map.get(name),
            Value::Array(items) => self
                .fields
                .iter()
                .position(|f| *f == name)
                .and_then(|index| items.get(index)),
            _ => None,
        };
        field.filter(|v| !v.is_null())
    }

    fn text(&self, name: &str) -> Option<String> {
        self.get(name)?.as_str().map(str::to_string)
    }

    fn identity_text(&self, name: &str) -> Option<String> {
        self.text(name).filter(|s| !s.trim().is_empty())
    }

    fn int(&self, name: &str) -> Option<u64> {
        self.wide(name).and_then(|v| u64::try_from(v).ok())
    }

    fn wide(&self, name: &str) -> Option<u128> {
        narrow(self.get(name)?)
    }

    fn flag(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    fn code<T>(
        &self,
        name: &str,
        from_code: impl Fn(u64) -> Option<T>,
        from_name: impl Fn(&str) -> Option<T>,
    ) -> Option<T> {
        let value = self.get(name)?;
        if let Some(s) = value.as_str() {
            if let Some(parsed) = from_name(s) {
                return Some(parsed);
            }
        }
        narrow(value)
            .and_then(|v| u64::try_from(v).ok())
            .and_then(from_code)
    }
}

/// Narrow a Ledger integer (JSON number, decimal string or `0x` hex string)
fn narrow(value: &Value) -> Option<u128> {
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                Some(v as u128)
            } else {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
                    .map(|f| f as u128)
            }
        }
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u128::from_str_radix(hex, 16).ok(),
                None => s.parse::<u128>().ok(),
            }
        }
        _ => None,
    }
}
