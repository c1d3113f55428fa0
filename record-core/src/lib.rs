//! MedLedger Record Core
//!
//! Canonical domain model for health records, permission requests, insurance
//! claims and bookings, plus the normalizer that turns raw Ledger tuples into
//! that model.
//!
//! # Architecture
//!
//! - **Domain model**: plain data, no behavior beyond derived flags
//! - **Normalizer**: total function from arbitrary JSON to domain values
//! - **Amounts**: exact conversion between human decimals and native units
//!
//! # Invariants
//!
//! - Normalization never fails: bad input yields fewer elements, never an error
//! - Every admitted element carries its identity field (`ipfsCid`, `requestId`, ...)
//! - Normalizing a normalized collection again is the identity

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod amount;
pub mod error;
pub mod normalizer;
pub mod types;

// Re-exports
pub use amount::{NativeAmount, DEFAULT_NATIVE_DECIMALS};
pub use error::{Error, Result};
pub use normalizer::{
    normalize_bookings, normalize_claims, normalize_permission_requests, normalize_records,
    RecordOrder,
};
pub use types::{
    Address, Booking, Claim, ClaimStatus, CollectionKind, DataType, HealthRecord,
    PermissionRequest, PermissionType, RequestStatus,
};
