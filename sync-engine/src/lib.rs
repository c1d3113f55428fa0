//! # MedLedger Sync Engine
//!
//! Keeps a render-ready, current view of Ledger state for one signed-in
//! identity and drives Ledger writes through a verified lifecycle.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        SyncEngine                        │
//! │                                                          │
//! │  Scheduler ──► Reconciler<Records | Requests | Claims |  │
//! │  (mount,           Bookings>  fetch → normalize → diff   │
//! │   interval,           │                                  │
//! │   visibility)         ├──► Snapshot (atomic swap)        │
//! │                       └──► NotificationSink (broadcast)  │
//! │                                    ▲                     │
//! │  Workflows ──► TransactionOrchestrator ──────┘           │
//! │  (elevation,    submit → confirm → verify → apply        │
//! │   claims,                                                │
//! │   permissions)                                           │
//! └──────────────────────────────┬───────────────────────────┘
//!                                │
//!                       LedgerGateway / BlobStore
//! ```
//!
//! ## Guarantees
//!
//! - Cycles for one collection never overlap; different collections may
//! - The first successful fetch of a collection never notifies
//! - Local state changes only after confirmation and verification
//! - Every failure ends in a notification; nothing here is fatal

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod notification;
pub mod orchestrator;
pub mod reconciler;
pub mod scheduler;
pub mod snapshot;
pub mod workflow;

// Re-exports
pub use config::{Config, EmergencyTracking, RefreshConfig};
pub use diff::Change;
pub use engine::SyncEngine;
pub use error::{Error, Result};
pub use notification::{Notification, NotificationSink, Severity};
pub use orchestrator::{LedgerTransaction, TransactionOrchestrator, TxOutcome, TxPhase};
pub use reconciler::{Reconciler, Refresh, RefreshOutcome, RefreshTrigger, TrackedCollection};
pub use scheduler::{SchedulerHandle, Visibility};
pub use snapshot::Snapshot;
pub use workflow::{
    AccessElevation, ClaimDocument, ClaimForm, ClaimReceipt, ClaimSubmission, CompletedService,
    ElevationGrant, ElevationMode, ElevationState, FailureKind, InFlightGuard, PermissionActions,
    PermissionDecision,
};
