//! Workflows composed from the orchestrator
//!
//! - [`AccessElevation`]: grant-then-verify emergency and batch access
//! - [`ClaimSubmission`]: validate, store the document, file the claim
//! - [`PermissionActions`]: the owner's approve/decline decisions

pub mod access;
pub mod claim;
pub mod permission;

pub use access::{AccessElevation, CompletedService, ElevationGrant, ElevationMode, ElevationState, FailureKind};
pub use claim::{ClaimDocument, ClaimForm, ClaimReceipt, ClaimSubmission};
pub use permission::{PermissionActions, PermissionDecision};

use crate::notification::{Notification, NotificationSink};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ledger_gateway::ActionKind;
use std::sync::Arc;
use tracing::debug;

type InFlightKey = (ActionKind, String);

/// At most one running workflow per (action kind, target)
#[derive(Debug, Clone, Default)]
pub struct InFlightGuard {
    active: Arc<DashMap<InFlightKey, DateTime<Utc>>>,
}

impl InFlightGuard {
    /// Create empty guard
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the pair, or fail with [`Error::AlreadyInFlight`]
    pub fn acquire(&self, kind: ActionKind, target: impl Into<String>) -> Result<InFlightToken> {
        let target = target.into();
        match self.active.entry((kind, target.clone())) {
            Entry::Occupied(_) => Err(Error::AlreadyInFlight { kind, target }),
            Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                Ok(InFlightToken {
                    active: Arc::clone(&self.active),
                    key: (kind, target),
                })
            }
        }
    }

    /// Whether the pair is currently claimed
    pub fn is_in_flight(&self, kind: ActionKind, target: &str) -> bool {
        self.active.contains_key(&(kind, target.to_string()))
    }
}

/// Releases its pair on drop
#[derive(Debug)]
pub struct InFlightToken {
    active: Arc<DashMap<InFlightKey, DateTime<Utc>>>,
    key: InFlightKey,
}

impl Drop for InFlightToken {
    fn drop(&mut self) {
        if let Some((_, started)) = self.active.remove(&self.key) {
            debug!(
                kind = %self.key.0,
                target = %self.key.1,
                held_ms = (Utc::now() - started).num_milliseconds(),
                "released in-flight slot"
            );
        }
    }
}

/// Surface a failure that happened before the orchestrator took over
pub(crate) fn report(sink: &NotificationSink, key: &str, context: &str, err: &Error) {
    sink.publish_one(Notification::new(err.severity(), key, err.user_message(context)));
}
