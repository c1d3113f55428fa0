//! Notification events and the sink that publishes them
//!
//! A reconciliation cycle or a workflow produces events; events sharing a
//! `dedupe_key` within one batch are merged before anything is published.

use crate::diff::Change;
use crate::metrics::NOTIFICATIONS_TOTAL;
use chrono::{DateTime, Utc};
use record_core::{ClaimStatus, RequestStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};
use uuid::Uuid;

/// Notification severity, ordered by urgency
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational
    Info,
    /// Something the user asked for happened
    Success,
    /// Needs attention, not alarming
    Warning,
    /// Operation failed
    Error,
}

impl Severity {
    /// Stable identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// User-facing event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Event id
    pub id: Uuid,

    /// Severity
    pub severity: Severity,

    /// Display text
    pub message: String,

    /// Events with the same key in one batch are merged
    pub dedupe_key: String,

    /// Creation time
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    /// Create new notification
    pub fn new(severity: Severity, dedupe_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            severity,
            message: message.into(),
            dedupe_key: dedupe_key.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Map one cycle's changes to notifications
pub fn notifications_for(changes: &[Change]) -> Vec<Notification> {
    let events = changes.iter().filter_map(notification_for).collect();
    dedupe(events)
}

fn notification_for(change: &Change) -> Option<Notification> {
    match change {
        Change::PermissionTransition { request, from: _ } => {
            let party = if request.is_insurance_request() {
                "Insurance Provider"
            } else {
                "Healthcare Provider"
            };
            let key = format!("permission:{}:{}", request.request_id, request.status.label());
            let tail = format!(
                "(request {}, provider {}...)",
                request.request_id,
                request.requester.short()
            );

            match request.status {
                RequestStatus::Approved => Some(Notification::new(
                    Severity::Success,
                    key,
                    format!("{} approved your permission request {}", party, tail),
                )),
                RequestStatus::Rejected => Some(Notification::new(
                    Severity::Warning,
                    key,
                    format!("{} rejected your permission request {}", party, tail),
                )),
                RequestStatus::Pending | RequestStatus::Completed => None,
            }
        }

        Change::PermissionArrivals { request_ids } => {
            let count = request_ids.len();
            (count > 0).then(|| {
                Notification::new(
                    Severity::Info,
                    "permissions:arrivals",
                    format!(
                        "You have {} new {} for access requiring your attention",
                        count,
                        if count == 1 { "request" } else { "requests" }
                    ),
                )
            })
        }

        Change::EmergencyArrivals { count } => (*count > 0).then(|| {
            Notification::new(
                Severity::Success,
                "records:emergency",
                format!(
                    "{} new ambulance service {} added to your health records",
                    count,
                    if *count == 1 { "record" } else { "records" }
                ),
            )
        }),

        Change::ClaimTransition { claim, from: _ } => {
            let key = format!("claim:{}:{}", claim.claim_id, claim.status);
            match claim.status {
                ClaimStatus::Approved => Some(Notification::new(
                    Severity::Success,
                    key,
                    format!(
                        "Insurance claim {} for {} was approved",
                        claim.claim_id, claim.hospital_name
                    ),
                )),
                ClaimStatus::Rejected => {
                    let reason = claim
                        .rejection_reason
                        .as_deref()
                        .filter(|r| !r.is_empty())
                        .map(|r| format!(": {}", r))
                        .unwrap_or_default();
                    Some(Notification::new(
                        Severity::Warning,
                        key,
                        format!(
                            "Insurance claim {} for {} was rejected{}",
                            claim.claim_id, claim.hospital_name, reason
                        ),
                    ))
                }
                ClaimStatus::Pending => None,
            }
        }
    }
}

/// Merge events sharing a dedupe key.
///
/// The first event of each key keeps its position and text; its severity is
/// raised to the most urgent among the merged events.
pub fn dedupe(events: Vec<Notification>) -> Vec<Notification> {
    let mut merged: Vec<Notification> = Vec::with_capacity(events.len());

    for event in events {
        match merged.iter_mut().find(|e| e.dedupe_key == event.dedupe_key) {
            Some(existing) => {
                debug!(key = %event.dedupe_key, "merged duplicate notification");
                existing.severity = existing.severity.max(event.severity);
            }
            None => merged.push(event),
        }
    }

    merged
}

/// Broadcast sink the presentation layer subscribes to
#[derive(Debug, Clone)]
pub struct NotificationSink {
    sender: broadcast::Sender<Notification>,
}

impl NotificationSink {
    /// Create sink with a bounded buffer per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a batch. Publishing with no subscribers is not an error.
    pub fn publish(&self, events: Vec<Notification>) {
        for event in dedupe(events) {
            NOTIFICATIONS_TOTAL
                .with_label_values(&[event.severity.as_str()])
                .inc();
            debug!(severity = %event.severity, key = %event.dedupe_key, "{}", event.message);
            let _ = self.sender.send(event);
        }
    }

    /// Publish a single event
    pub fn publish_one(&self, event: Notification) {
        self.publish(vec![event]);
    }

    /// Raw receiver
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Event stream; a lagging subscriber skips what it missed
    pub fn stream(&self) -> impl Stream<Item = Notification> + Send + 'static {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|item| match item {
            Ok(event) => Some(event),
            Err(err) => {
                warn!("Notification subscriber lagged: {}", err);
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use record_core::{Address, NativeAmount, PermissionRequest, PermissionType};

    fn request(id: u64, status: RequestStatus) -> PermissionRequest {
        PermissionRequest {
            request_id: id,
            requester: Address::new("0xabcdef0123456789abcdef0123456789abcdef01"),
            ipfs_cid: "QmRecord".to_string(),
            permission_type: PermissionType::View,
            status,
            request_date: 0,
            expiry_date: 0,
            incentive_amount: NativeAmount::ZERO,
            is_incentive_based: false,
        }
    }

    #[test]
    fn test_transition_severity() {
        let approved = notifications_for(&[Change::PermissionTransition {
            request: request(7, RequestStatus::Approved),
            from: RequestStatus::Pending,
        }]);
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].severity, Severity::Success);
        assert!(approved[0].message.contains("request 7"));
        assert!(approved[0].message.contains("0xabcdef01..."));

        let rejected = notifications_for(&[Change::PermissionTransition {
            request: request(8, RequestStatus::Rejected),
            from: RequestStatus::Pending,
        }]);
        assert_eq!(rejected[0].severity, Severity::Warning);

        let completed = notifications_for(&[Change::PermissionTransition {
            request: request(9, RequestStatus::Completed),
            from: RequestStatus::Approved,
        }]);
        assert!(completed.is_empty());
    }

    #[test]
    fn test_arrivals_are_one_event() {
        let events = notifications_for(&[Change::PermissionArrivals {
            request_ids: vec![2, 3, 4],
        }]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Info);
        assert!(events[0].message.contains("3 new requests"));

        let single = notifications_for(&[Change::PermissionArrivals { request_ids: vec![2] }]);
        assert!(single[0].message.contains("1 new request for"));
    }

    #[test]
    fn test_dedupe_keeps_first_and_escalates() {
        let events = dedupe(vec![
            Notification::new(Severity::Info, "a", "first"),
            Notification::new(Severity::Success, "b", "other"),
            Notification::new(Severity::Error, "a", "second"),
        ]);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "first");
        assert_eq!(events[0].severity, Severity::Error);
        assert_eq!(events[1].dedupe_key, "b");
    }

    #[tokio::test]
    async fn test_sink_stream() {
        let sink = NotificationSink::new(8);
        let stream = sink.stream();
        tokio::pin!(stream);

        sink.publish(vec![
            Notification::new(Severity::Info, "k", "one"),
            Notification::new(Severity::Warning, "k", "two"),
        ]);

        let event = stream.next().await.unwrap();
        assert_eq!(event.message, "one");
        assert_eq!(event.severity, Severity::Warning);
    }
}
