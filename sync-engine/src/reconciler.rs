//! State reconciliation
//!
//! One [`Reconciler`] per tracked collection runs fetch → normalize → diff →
//! swap → notify. Cycles for the same collection never overlap: the cycle
//! mutex owns the diff baseline, so holding it is what makes a cycle
//! exclusive. A trigger that finds a cycle running either waits for it
//! (manual and post-write triggers) or is dropped after it finishes
//! (timer, mount and visibility triggers).
//!
//! ```text
//!  trigger ──try_lock──► fetch ──► normalize ──► diff ──► swap ──► notify
//!     │  busy
//!     └──► wait for running cycle ──► Coalesced
//! ```

use crate::config::Config;
use crate::diff::{Change, ClaimBaseline, EmergencyBaseline, PermissionBaseline};
use crate::metrics::{RECONCILIATION_CYCLES_TOTAL, RECONCILIATION_DURATION, SNAPSHOT_SIZE};
use crate::notification::{notifications_for, Notification, NotificationSink};
use crate::snapshot::{Snapshot, SnapshotCell};
use crate::{Error, Result};
use async_trait::async_trait;
use ledger_gateway::LedgerGateway;
use record_core::{
    normalize_bookings, normalize_claims, normalize_permission_requests, normalize_records,
    Address, Booking, Claim, CollectionKind, HealthRecord, PermissionRequest, RecordOrder,
};
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What caused a refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    /// First refresh when the view is started
    Mount,
    /// Interval timer
    Interval,
    /// View became visible again
    Visibility,
    /// Caller asked explicitly
    Manual,
    /// A confirmed write changed this collection
    PostWrite,
}

impl RefreshTrigger {
    /// Whether the trigger is dropped when a cycle is already running
    pub fn coalesces(&self) -> bool {
        matches!(
            self,
            RefreshTrigger::Mount | RefreshTrigger::Interval | RefreshTrigger::Visibility
        )
    }

    /// Stable identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshTrigger::Mount => "mount",
            RefreshTrigger::Interval => "interval",
            RefreshTrigger::Visibility => "visibility",
            RefreshTrigger::Manual => "manual",
            RefreshTrigger::PostWrite => "post_write",
        }
    }
}

impl fmt::Display for RefreshTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a refresh request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// This call ran a cycle
    Refreshed {
        /// Items in the new snapshot
        items: usize,
        /// Notifications published
        notifications: usize,
    },
    /// Another cycle was running; this trigger was folded into it
    Coalesced,
}

/// A collection the reconciler can track
pub trait TrackedCollection: Send + Sync + 'static {
    /// Domain item
    type Item: Clone + Send + Sync + 'static;

    /// Diff state carried between cycles
    type Baseline: Send + 'static;

    /// Collection kind
    const KIND: CollectionKind;

    /// Unseeded baseline
    fn baseline(config: &Config) -> Self::Baseline;

    /// Normalize raw tuples read for `owner`
    fn normalize(raw: &Value, owner: &Address, order: RecordOrder) -> Vec<Self::Item>;

    /// Diff against the baseline, then adopt `items` as the new baseline
    fn observe(baseline: &mut Self::Baseline, items: &[Self::Item]) -> Vec<Change>;
}

/// Health records owned by the identity
#[derive(Debug)]
pub struct Records;

/// Permission requests addressed to the identity
#[derive(Debug)]
pub struct PermissionRequests;

/// Insurance claims filed by the identity
#[derive(Debug)]
pub struct Claims;

/// Hospital bookings of the identity
#[derive(Debug)]
pub struct Bookings;

impl TrackedCollection for Records {
    type Item = HealthRecord;
    type Baseline = EmergencyBaseline;
    const KIND: CollectionKind = CollectionKind::Records;

    fn baseline(config: &Config) -> EmergencyBaseline {
        EmergencyBaseline::new(config.emergency_tracking)
    }

    fn normalize(raw: &Value, owner: &Address, order: RecordOrder) -> Vec<HealthRecord> {
        normalize_records(raw, owner, order)
    }

    fn observe(baseline: &mut EmergencyBaseline, items: &[HealthRecord]) -> Vec<Change> {
        baseline.observe(items)
    }
}

impl TrackedCollection for PermissionRequests {
    type Item = PermissionRequest;
    type Baseline = PermissionBaseline;
    const KIND: CollectionKind = CollectionKind::PermissionRequests;

    fn baseline(_config: &Config) -> PermissionBaseline {
        PermissionBaseline::default()
    }

    fn normalize(raw: &Value, _owner: &Address, order: RecordOrder) -> Vec<PermissionRequest> {
        normalize_permission_requests(raw, order)
    }

    fn observe(baseline: &mut PermissionBaseline, items: &[PermissionRequest]) -> Vec<Change> {
        baseline.observe(items)
    }
}

impl TrackedCollection for Claims {
    type Item = Claim;
    type Baseline = ClaimBaseline;
    const KIND: CollectionKind = CollectionKind::Claims;

    fn baseline(_config: &Config) -> ClaimBaseline {
        ClaimBaseline::default()
    }

    fn normalize(raw: &Value, owner: &Address, order: RecordOrder) -> Vec<Claim> {
        normalize_claims(raw, owner, order)
    }

    fn observe(baseline: &mut ClaimBaseline, items: &[Claim]) -> Vec<Change> {
        baseline.observe(items)
    }
}

impl TrackedCollection for Bookings {
    type Item = Booking;
    type Baseline = ();
    const KIND: CollectionKind = CollectionKind::Bookings;

    fn baseline(_config: &Config) {}

    fn normalize(raw: &Value, _owner: &Address, order: RecordOrder) -> Vec<Booking> {
        normalize_bookings(raw, order)
    }

    fn observe(_baseline: &mut (), _items: &[Booking]) -> Vec<Change> {
        Vec::new()
    }
}

/// Type-erased refresh entry point, used by the scheduler
#[async_trait]
pub trait Refresh: Send + Sync {
    /// Collection this refreshes
    fn kind(&self) -> CollectionKind;

    /// Run or coalesce one cycle
    async fn refresh(&self, trigger: RefreshTrigger) -> Result<RefreshOutcome>;
}

/// Reconciler for one collection of one identity
pub struct Reconciler<C: TrackedCollection> {
    owner: Address,
    gateway: Arc<dyn LedgerGateway>,
    sink: NotificationSink,
    order: RecordOrder,
    snapshot: SnapshotCell<C::Item>,
    cycle: Mutex<C::Baseline>,
    _collection: PhantomData<C>,
}

impl<C: TrackedCollection> fmt::Debug for Reconciler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("collection", &C::KIND)
            .field("owner", &self.owner)
            .field("gateway", &self.gateway.name())
            .finish()
    }
}

impl<C: TrackedCollection> Reconciler<C> {
    /// Create reconciler with an empty, unseeded snapshot
    pub fn new(
        owner: Address,
        gateway: Arc<dyn LedgerGateway>,
        sink: NotificationSink,
        config: &Config,
    ) -> Self {
        Self {
            owner,
            gateway,
            sink,
            order: config.record_order,
            snapshot: SnapshotCell::new(),
            cycle: Mutex::new(C::baseline(config)),
            _collection: PhantomData,
        }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<Snapshot<C::Item>> {
        self.snapshot.load()
    }

    /// Run one cycle, or coalesce into the running one
    pub async fn refresh(&self, trigger: RefreshTrigger) -> Result<RefreshOutcome> {
        let kind = C::KIND;

        let mut baseline = match self.cycle.try_lock() {
            Ok(guard) => guard,
            Err(_) if trigger.coalesces() => {
                debug!(%kind, %trigger, "refresh in flight, coalescing trigger");
                let _running = self.cycle.lock().await;
                RECONCILIATION_CYCLES_TOTAL
                    .with_label_values(&[kind.as_str(), "coalesced"])
                    .inc();
                return Ok(RefreshOutcome::Coalesced);
            }
            Err(_) => {
                debug!(%kind, %trigger, "refresh in flight, waiting for it");
                self.cycle.lock().await
            }
        };

        let started = Instant::now();
        let raw = match self.gateway.read_collection(kind, &self.owner).await {
            Ok(raw) => raw,
            Err(e) => {
                let err = Error::from(e);
                warn!(%kind, %trigger, "Failed to fetch {}: {}", kind.label(), err);
                RECONCILIATION_CYCLES_TOTAL
                    .with_label_values(&[kind.as_str(), "failed"])
                    .inc();
                self.sink.publish_one(Notification::new(
                    err.severity(),
                    format!("fetch-error:{}", kind),
                    format!("Error fetching {}. Please try again.", kind.label()),
                ));
                return Err(err);
            }
        };

        let items = C::normalize(&raw, &self.owner, self.order);
        let changes = C::observe(&mut baseline, &items);
        let count = items.len();
        self.snapshot.store(Snapshot::new(items));

        let notifications = notifications_for(&changes);
        let published = notifications.len();
        self.sink.publish(notifications);
        drop(baseline);

        RECONCILIATION_DURATION
            .with_label_values(&[kind.as_str()])
            .observe(started.elapsed().as_secs_f64());
        RECONCILIATION_CYCLES_TOTAL
            .with_label_values(&[kind.as_str(), "refreshed"])
            .inc();
        SNAPSHOT_SIZE.with_label_values(&[kind.as_str()]).set(count as i64);

        info!(%kind, %trigger, items = count, notifications = published, "reconciliation cycle complete");
        Ok(RefreshOutcome::Refreshed {
            items: count,
            notifications: published,
        })
    }

    /// Re-read the collection to check a workflow's postcondition, and
    /// install it when `check` accepts it.
    ///
    /// The read and the install happen under the cycle lock, so they never
    /// overlap a refresh of the same collection. The baseline advances but
    /// nothing is published: the caller caused the change. A rejected or
    /// failed read leaves snapshot and baseline untouched.
    pub async fn verify_and_install<F>(&self, check: F) -> Result<Vec<C::Item>>
    where
        F: FnOnce(&[C::Item]) -> Result<()> + Send,
    {
        let kind = C::KIND;
        let mut baseline = self.cycle.lock().await;

        let raw = self.gateway.read_collection(kind, &self.owner).await?;
        let items = C::normalize(&raw, &self.owner, self.order);
        check(&items)?;

        let suppressed = C::observe(&mut baseline, &items);
        let count = items.len();
        self.snapshot.store(Snapshot::new(items.clone()));
        drop(baseline);

        SNAPSHOT_SIZE.with_label_values(&[kind.as_str()]).set(count as i64);
        debug!(%kind, items = count, suppressed = suppressed.len(), "installed verified snapshot");
        Ok(items)
    }
}

#[async_trait]
impl<C: TrackedCollection> Refresh for Reconciler<C> {
    fn kind(&self) -> CollectionKind {
        C::KIND
    }

    async fn refresh(&self, trigger: RefreshTrigger) -> Result<RefreshOutcome> {
        Reconciler::<C>::refresh(self, trigger).await
    }
}
