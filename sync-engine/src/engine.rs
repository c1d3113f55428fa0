//! Sync engine: one signed-in identity's view of the Ledger
//!
//! Owns a reconciler per tracked collection, the notification sink, the
//! transaction orchestrator and the in-flight guard shared by workflows.
//! Capabilities are negotiated once, here; collections the Ledger cannot
//! serve are never scheduled and refuse manual refreshes.

use crate::config::Config;
use crate::notification::{Notification, NotificationSink, Severity};
use crate::orchestrator::TransactionOrchestrator;
use crate::reconciler::{
    Bookings, Claims, PermissionRequests, Reconciler, Records, Refresh, RefreshOutcome,
    RefreshTrigger,
};
use crate::scheduler::{self, ScheduledRefresh, SchedulerHandle, Visibility};
use crate::snapshot::Snapshot;
use crate::workflow::{AccessElevation, ClaimSubmission, InFlightGuard, PermissionActions};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use ledger_gateway::{BlobStore, Capabilities, Capability, LedgerGateway, Signer};
use record_core::{
    Address, Booking, Claim, CollectionKind, HealthRecord, PermissionRequest, RequestStatus,
};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::Stream;
use tracing::{info, warn};

/// Sync engine for one identity
pub struct SyncEngine {
    config: Config,
    owner: Address,
    gateway: Arc<dyn LedgerGateway>,
    signer: Arc<dyn Signer>,
    capabilities: Capabilities,
    sink: NotificationSink,
    orchestrator: Arc<TransactionOrchestrator>,
    guard: InFlightGuard,
    records: Arc<Reconciler<Records>>,
    requests: Arc<Reconciler<PermissionRequests>>,
    claims: Arc<Reconciler<Claims>>,
    bookings: Arc<Reconciler<Bookings>>,
    visibility: watch::Sender<Visibility>,
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("owner", &self.owner)
            .field("gateway", &self.gateway.name())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl SyncEngine {
    /// Create engine for the signer's identity
    pub fn new(config: Config, gateway: Arc<dyn LedgerGateway>, signer: Arc<dyn Signer>) -> Self {
        let owner = signer.address().clone();
        let capabilities = gateway.capabilities();
        let sink = NotificationSink::new(config.notification_capacity);
        let orchestrator = Arc::new(TransactionOrchestrator::new(
            gateway.clone(),
            capabilities.clone(),
            sink.clone(),
        ));

        info!(
            %owner,
            gateway = gateway.name(),
            emergency_tracking = ?config.emergency_tracking,
            "Sync engine created"
        );

        Self {
            records: Arc::new(Reconciler::new(owner.clone(), gateway.clone(), sink.clone(), &config)),
            requests: Arc::new(Reconciler::new(owner.clone(), gateway.clone(), sink.clone(), &config)),
            claims: Arc::new(Reconciler::new(owner.clone(), gateway.clone(), sink.clone(), &config)),
            bookings: Arc::new(Reconciler::new(owner.clone(), gateway.clone(), sink.clone(), &config)),
            visibility: watch::channel(Visibility::Visible).0,
            guard: InFlightGuard::new(),
            config,
            owner,
            gateway,
            signer,
            capabilities,
            sink,
            orchestrator,
        }
    }

    /// Signed-in identity
    pub fn owner(&self) -> &Address {
        &self.owner
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Capabilities negotiated at construction
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Whether a collection can be read on this Ledger
    pub fn is_tracked(&self, kind: CollectionKind) -> bool {
        Capability::for_collection(kind)
            .map(|capability| self.capabilities.supports(capability))
            .unwrap_or(true)
    }

    // ── Notifications ───────────────────────────────────────────

    /// Notification sink
    pub fn sink(&self) -> &NotificationSink {
        &self.sink
    }

    /// Raw notification receiver
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Notification> {
        self.sink.subscribe()
    }

    /// Notification stream
    pub fn notifications(&self) -> impl Stream<Item = Notification> + Send + 'static {
        self.sink.stream()
    }

    // ── Snapshot read API ───────────────────────────────────────

    /// Health records
    pub fn records(&self) -> Arc<Snapshot<HealthRecord>> {
        self.records.snapshot()
    }

    /// Permission requests
    pub fn permission_requests(&self) -> Arc<Snapshot<PermissionRequest>> {
        self.requests.snapshot()
    }

    /// Insurance claims
    pub fn claims(&self) -> Arc<Snapshot<Claim>> {
        self.claims.snapshot()
    }

    /// Bookings
    pub fn bookings(&self) -> Arc<Snapshot<Booking>> {
        self.bookings.snapshot()
    }

    /// Time of the last successful refresh of a collection
    pub fn last_refreshed(&self, kind: CollectionKind) -> Option<DateTime<Utc>> {
        match kind {
            CollectionKind::Records => self.records.snapshot().refreshed_at(),
            CollectionKind::PermissionRequests => self.requests.snapshot().refreshed_at(),
            CollectionKind::Claims => self.claims.snapshot().refreshed_at(),
            CollectionKind::Bookings => self.bookings.snapshot().refreshed_at(),
        }
    }

    // ── Derived views ───────────────────────────────────────────

    /// Records written by emergency services
    pub fn emergency_records(&self) -> Vec<HealthRecord> {
        self.records
            .snapshot()
            .items()
            .iter()
            .filter(|r| r.is_emergency())
            .cloned()
            .collect()
    }

    /// Insurer requests awaiting the owner's decision
    pub fn pending_insurance_requests(&self) -> Vec<PermissionRequest> {
        self.insurance_requests(RequestStatus::Pending)
    }

    /// Insurer requests the owner approved
    pub fn approved_insurance_requests(&self) -> Vec<PermissionRequest> {
        self.insurance_requests(RequestStatus::Approved)
    }

    fn insurance_requests(&self, status: RequestStatus) -> Vec<PermissionRequest> {
        self.requests
            .snapshot()
            .items()
            .iter()
            .filter(|r| r.is_insurance_request() && r.status == status)
            .cloned()
            .collect()
    }

    // ── Refresh ─────────────────────────────────────────────────

    fn reconciler(&self, kind: CollectionKind) -> Arc<dyn Refresh> {
        match kind {
            CollectionKind::Records => self.records.clone(),
            CollectionKind::PermissionRequests => self.requests.clone(),
            CollectionKind::Claims => self.claims.clone(),
            CollectionKind::Bookings => self.bookings.clone(),
        }
    }

    /// Refresh one collection now
    pub async fn refresh(&self, kind: CollectionKind) -> Result<RefreshOutcome> {
        if let Some(capability) = Capability::for_collection(kind) {
            if !self.capabilities.supports(capability) {
                return Err(Error::UnsupportedOperation(capability));
            }
        }
        self.reconciler(kind).refresh(RefreshTrigger::Manual).await
    }

    /// Report visibility changes from the presentation layer
    pub fn set_visibility(&self, visibility: Visibility) {
        self.visibility.send_if_modified(|current| {
            let changed = *current != visibility;
            *current = visibility;
            changed
        });
    }

    /// Start mount, interval and visibility refreshes for every tracked
    /// collection. Dropping or stopping the handle ends them.
    pub fn start(&self) -> SchedulerHandle {
        let mut schedule = Vec::new();

        for kind in CollectionKind::ALL {
            if !self.is_tracked(kind) {
                warn!(%kind, "Ledger does not serve {}, not scheduling", kind.label());
                if let Some(capability) = Capability::for_collection(kind) {
                    self.sink.publish_one(Notification::new(
                        Severity::Warning,
                        format!("unsupported:{}", capability),
                        format!("Feature not available: {} cannot be loaded", kind.label()),
                    ));
                }
                continue;
            }

            schedule.push(ScheduledRefresh {
                target: self.reconciler(kind),
                period: self.config.refresh.interval(kind),
            });
        }

        scheduler::spawn(schedule, self.visibility.subscribe())
    }

    // ── Workflows ───────────────────────────────────────────────

    /// Emergency/batch access elevation for the signed-in ambulance service
    pub fn access_elevation(&self) -> AccessElevation {
        AccessElevation::new(
            self.orchestrator.clone(),
            self.signer.clone(),
            self.guard.clone(),
            self.config.record_order,
        )
    }

    /// Claim submission for the signed-in patient
    pub fn claim_submission(&self, blobs: Arc<dyn BlobStore>) -> ClaimSubmission {
        ClaimSubmission::new(
            self.orchestrator.clone(),
            blobs,
            self.signer.clone(),
            self.guard.clone(),
            self.claims.clone(),
            self.config.native_decimals,
        )
    }

    /// Permission decisions for the signed-in owner
    pub fn permission_actions(&self) -> PermissionActions {
        PermissionActions::new(
            self.orchestrator.clone(),
            self.signer.clone(),
            self.guard.clone(),
            self.requests.clone(),
        )
    }
}
