//! Access elevation (grant-then-verify)
//!
//! ```text
//!  Idle ─► Submitting ─► Confirming ─► Verifying ─┬─► Granted
//!                                                 └─► Failed(kind)
//! ```
//!
//! A confirmed grant is not proof the Ledger's access rules let it take
//! effect, so `Verifying` re-reads the access check and only a positive
//! answer reaches `Granted`. In emergency mode the patient's records are
//! read during verification and become the active emergency set; batch mode
//! only verifies.

use super::{report, InFlightGuard, InFlightToken};
use crate::error::batch_rejection_guidance;
use crate::orchestrator::{LedgerTransaction, TransactionOrchestrator, TxPhase};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_gateway::{ActionKind, Capability, LedgerGateway, Receipt, Signer, WriteAction};
use parking_lot::RwLock;
use record_core::{normalize_records, Address, CollectionKind, DataType, HealthRecord, RecordOrder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// What the elevation is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElevationMode {
    /// Treat the patient now; load their records
    Emergency,
    /// Bulk processing; verify only
    Batch,
}

impl ElevationMode {
    fn label(&self) -> &'static str {
        match self {
            ElevationMode::Emergency => "emergency access",
            ElevationMode::Batch => "batch access",
        }
    }
}

/// Why an elevation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Bad input, nothing submitted
    Validation,
    /// Ledger refused the grant
    Rejected,
    /// Ledger unreachable
    Unreachable,
    /// Signer declined
    UserCancelled,
    /// Grant confirmed but access does not hold
    VerificationMismatch,
    /// Deployment lacks emergency access
    Unsupported,
    /// Same patient already being elevated
    AlreadyInFlight,
}

impl From<&Error> for FailureKind {
    fn from(err: &Error) -> Self {
        match err {
            Error::Validation { .. } => FailureKind::Validation,
            Error::LedgerRejected { .. } => FailureKind::Rejected,
            Error::UserCancelled => FailureKind::UserCancelled,
            Error::VerificationMismatch(_) => FailureKind::VerificationMismatch,
            Error::UnsupportedOperation(_) => FailureKind::Unsupported,
            Error::AlreadyInFlight { .. } => FailureKind::AlreadyInFlight,
            _ => FailureKind::Unreachable,
        }
    }
}

/// Elevation state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ElevationState {
    /// Nothing running
    #[default]
    Idle,
    /// Authorizing and submitting the grant
    Submitting,
    /// Waiting for the grant to be included
    Confirming,
    /// Re-reading the access check
    Verifying,
    /// Access verified
    Granted,
    /// Elevation ended without access
    Failed(FailureKind),
}

/// Successful elevation
#[derive(Debug, Clone)]
pub struct ElevationGrant {
    /// Patient
    pub patient: Address,
    /// Mode
    pub mode: ElevationMode,
    /// Grant receipt
    pub receipt: Receipt,
    /// Records loaded into the active set (0 in batch mode)
    pub records: usize,
}

/// An emergency service recorded on the patient's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedService {
    /// Patient
    pub patient: Address,
    /// Record the service was provided against
    pub source_cid: String,
    /// Content id of the written service record
    pub service_cid: String,
    /// Service provider
    pub ambulance_provider: Address,
    /// Completion time
    pub completed_at: DateTime<Utc>,
    /// Write transaction
    pub tx_hash: String,
}

/// Emergency/batch access elevation for one ambulance service
pub struct AccessElevation {
    orchestrator: Arc<TransactionOrchestrator>,
    signer: Arc<dyn Signer>,
    guard: InFlightGuard,
    order: RecordOrder,
    state: watch::Sender<ElevationState>,
    active: RwLock<Vec<HealthRecord>>,
    completed: RwLock<Vec<CompletedService>>,
}

impl fmt::Debug for AccessElevation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessElevation")
            .field("caller", self.signer.address())
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl AccessElevation {
    /// Create workflow
    pub fn new(
        orchestrator: Arc<TransactionOrchestrator>,
        signer: Arc<dyn Signer>,
        guard: InFlightGuard,
        order: RecordOrder,
    ) -> Self {
        let (state, _) = watch::channel(ElevationState::Idle);
        Self {
            orchestrator,
            signer,
            guard,
            order,
            state,
            active: RwLock::new(Vec::new()),
            completed: RwLock::new(Vec::new()),
        }
    }

    /// Current state
    pub fn state(&self) -> ElevationState {
        *self.state.borrow()
    }

    /// Follow state changes
    pub fn watch_state(&self) -> watch::Receiver<ElevationState> {
        self.state.subscribe()
    }

    /// Back to `Idle`; the active set is kept
    pub fn reset(&self) {
        self.state.send_replace(ElevationState::Idle);
    }

    /// Active emergency record set
    pub fn active_records(&self) -> Vec<HealthRecord> {
        self.active.read().clone()
    }

    /// Services completed in this session
    pub fn completed_services(&self) -> Vec<CompletedService> {
        self.completed.read().clone()
    }

    /// Grant the caller access to `patient`, then verify it took effect
    pub async fn elevate(&self, patient: &Address, mode: ElevationMode) -> Result<ElevationGrant> {
        let context = format!("Failed to get {}", mode.label());
        let key = format!("elevation:{}", patient);

        let token = match self.precheck(patient) {
            Ok(token) => token,
            Err(err) => {
                self.state.send_replace(ElevationState::Failed(FailureKind::from(&err)));
                report(self.orchestrator.sink(), &key, &context, &err);
                return Err(err);
            }
        };

        let tx = GrantAccess {
            caller: self.signer.address(),
            patient,
            mode,
            order: self.order,
            active: &self.active,
        };

        let result = self
            .orchestrator
            .execute_observed(&tx, self.signer.as_ref(), |phase| {
                let state = match phase {
                    TxPhase::Submitting => ElevationState::Submitting,
                    TxPhase::Confirming => ElevationState::Confirming,
                    TxPhase::Verifying | TxPhase::Applying => ElevationState::Verifying,
                };
                self.state.send_replace(state);
            })
            .await;
        drop(token);

        match result {
            Ok(outcome) => {
                self.state.send_replace(ElevationState::Granted);
                info!(%patient, mode = mode.label(), records = outcome.output.len(), "access elevation granted");
                Ok(ElevationGrant {
                    patient: patient.clone(),
                    mode,
                    receipt: outcome.receipt,
                    records: outcome.output.len(),
                })
            }
            Err(err) => {
                self.state.send_replace(ElevationState::Failed(FailureKind::from(&err)));
                Err(err)
            }
        }
    }

    fn precheck(&self, patient: &Address) -> Result<InFlightToken> {
        if patient.is_empty() {
            return Err(Error::validation("patient", "Please enter the patient's address"));
        }
        self.orchestrator.require(Capability::EmergencyAccess)?;
        self.guard
            .acquire(ActionKind::GrantEmergencyAccess, patient.as_str())
    }

    /// Record an emergency service against an active record.
    ///
    /// Writes a new emergency record to the patient's history, verifies it is
    /// listed, then moves the source record from the active set to the
    /// completed services.
    pub async fn complete_service(&self, record: &HealthRecord) -> Result<CompletedService> {
        let context = "Failed to complete emergency service";
        let key = format!("service:{}", record.ipfs_cid);

        let token = match self
            .guard
            .acquire(ActionKind::AddRecord, format!("{}/{}", record.owner, record.ipfs_cid))
        {
            Ok(token) => token,
            Err(err) => {
                report(self.orchestrator.sink(), &key, context, &err);
                return Err(err);
            }
        };

        let caller = self.signer.address();
        let service_cid = format!(
            "emergency_service_{}_{}_{}",
            Utc::now().timestamp_millis(),
            record.owner.tail(8),
            caller.tail(8)
        );

        let tx = CompleteService {
            caller,
            record,
            service_cid,
            order: self.order,
            active: &self.active,
            completed: &self.completed,
        };

        let result = self.orchestrator.execute(&tx, self.signer.as_ref()).await;
        drop(token);
        Ok(result?.output)
    }
}

struct GrantAccess<'a> {
    caller: &'a Address,
    patient: &'a Address,
    mode: ElevationMode,
    order: RecordOrder,
    active: &'a RwLock<Vec<HealthRecord>>,
}

#[async_trait]
impl LedgerTransaction for GrantAccess<'_> {
    type Output = Vec<HealthRecord>;

    fn action(&self) -> WriteAction {
        WriteAction::GrantEmergencyAccess {
            patient: self.patient.clone(),
        }
    }

    fn failure_context(&self) -> String {
        format!("Failed to get {}", self.mode.label())
    }

    fn failure_message(&self, err: &Error) -> String {
        match self.mode {
            ElevationMode::Emergency => err.user_message(&self.failure_context()),
            ElevationMode::Batch => {
                err.user_message_with(&self.failure_context(), batch_rejection_guidance)
            }
        }
    }

    fn success_message(&self, _receipt: &Receipt, records: &Vec<HealthRecord>) -> String {
        match self.mode {
            ElevationMode::Emergency => format!(
                "Emergency access granted successfully ({} records loaded)",
                records.len()
            ),
            ElevationMode::Batch => "Batch access granted successfully".to_string(),
        }
    }

    async fn verify(&self, gateway: &dyn LedgerGateway, _receipt: &Receipt) -> Result<Vec<HealthRecord>> {
        if !gateway.check_access(self.caller, self.patient).await? {
            return Err(Error::VerificationMismatch(format!(
                "{} verification failed for {}",
                self.mode.label(),
                self.patient
            )));
        }

        match self.mode {
            ElevationMode::Emergency => {
                let raw = gateway.read_collection(CollectionKind::Records, self.patient).await?;
                Ok(normalize_records(&raw, self.patient, self.order))
            }
            ElevationMode::Batch => Ok(Vec::new()),
        }
    }

    async fn apply(&self, records: &Vec<HealthRecord>) {
        if self.mode == ElevationMode::Emergency {
            *self.active.write() = records.clone();
        }
    }
}

struct CompleteService<'a> {
    caller: &'a Address,
    record: &'a HealthRecord,
    service_cid: String,
    order: RecordOrder,
    active: &'a RwLock<Vec<HealthRecord>>,
    completed: &'a RwLock<Vec<CompletedService>>,
}

#[async_trait]
impl LedgerTransaction for CompleteService<'_> {
    type Output = CompletedService;

    fn action(&self) -> WriteAction {
        WriteAction::AddRecord {
            patient: self.record.owner.clone(),
            ipfs_cid: self.service_cid.clone(),
            data_type: DataType::EmergencyRecord,
            encrypted_symmetric_key: self.record.encrypted_symmetric_key.clone(),
        }
    }

    fn failure_context(&self) -> String {
        "Failed to complete emergency service".to_string()
    }

    fn success_message(&self, _receipt: &Receipt, service: &CompletedService) -> String {
        let patient = service.patient.as_str();
        format!(
            "Emergency service completed successfully. Record added to patient {}...{} history",
            patient.get(..6).unwrap_or(patient),
            service.patient.tail(4)
        )
    }

    async fn verify(&self, gateway: &dyn LedgerGateway, receipt: &Receipt) -> Result<CompletedService> {
        let patient = &self.record.owner;
        let raw = gateway.read_collection(CollectionKind::Records, patient).await?;
        let listed = normalize_records(&raw, patient, self.order)
            .iter()
            .any(|r| r.ipfs_cid == self.service_cid);

        if !listed {
            return Err(Error::VerificationMismatch(format!(
                "service record {} not listed for {}",
                self.service_cid, patient
            )));
        }

        Ok(CompletedService {
            patient: patient.clone(),
            source_cid: self.record.ipfs_cid.clone(),
            service_cid: self.service_cid.clone(),
            ambulance_provider: self.caller.clone(),
            completed_at: Utc::now(),
            tx_hash: receipt.tx_hash.clone(),
        })
    }

    async fn apply(&self, service: &CompletedService) {
        self.active
            .write()
            .retain(|r| !(r.owner == service.patient && r.ipfs_cid == service.source_cid));
        self.completed.write().push(service.clone());
    }
}
