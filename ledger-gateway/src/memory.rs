//! In-process Ledger
//!
//! Mirrors the contract rules the workflows rely on (request state machine,
//! emergency access grants, duplicate-record guard, claim filing) and stores
//! tuples as raw JSON so callers can also seed malformed data. Writes take
//! effect at confirmation, not at submission.
//!
//! Fault injection covers the failure modes the engine must survive: an
//! unreachable provider, a business rejection, and a confirmed access grant
//! that does not actually take effect.

use crate::{
    action::{PendingHandle, Receipt, WriteAction},
    gateway::{Capabilities, Capability, LedgerGateway},
    signer::SignedWrite,
    GatewayError, Result,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use record_core::{
    Address, Booking, Claim, ClaimStatus, CollectionKind, HealthRecord, PermissionRequest,
    RequestStatus,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct LedgerState {
    records: HashMap<Address, Vec<Value>>,
    requests: HashMap<Address, Vec<Value>>,
    claims: HashMap<Address, Vec<Value>>,
    bookings: HashMap<Address, Vec<Value>>,
    access: HashSet<(Address, Address)>,
    ambulance_services: HashSet<Address>,
    pending: HashMap<String, SignedWrite>,
    next_tx: u64,
    next_claim_id: u64,
    block_number: u64,
}

impl LedgerState {
    fn collection_mut(&mut self, kind: CollectionKind) -> &mut HashMap<Address, Vec<Value>> {
        match kind {
            CollectionKind::Records => &mut self.records,
            CollectionKind::PermissionRequests => &mut self.requests,
            CollectionKind::Claims => &mut self.claims,
            CollectionKind::Bookings => &mut self.bookings,
        }
    }

    fn find_request_mut(&mut self, owner: &Address, request_id: u64) -> Option<&mut Value> {
        self.requests
            .get_mut(owner)?
            .iter_mut()
            .find(|tuple| tuple.get("requestId").and_then(Value::as_u64) == Some(request_id))
    }

    fn find_claim_mut(&mut self, claim_id: u64) -> Option<&mut Value> {
        self.claims
            .values_mut()
            .flat_map(|claims| claims.iter_mut())
            .find(|tuple| tuple.get("claimId").and_then(Value::as_u64) == Some(claim_id))
    }
}

#[derive(Debug, Default)]
struct Faults {
    unreachable: bool,
    reject_next: Option<String>,
    suppress_access_grants: bool,
    read_delay: Option<Duration>,
}

#[derive(Debug, Default, Clone, Copy)]
struct ReadStats {
    calls: usize,
    in_flight: usize,
    max_in_flight: usize,
}

/// In-process Ledger gateway
#[derive(Debug)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
    faults: Mutex<Faults>,
    capabilities: RwLock<Capabilities>,
    reads: Mutex<HashMap<CollectionKind, ReadStats>>,
    writes: Mutex<usize>,
    capability_queries: Mutex<usize>,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    /// Create an empty ledger offering every optional operation
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState {
                next_claim_id: 1,
                ..Default::default()
            }),
            faults: Mutex::new(Faults::default()),
            capabilities: RwLock::new(Capabilities::all()),
            reads: Mutex::new(HashMap::new()),
            writes: Mutex::new(0),
            capability_queries: Mutex::new(0),
        }
    }

    /// Replace the declared capabilities
    pub fn with_capabilities(self, capabilities: Capabilities) -> Self {
        *self.capabilities.write() = capabilities;
        self
    }

    // ── Seeding ─────────────────────────────────────────────────

    /// Append a raw tuple to `owner`'s collection (may be malformed)
    pub fn push_raw(&self, kind: CollectionKind, owner: &Address, tuple: Value) {
        self.state
            .lock()
            .collection_mut(kind)
            .entry(owner.clone())
            .or_default()
            .push(tuple);
    }

    /// Seed a health record
    pub fn insert_record(&self, record: &HealthRecord) {
        self.push_raw(CollectionKind::Records, &record.owner, to_tuple(record));
    }

    /// Seed a permission request addressed to `owner`
    pub fn insert_request(&self, owner: &Address, request: &PermissionRequest) {
        self.push_raw(CollectionKind::PermissionRequests, owner, to_tuple(request));
    }

    /// Seed a claim
    pub fn insert_claim(&self, claim: &Claim) {
        let mut state = self.state.lock();
        state.next_claim_id = state.next_claim_id.max(claim.claim_id + 1);
        state
            .claims
            .entry(claim.patient.clone())
            .or_default()
            .push(to_tuple(claim));
    }

    /// Seed a booking
    pub fn insert_booking(&self, patient: &Address, booking: &Booking) {
        self.push_raw(CollectionKind::Bookings, patient, to_tuple(booking));
    }

    /// Move a request as the requester side of the contract would
    pub fn set_request_status(&self, owner: &Address, request_id: u64, status: RequestStatus) -> bool {
        let mut state = self.state.lock();
        match state.find_request_mut(owner, request_id) {
            Some(tuple) => {
                tuple["status"] = json!(status_code(status));
                true
            }
            None => false,
        }
    }

    /// Move a claim as the insurer would
    pub fn set_claim_status(&self, claim_id: u64, status: ClaimStatus, reason: Option<&str>) -> bool {
        let mut state = self.state.lock();
        match state.find_claim_mut(claim_id) {
            Some(tuple) => {
                tuple["status"] = json!(claim_status_code(status));
                tuple["rejectionReason"] = json!(reason.unwrap_or(""));
                true
            }
            None => false,
        }
    }

    /// Restrict emergency access to registered ambulance services
    pub fn register_ambulance_service(&self, service: &Address) {
        self.state.lock().ambulance_services.insert(service.clone());
    }

    // ── Fault injection ─────────────────────────────────────────

    /// Fail every call as unreachable
    pub fn set_unreachable(&self, unreachable: bool) {
        self.faults.lock().unreachable = unreachable;
    }

    /// Reject the next confirmed write with `reason`
    pub fn reject_next_write(&self, reason: impl Into<String>) {
        self.faults.lock().reject_next = Some(reason.into());
    }

    /// Confirm access grants without recording them
    pub fn suppress_access_grants(&self, suppress: bool) {
        self.faults.lock().suppress_access_grants = suppress;
    }

    /// Delay every collection read
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.faults.lock().read_delay = delay;
    }

    // ── Instrumentation ─────────────────────────────────────────

    /// Number of reads issued for a collection
    pub fn read_calls(&self, kind: CollectionKind) -> usize {
        self.reads.lock().get(&kind).map(|s| s.calls).unwrap_or(0)
    }

    /// Highest number of simultaneous reads seen for a collection
    pub fn max_concurrent_reads(&self, kind: CollectionKind) -> usize {
        self.reads.lock().get(&kind).map(|s| s.max_in_flight).unwrap_or(0)
    }

    /// Number of writes submitted
    pub fn write_calls(&self) -> usize {
        *self.writes.lock()
    }

    /// Number of times the capability set was requested
    pub fn capability_queries(&self) -> usize {
        *self.capability_queries.lock()
    }

    /// Whether `caller` holds access to `target`
    pub fn has_access(&self, caller: &Address, target: &Address) -> bool {
        self.state.lock().access.contains(&(caller.clone(), target.clone()))
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.faults.lock().unreachable {
            return Err(GatewayError::Unreachable("provider not responding".to_string()));
        }
        Ok(())
    }

    fn begin_read(&self, kind: CollectionKind) -> ReadGuard<'_> {
        let mut reads = self.reads.lock();
        let stats = reads.entry(kind).or_default();
        stats.calls += 1;
        stats.in_flight += 1;
        stats.max_in_flight = stats.max_in_flight.max(stats.in_flight);
        ReadGuard { ledger: self, kind }
    }

    /// Apply a confirmed write to the contract state
    fn apply(&self, signed: &SignedWrite) -> std::result::Result<(), String> {
        let suppress_grants = self.faults.lock().suppress_access_grants;
        let mut state = self.state.lock();
        let signer = &signed.signer;
        let now = Utc::now().timestamp().max(0) as u64;

        match &signed.action {
            WriteAction::ApprovePermission { request_id }
            | WriteAction::DeclinePermission { request_id }
            | WriteAction::ApproveBatchAccess { request_id } => {
                let tuple = state
                    .find_request_mut(signer, *request_id)
                    .ok_or_else(|| "Request not found".to_string())?;

                if request_status(tuple) != Some(RequestStatus::Pending) {
                    return Err("Request is not pending".to_string());
                }

                let requester = tuple
                    .get("requester")
                    .and_then(Value::as_str)
                    .map(Address::new);

                let approve = match &signed.action {
                    WriteAction::DeclinePermission { .. } => false,
                    WriteAction::ApproveBatchAccess { .. } => {
                        let cid = tuple.get("ipfsCid").and_then(Value::as_str).unwrap_or("");
                        if !cid.is_empty() {
                            return Err("Not a batch access request".to_string());
                        }
                        true
                    }
                    _ => true,
                };

                let next = if approve {
                    RequestStatus::Approved
                } else {
                    RequestStatus::Rejected
                };
                tuple["status"] = json!(status_code(next));

                if approve && !suppress_grants {
                    if let Some(requester) = requester {
                        state.access.insert((requester, signer.clone()));
                    }
                }
            }

            WriteAction::GrantEmergencyAccess { patient } => {
                if !patient.is_well_formed() {
                    return Err("Invalid patient address".to_string());
                }
                if !state.ambulance_services.is_empty() && !state.ambulance_services.contains(signer) {
                    return Err("Only ambulance services can request emergency access".to_string());
                }
                if !suppress_grants {
                    state.access.insert((signer.clone(), patient.clone()));
                }
            }

            WriteAction::AddRecord {
                patient,
                ipfs_cid,
                data_type,
                encrypted_symmetric_key,
            } => {
                if !patient.is_well_formed() {
                    return Err("Invalid patient address".to_string());
                }
                let code = data_type
                    .code()
                    .ok_or_else(|| "Invalid data type".to_string())?;
                let records = state.records.entry(patient.clone()).or_default();
                let exists = records
                    .iter()
                    .any(|tuple| tuple.get("ipfsCid").and_then(Value::as_str) == Some(ipfs_cid.as_str()));
                if exists {
                    return Err("Record already exists".to_string());
                }
                records.push(json!({
                    "owner": patient,
                    "ipfsCid": ipfs_cid,
                    "dataType": code,
                    "provider": signer,
                    "timestamp": now,
                    "isValid": true,
                    "encryptedSymmetricKey": encrypted_symmetric_key,
                }));
            }

            WriteAction::SubmitInsuranceClaim {
                insurer,
                ipfs_hash,
                claim_amount,
                diagnosis,
                hospital_name,
            } => {
                if !insurer.is_well_formed() {
                    return Err("Invalid insurance provider address".to_string());
                }
                if claim_amount.is_zero() {
                    return Err("Claim amount must be greater than zero".to_string());
                }
                let claim_id = state.next_claim_id;
                state.next_claim_id += 1;
                state.claims.entry(signer.clone()).or_default().push(json!({
                    "claimId": claim_id,
                    "patient": signer,
                    "ipfsHash": ipfs_hash,
                    "claimAmount": claim_amount.value().to_string(),
                    "diagnosis": diagnosis,
                    "hospitalName": hospital_name,
                    "timestamp": now,
                    "status": 0,
                    "rejectionReason": "",
                    "insuranceProvider": insurer,
                }));
            }
        }

        Ok(())
    }
}

struct ReadGuard<'a> {
    ledger: &'a InMemoryLedger,
    kind: CollectionKind,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        if let Some(stats) = self.ledger.reads.lock().get_mut(&self.kind) {
            stats.in_flight = stats.in_flight.saturating_sub(1);
        }
    }
}

fn to_tuple<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Seeded tuples carry status names, confirmed writes carry codes
fn request_status(tuple: &Value) -> Option<RequestStatus> {
    match tuple.get("status")? {
        Value::String(name) => RequestStatus::from_name(name),
        value => value.as_u64().and_then(RequestStatus::from_code),
    }
}

fn status_code(status: RequestStatus) -> u64 {
    match status {
        RequestStatus::Pending => 0,
        RequestStatus::Approved => 1,
        RequestStatus::Rejected => 2,
        RequestStatus::Completed => 3,
    }
}

fn claim_status_code(status: ClaimStatus) -> u64 {
    match status {
        ClaimStatus::Pending => 0,
        ClaimStatus::Approved => 1,
        ClaimStatus::Rejected => 2,
    }
}

#[async_trait]
impl LedgerGateway for InMemoryLedger {
    fn name(&self) -> &str {
        "in-memory"
    }

    fn capabilities(&self) -> Capabilities {
        *self.capability_queries.lock() += 1;
        self.capabilities.read().clone()
    }

    async fn read_collection(&self, kind: CollectionKind, owner: &Address) -> Result<Value> {
        self.ensure_reachable()?;
        if let Some(capability) = Capability::for_collection(kind) {
            self.capabilities.read().require(capability)?;
        }

        let _guard = self.begin_read(kind);
        let delay = self.faults.lock().read_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.ensure_reachable()?;

        let mut state = self.state.lock();
        let tuples = state
            .collection_mut(kind)
            .get(owner)
            .cloned()
            .unwrap_or_default();
        debug!(%kind, %owner, count = tuples.len(), "served collection read");
        Ok(Value::Array(tuples))
    }

    async fn submit_write(&self, signed: SignedWrite) -> Result<PendingHandle> {
        self.ensure_reachable()?;
        if let Some(capability) = signed.action.required_capability() {
            self.capabilities.read().require(capability)?;
        }

        *self.writes.lock() += 1;
        let kind = signed.action.kind();

        let mut state = self.state.lock();
        state.next_tx += 1;
        let tx_hash = format!("0x{:064x}", state.next_tx);
        state.pending.insert(tx_hash.clone(), signed);

        debug!(%kind, tx_hash = %tx_hash, "accepted write");
        Ok(PendingHandle {
            tx_hash,
            kind,
            submitted_at: Utc::now(),
        })
    }

    async fn await_confirmation(&self, handle: &PendingHandle) -> Result<Receipt> {
        self.ensure_reachable()?;

        let signed = self
            .state
            .lock()
            .pending
            .remove(&handle.tx_hash)
            .ok_or_else(|| GatewayError::Rejected {
                reason: format!("Unknown transaction {}", handle.tx_hash),
            })?;

        if let Some(reason) = self.faults.lock().reject_next.take() {
            return Err(GatewayError::Rejected { reason });
        }

        self.apply(&signed)
            .map_err(|reason| GatewayError::Rejected { reason })?;

        let mut state = self.state.lock();
        state.block_number += 1;
        info!(kind = %handle.kind, block = state.block_number, "confirmed write");
        Ok(Receipt {
            tx_hash: handle.tx_hash.clone(),
            block_number: state.block_number,
        })
    }

    async fn check_access(&self, caller: &Address, target: &Address) -> Result<bool> {
        self.ensure_reachable()?;
        Ok(self.has_access(caller, target))
    }
}
