//! Write workflows end to end against the in-process Ledger

use bytes::Bytes;
use ledger_gateway::{ActionKind, Capabilities, Capability, InMemoryLedger, LocalSigner, MemoryBlobStore};
use proptest::prelude::*;
use record_core::{
    Address, CollectionKind, DataType, HealthRecord, NativeAmount, PermissionRequest,
    PermissionType, RequestStatus,
};
use std::sync::Arc;
use std::time::Duration;
use sync_engine::{
    ClaimDocument, ClaimForm, Config, ElevationMode, ElevationState, Error, FailureKind,
    Notification, Severity, SyncEngine,
};
use tokio::sync::broadcast;

const PATIENT: &str = "0x1111111111111111111111111111111111111111";
const DOCTOR: &str = "0x2222222222222222222222222222222222222222";
const AMBULANCE: &str = "0x3333333333333333333333333333333333333333";
const INSURER: &str = "0x4444444444444444444444444444444444444444";

fn engine_for(ledger: &Arc<InMemoryLedger>, identity: &str) -> SyncEngine {
    SyncEngine::new(Config::default(), ledger.clone(), Arc::new(LocalSigner::new(identity)))
}

fn drain(events: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn record(cid: &str, data_type: DataType) -> HealthRecord {
    HealthRecord {
        owner: Address::new(PATIENT),
        ipfs_cid: cid.to_string(),
        data_type,
        provider: Address::new(DOCTOR),
        timestamp: 1_700_000_000,
        is_valid: true,
        encrypted_symmetric_key: "key".to_string(),
    }
}

fn request(id: u64, cid: &str, permission_type: PermissionType) -> PermissionRequest {
    PermissionRequest {
        request_id: id,
        requester: Address::new(DOCTOR),
        ipfs_cid: cid.to_string(),
        permission_type,
        status: RequestStatus::Pending,
        request_date: 1_700_000_000,
        expiry_date: 1_700_086_400,
        incentive_amount: NativeAmount::ZERO,
        is_incentive_based: false,
    }
}

fn claim_form() -> ClaimForm {
    ClaimForm {
        claim_amount: "1.5".to_string(),
        diagnosis: "Fracture".to_string(),
        hospital_name: "City General".to_string(),
        insurance_provider: INSURER.to_string(),
        document: Some(ClaimDocument {
            file_name: "report.pdf".to_string(),
            content: Bytes::from_static(b"%PDF-1.7 report"),
        }),
    }
}

// ── Access elevation ────────────────────────────────────────────

#[tokio::test]
async fn test_emergency_elevation_loads_records() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.register_ambulance_service(&Address::new(AMBULANCE));
    ledger.insert_record(&record("QmLab", DataType::LabResult));
    ledger.insert_record(&record("QmScan", DataType::Imaging));

    let engine = engine_for(&ledger, AMBULANCE);
    let elevation = engine.access_elevation();
    let mut states = elevation.watch_state();

    let grant = elevation
        .elevate(&Address::new(PATIENT), ElevationMode::Emergency)
        .await
        .unwrap();

    assert_eq!(grant.records, 2);
    assert_eq!(elevation.state(), ElevationState::Granted);
    assert_eq!(*states.borrow_and_update(), ElevationState::Granted);
    assert_eq!(elevation.active_records().len(), 2);
    assert!(ledger.has_access(&Address::new(AMBULANCE), &Address::new(PATIENT)));
}

#[tokio::test]
async fn test_grant_without_access_fails_verification() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.insert_record(&record("QmLab", DataType::LabResult));
    ledger.suppress_access_grants(true);

    let engine = engine_for(&ledger, AMBULANCE);
    let mut events = engine.subscribe();
    let elevation = engine.access_elevation();

    let result = elevation
        .elevate(&Address::new(PATIENT), ElevationMode::Emergency)
        .await;

    assert!(matches!(result, Err(Error::VerificationMismatch(_))));
    assert_eq!(
        elevation.state(),
        ElevationState::Failed(FailureKind::VerificationMismatch)
    );
    assert!(elevation.active_records().is_empty());
    assert_eq!(ledger.write_calls(), 1);

    let events = drain(&mut events);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity, Severity::Error);
    assert!(events[0].message.starts_with("Failed to get emergency access"));
}

#[tokio::test]
async fn test_batch_elevation_loads_nothing() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.insert_record(&record("QmLab", DataType::LabResult));

    let engine = engine_for(&ledger, AMBULANCE);
    let elevation = engine.access_elevation();
    let grant = elevation
        .elevate(&Address::new(PATIENT), ElevationMode::Batch)
        .await
        .unwrap();

    assert_eq!(grant.records, 0);
    assert!(elevation.active_records().is_empty());
    assert_eq!(ledger.read_calls(CollectionKind::Records), 0);
}

#[tokio::test]
async fn test_unregistered_service_gets_guidance() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.register_ambulance_service(&Address::new(AMBULANCE));

    let engine = engine_for(&ledger, DOCTOR);
    let mut events = engine.subscribe();
    let elevation = engine.access_elevation();

    let result = elevation
        .elevate(&Address::new(PATIENT), ElevationMode::Emergency)
        .await;
    assert!(matches!(result, Err(Error::LedgerRejected { .. })));
    assert_eq!(elevation.state(), ElevationState::Failed(FailureKind::Rejected));

    let events = drain(&mut events);
    assert_eq!(
        events[0].message,
        "Only authorized ambulance services can request emergency access"
    );
}

#[tokio::test]
async fn test_unregistered_service_gets_batch_guidance() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.register_ambulance_service(&Address::new(AMBULANCE));

    let engine = engine_for(&ledger, DOCTOR);
    let mut events = engine.subscribe();
    let elevation = engine.access_elevation();

    let result = elevation.elevate(&Address::new(PATIENT), ElevationMode::Batch).await;
    assert!(matches!(result, Err(Error::LedgerRejected { .. })));

    let events = drain(&mut events);
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].message,
        "Only authorized ambulance services can request batch access"
    );
}

#[tokio::test]
async fn test_capabilities_are_negotiated_once() {
    let ledger = Arc::new(InMemoryLedger::new());
    let engine = engine_for(&ledger, AMBULANCE);
    assert_eq!(ledger.capability_queries(), 1);

    let elevation = engine.access_elevation();
    elevation
        .elevate(&Address::new(PATIENT), ElevationMode::Batch)
        .await
        .unwrap();
    engine
        .claim_submission(Arc::new(MemoryBlobStore::new()))
        .submit(&mut claim_form())
        .await
        .unwrap();

    assert_eq!(ledger.capability_queries(), 1);
}

#[tokio::test]
async fn test_empty_patient_is_rejected_locally() {
    let ledger = Arc::new(InMemoryLedger::new());
    let engine = engine_for(&ledger, AMBULANCE);
    let elevation = engine.access_elevation();

    let result = elevation.elevate(&Address::new(""), ElevationMode::Emergency).await;
    assert!(matches!(result, Err(Error::Validation { field: "patient", .. })));
    assert_eq!(elevation.state(), ElevationState::Failed(FailureKind::Validation));
    assert_eq!(ledger.write_calls(), 0);
}

#[tokio::test]
async fn test_declined_signature_is_a_warning() {
    let ledger = Arc::new(InMemoryLedger::new());
    let signer = Arc::new(LocalSigner::new(AMBULANCE));
    signer.set_declining(true);
    let engine = SyncEngine::new(Config::default(), ledger.clone(), signer);
    let mut events = engine.subscribe();
    let elevation = engine.access_elevation();

    let result = elevation
        .elevate(&Address::new(PATIENT), ElevationMode::Batch)
        .await;
    assert!(matches!(result, Err(Error::UserCancelled)));
    assert_eq!(elevation.state(), ElevationState::Failed(FailureKind::UserCancelled));
    assert_eq!(ledger.write_calls(), 0);

    let events = drain(&mut events);
    assert_eq!(events[0].severity, Severity::Warning);

    elevation.reset();
    assert_eq!(elevation.state(), ElevationState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_elevation_of_one_patient() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.set_read_delay(Some(Duration::from_millis(50)));
    let engine = engine_for(&ledger, AMBULANCE);
    let elevation = engine.access_elevation();
    let patient = Address::new(PATIENT);

    let (first, second) = tokio::join!(
        elevation.elevate(&patient, ElevationMode::Emergency),
        elevation.elevate(&patient, ElevationMode::Emergency),
    );

    assert!(first.is_ok());
    assert!(matches!(
        second,
        Err(Error::AlreadyInFlight { kind: ActionKind::GrantEmergencyAccess, .. })
    ));
    assert_eq!(ledger.write_calls(), 1);
}

#[tokio::test]
async fn test_complete_service_moves_record() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.insert_record(&record("QmLab", DataType::LabResult));
    ledger.insert_record(&record("QmScan", DataType::Imaging));

    let engine = engine_for(&ledger, AMBULANCE);
    let elevation = engine.access_elevation();
    elevation
        .elevate(&Address::new(PATIENT), ElevationMode::Emergency)
        .await
        .unwrap();

    let target = elevation.active_records()[0].clone();
    let service = elevation.complete_service(&target).await.unwrap();

    assert_eq!(service.source_cid, target.ipfs_cid);
    assert!(service.service_cid.starts_with("emergency_service_"));
    assert!(service.service_cid.ends_with("_11111111_33333333"));
    assert_eq!(service.ambulance_provider, Address::new(AMBULANCE));

    let active = elevation.active_records();
    assert_eq!(active.len(), 1);
    assert!(active.iter().all(|r| r.ipfs_cid != target.ipfs_cid));
    assert_eq!(elevation.completed_services(), vec![service.clone()]);

    // The patient's own engine sees the ambulance record arrive
    let patient = engine_for(&ledger, PATIENT);
    patient.refresh(CollectionKind::Records).await.unwrap();
    let emergency = patient.emergency_records();
    assert_eq!(emergency.len(), 1);
    assert_eq!(emergency[0].ipfs_cid, service.service_cid);
    assert_eq!(emergency[0].provider, Address::new(AMBULANCE));
}

// ── Claim submission ────────────────────────────────────────────

#[tokio::test]
async fn test_claim_without_diagnosis_fails_fast() {
    let ledger = Arc::new(InMemoryLedger::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let engine = engine_for(&ledger, PATIENT);
    let mut events = engine.subscribe();
    let submission = engine.claim_submission(blobs.clone());

    let mut form = claim_form();
    form.diagnosis.clear();
    let result = submission.submit(&mut form).await;

    assert!(matches!(result, Err(Error::Validation { field: "diagnosis", .. })));
    assert!(blobs.is_empty());
    assert_eq!(ledger.write_calls(), 0);
    assert_eq!(form.hospital_name, "City General");

    let events = drain(&mut events);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity, Severity::Warning);
}

#[tokio::test]
async fn test_claim_is_filed_and_reconciled() {
    let ledger = Arc::new(InMemoryLedger::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let engine = engine_for(&ledger, PATIENT);
    let mut events = engine.subscribe();
    let submission = engine.claim_submission(blobs.clone());

    let mut form = claim_form();
    let receipt = submission.submit(&mut form).await.unwrap();

    assert_eq!(form, ClaimForm::default());
    assert_eq!(receipt.claim_amount, NativeAmount::new(1_500_000_000_000_000_000));
    assert_eq!(
        blobs.get(&receipt.document),
        Some(Bytes::from_static(b"%PDF-1.7 report"))
    );

    let claims = engine.claims();
    assert_eq!(claims.len(), 1);
    let filed = &claims.items()[0];
    assert_eq!(filed.claim_id, 1);
    assert_eq!(filed.claim_amount, receipt.claim_amount);
    assert_eq!(filed.ipfs_hash, receipt.document.as_str());
    assert_eq!(filed.insurance_provider, Address::new(INSURER));

    let events = drain(&mut events);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity, Severity::Success);
    assert!(events[0].message.starts_with("Insurance claim submitted successfully"));
}

#[tokio::test]
async fn test_claim_on_ledger_without_claim_reads() {
    let ledger = Arc::new(
        InMemoryLedger::new()
            .with_capabilities(Capabilities::all().without(Capability::PatientClaims)),
    );
    let engine = engine_for(&ledger, PATIENT);
    let mut events = engine.subscribe();
    let submission = engine.claim_submission(Arc::new(MemoryBlobStore::new()));

    submission.submit(&mut claim_form()).await.unwrap();

    assert_eq!(ledger.write_calls(), 1);
    assert_eq!(ledger.read_calls(CollectionKind::Claims), 0);
    let events = drain(&mut events);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity, Severity::Success);
}

#[tokio::test]
async fn test_claim_document_storage_failure() {
    let ledger = Arc::new(InMemoryLedger::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    blobs.set_failure(Some("gateway timeout".to_string()));
    let engine = engine_for(&ledger, PATIENT);
    let submission = engine.claim_submission(blobs.clone());

    let mut form = claim_form();
    let result = submission.submit(&mut form).await;

    assert!(matches!(result, Err(Error::Storage(_))));
    assert_eq!(ledger.write_calls(), 0);
    assert_eq!(form, claim_form());
}

#[tokio::test]
async fn test_claim_needs_capability() {
    let ledger = Arc::new(
        InMemoryLedger::new()
            .with_capabilities(Capabilities::all().without(Capability::SubmitInsuranceClaim)),
    );
    let blobs = Arc::new(MemoryBlobStore::new());
    let engine = engine_for(&ledger, PATIENT);
    let submission = engine.claim_submission(blobs.clone());

    let result = submission.submit(&mut claim_form()).await;
    assert!(matches!(
        result,
        Err(Error::UnsupportedOperation(Capability::SubmitInsuranceClaim))
    ));
    assert!(blobs.is_empty());
}

// ── Permission decisions ────────────────────────────────────────

#[tokio::test]
async fn test_approval_installs_verified_snapshot() {
    let ledger = Arc::new(InMemoryLedger::new());
    let owner = Address::new(PATIENT);
    ledger.insert_request(&owner, &request(7, "QmLab", PermissionType::View));

    let engine = engine_for(&ledger, PATIENT);
    engine.refresh(CollectionKind::PermissionRequests).await.unwrap();
    let mut events = engine.subscribe();

    engine.permission_actions().approve(7).await.unwrap();

    assert_eq!(
        engine.permission_requests().items()[0].status,
        RequestStatus::Approved
    );
    assert!(ledger.has_access(&Address::new(DOCTOR), &owner));

    // The transition was already absorbed; the next cycle stays quiet
    engine.refresh(CollectionKind::PermissionRequests).await.unwrap();
    let events = drain(&mut events);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].dedupe_key, "tx:approve_permission:7");
}

#[tokio::test]
async fn test_decision_never_overlaps_a_refresh() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.insert_request(&Address::new(PATIENT), &request(7, "QmLab", PermissionType::View));
    ledger.set_read_delay(Some(Duration::from_millis(100)));

    let engine = engine_for(&ledger, PATIENT);
    let actions = engine.permission_actions();

    let (refreshed, approved) = tokio::join!(
        engine.refresh(CollectionKind::PermissionRequests),
        actions.approve(7)
    );
    refreshed.unwrap();
    approved.unwrap();

    assert_eq!(ledger.read_calls(CollectionKind::PermissionRequests), 2);
    assert_eq!(ledger.max_concurrent_reads(CollectionKind::PermissionRequests), 1);
    assert_eq!(
        engine.permission_requests().items()[0].status,
        RequestStatus::Approved
    );
}

#[tokio::test]
async fn test_second_decision_gets_guidance() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.insert_request(&Address::new(PATIENT), &request(3, "QmLab", PermissionType::Edit));

    let engine = engine_for(&ledger, PATIENT);
    let actions = engine.permission_actions();
    actions.decline(3).await.unwrap();
    assert!(!ledger.has_access(&Address::new(DOCTOR), &Address::new(PATIENT)));

    let mut events = engine.subscribe();
    let result = actions.approve(3).await;
    assert!(matches!(result, Err(Error::LedgerRejected { .. })));

    let events = drain(&mut events);
    assert_eq!(events[0].message, "This request has already been processed");
}

#[tokio::test]
async fn test_batch_approval_needs_whole_history_request() {
    let ledger = Arc::new(InMemoryLedger::new());
    let owner = Address::new(PATIENT);
    ledger.insert_request(&owner, &request(1, "QmLab", PermissionType::InsuranceProcessing));
    ledger.insert_request(&owner, &request(2, "", PermissionType::InsuranceProcessing));

    let engine = engine_for(&ledger, PATIENT);
    let actions = engine.permission_actions();

    assert!(matches!(
        actions.approve_batch_access(1).await,
        Err(Error::LedgerRejected { .. })
    ));
    actions.approve_batch_access(2).await.unwrap();

    let approved = engine.approved_insurance_requests();
    assert_eq!(approved.len(), 1);
    assert_eq!(approved[0].request_id, 2);
    assert_eq!(engine.pending_insurance_requests().len(), 1);
}

#[tokio::test]
async fn test_unreachable_ledger_on_decision() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.insert_request(&Address::new(PATIENT), &request(1, "QmLab", PermissionType::View));
    ledger.set_unreachable(true);

    let engine = engine_for(&ledger, PATIENT);
    let result = engine.permission_actions().approve(1).await;
    assert!(matches!(result, Err(Error::LedgerUnreachable(_))));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_bad_amounts_never_reach_storage(amount in "[a-z ]{0,6}|0|0\\.0+|-[1-9]") {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        runtime.block_on(async {
            let ledger = Arc::new(InMemoryLedger::new());
            let blobs = Arc::new(MemoryBlobStore::new());
            let engine = engine_for(&ledger, PATIENT);
            let submission = engine.claim_submission(blobs.clone());

            let mut form = claim_form();
            form.claim_amount = amount.clone();
            let result = submission.submit(&mut form).await;

            prop_assert!(matches!(result, Err(Error::Validation { field: "claim_amount", .. })), "expected claim_amount validation error, got {:?}", result);
            prop_assert!(blobs.is_empty());
            prop_assert_eq!(ledger.write_calls(), 0);
            Ok(())
        })?;
    }
}
