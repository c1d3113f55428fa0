//! Record sync demo binary
//!
//! Runs the engine for one patient against an in-process Ledger, seeds some
//! state, and plays a doctor and an ambulance service acting on it so the
//! notification flow can be watched in the logs.

use anyhow::Context;
use ledger_gateway::{InMemoryLedger, LocalSigner};
use record_core::{
    Address, CollectionKind, DataType, HealthRecord, NativeAmount, PermissionRequest,
    PermissionType, RequestStatus,
};
use std::sync::Arc;
use std::time::Duration;
use sync_engine::{Config, SyncEngine};
use tokio_stream::StreamExt;

const PATIENT: &str = "0x1111111111111111111111111111111111111111";
const DOCTOR: &str = "0x2222222222222222222222222222222222222222";
const AMBULANCE: &str = "0x3333333333333333333333333333333333333333";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting MedLedger record sync");

    let config = match std::env::var("RECORD_SYNC_CONFIG") {
        Ok(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        Err(_) => Config::from_env().context("reading RECORD_SYNC_* overrides")?,
    };

    let ledger = Arc::new(InMemoryLedger::new());
    let patient = Address::new(PATIENT);
    seed(&ledger, &patient);

    let signer = Arc::new(LocalSigner::new(PATIENT));
    let engine = SyncEngine::new(config, ledger.clone(), signer);

    let mut notifications = Box::pin(engine.notifications());
    tokio::spawn(async move {
        while let Some(event) = notifications.next().await {
            tracing::info!(severity = %event.severity, key = %event.dedupe_key, "{}", event.message);
        }
    });

    let scheduler = engine.start();

    // Outside activity the engine should pick up on its next cycles
    let activity = ledger.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        activity.set_request_status(&Address::new(PATIENT), 1, RequestStatus::Approved);
        activity.insert_request(&Address::new(PATIENT), &request(2, "", PermissionType::InsuranceProcessing));
        activity.insert_request(&Address::new(PATIENT), &request(3, "QmLab", PermissionType::LabProcessing));

        tokio::time::sleep(Duration::from_secs(10)).await;
        activity.insert_record(&record("QmEmergency2", DataType::EmergencyRecord, AMBULANCE));
    });

    tokio::signal::ctrl_c().await?;

    tracing::info!(
        records = engine.records().len(),
        requests = engine.permission_requests().len(),
        "Shutting down record sync"
    );
    scheduler.shutdown().await;
    Ok(())
}

fn seed(ledger: &InMemoryLedger, patient: &Address) {
    ledger.insert_record(&record("QmLabPanel", DataType::LabResult, DOCTOR));
    ledger.insert_record(&record("QmEmergency1", DataType::EmergencyRecord, AMBULANCE));
    ledger.insert_request(patient, &request(1, "QmLabPanel", PermissionType::View));
    ledger.push_raw(
        CollectionKind::Bookings,
        patient,
        serde_json::json!({ "hospitalName": "City General", "roomType": "General", "bookingDate": 1_700_000_000u64 }),
    );
}

fn record(cid: &str, data_type: DataType, provider: &str) -> HealthRecord {
    HealthRecord {
        owner: Address::new(PATIENT),
        ipfs_cid: cid.to_string(),
        data_type,
        provider: Address::new(provider),
        timestamp: chrono::Utc::now().timestamp().max(0) as u64,
        is_valid: true,
        encrypted_symmetric_key: String::new(),
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
