//! Sync engine metrics

use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};

lazy_static::lazy_static! {
    pub static ref RECONCILIATION_CYCLES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "record_sync_reconciliation_cycles_total",
        "Reconciliation cycles by outcome",
        &["collection", "outcome"]
    )
    .unwrap();

    pub static ref RECONCILIATION_DURATION: HistogramVec = register_histogram_vec!(
        "record_sync_reconciliation_duration_seconds",
        "Fetch-normalize-diff duration",
        &["collection"]
    )
    .unwrap();

    pub static ref SNAPSHOT_SIZE: IntGaugeVec = register_int_gauge_vec!(
        "record_sync_snapshot_size",
        "Items in the current snapshot",
        &["collection"]
    )
    .unwrap();

    pub static ref NOTIFICATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "record_sync_notifications_total",
        "Published notifications by severity",
        &["severity"]
    )
    .unwrap();

    pub static ref TRANSACTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "record_sync_transactions_total",
        "Orchestrated Ledger writes by outcome",
        &["action", "outcome"]
    )
    .unwrap();
}
