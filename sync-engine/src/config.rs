//! Configuration for the sync engine

use crate::{Error, Result};
use record_core::{CollectionKind, RecordOrder, DEFAULT_NATIVE_DECIMALS};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Sync engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Refresh cadence per collection
    pub refresh: RefreshConfig,

    /// Display ordering of normalized collections
    pub record_order: RecordOrder,

    /// Decimals of the Ledger's native value unit
    pub native_decimals: u32,

    /// Notification broadcast capacity
    pub notification_capacity: usize,

    /// How emergency-record arrivals are detected
    pub emergency_tracking: EmergencyTracking,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh: RefreshConfig::default(),
            record_order: RecordOrder::MostRecentFirst,
            native_decimals: DEFAULT_NATIVE_DECIMALS,
            notification_capacity: 256,
            emergency_tracking: EmergencyTracking::Count,
        }
    }
}

/// Interval refresh per collection, in seconds. `0` disables the timer; the
/// collection is then refreshed on mount and visibility only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Health records
    pub records_interval_secs: u64,

    /// Permission requests
    pub permission_requests_interval_secs: u64,

    /// Insurance claims
    pub claims_interval_secs: u64,

    /// Bookings
    pub bookings_interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            records_interval_secs: 30,
            permission_requests_interval_secs: 45,
            claims_interval_secs: 30,
            bookings_interval_secs: 0,
        }
    }
}

impl RefreshConfig {
    /// Timer period for a collection, `None` when interval refresh is off
    pub fn interval(&self, kind: CollectionKind) -> Option<Duration> {
        let secs = match kind {
            CollectionKind::Records => self.records_interval_secs,
            CollectionKind::PermissionRequests => self.permission_requests_interval_secs,
            CollectionKind::Claims => self.claims_interval_secs,
            CollectionKind::Bookings => self.bookings_interval_secs,
        };
        (secs > 0).then(|| Duration::from_secs(secs))
    }
}

/// Emergency-record arrival detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyTracking {
    /// Compare emergency record counts between observations.
    ///
    /// Approximate: a removal and an addition within one interval cancel out.
    #[default]
    Count,
    /// Diff the set of emergency record content ids
    Identity,
}

impl FromStr for EmergencyTracking {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "count" => Ok(EmergencyTracking::Count),
            "identity" => Ok(EmergencyTracking::Identity),
            other => Err(Error::Config(format!("Unknown emergency tracking mode '{}'", other))),
        }
    }
}

fn parse_order(value: &str) -> Result<RecordOrder> {
    match value.trim().to_ascii_lowercase().as_str() {
        "ledger" | "ledger_order" => Ok(RecordOrder::LedgerOrder),
        "most_recent_first" | "recent" => Ok(RecordOrder::MostRecentFirst),
        other => Err(Error::Config(format!("Unknown record order '{}'", other))),
    }
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} must be a number, got '{}'", name, value)))
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply `RECORD_SYNC_*` overrides read through `lookup`
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        const RECORDS: &str = "RECORD_SYNC_RECORDS_INTERVAL_SECS";
        const PERMISSIONS: &str = "RECORD_SYNC_PERMISSIONS_INTERVAL_SECS";
        const CLAIMS: &str = "RECORD_SYNC_CLAIMS_INTERVAL_SECS";
        const BOOKINGS: &str = "RECORD_SYNC_BOOKINGS_INTERVAL_SECS";
        const DECIMALS: &str = "RECORD_SYNC_NATIVE_DECIMALS";
        const CAPACITY: &str = "RECORD_SYNC_NOTIFICATION_CAPACITY";

        if let Some(v) = lookup(RECORDS) {
            self.refresh.records_interval_secs = parse_number(RECORDS, &v)?;
        }
        if let Some(v) = lookup(PERMISSIONS) {
            self.refresh.permission_requests_interval_secs = parse_number(PERMISSIONS, &v)?;
        }
        if let Some(v) = lookup(CLAIMS) {
            self.refresh.claims_interval_secs = parse_number(CLAIMS, &v)?;
        }
        if let Some(v) = lookup(BOOKINGS) {
            self.refresh.bookings_interval_secs = parse_number(BOOKINGS, &v)?;
        }
        if let Some(v) = lookup("RECORD_SYNC_ORDER") {
            self.record_order = parse_order(&v)?;
        }
        if let Some(v) = lookup(DECIMALS) {
            self.native_decimals = parse_number(DECIMALS, &v)?;
        }
        if let Some(v) = lookup(CAPACITY) {
            self.notification_capacity = parse_number(CAPACITY, &v)?;
        }
        if let Some(v) = lookup("RECORD_SYNC_EMERGENCY_TRACKING") {
            self.emergency_tracking = v.parse()?;
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.notification_capacity == 0 {
            return Err(Error::Config("notification_capacity must be positive".to_string()));
        }
        // 10^28 is the largest power of ten rust_decimal represents
        if self.native_decimals > 28 {
            return Err(Error::Config(format!(
                "native_decimals must be at most 28, got {}",
                self.native_decimals
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.refresh.interval(CollectionKind::Records), Some(Duration::from_secs(30)));
        assert_eq!(
            config.refresh.interval(CollectionKind::PermissionRequests),
            Some(Duration::from_secs(45))
        );
        assert_eq!(config.refresh.interval(CollectionKind::Bookings), None);
        assert_eq!(config.native_decimals, 18);
        assert_eq!(config.emergency_tracking, EmergencyTracking::Count);
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "emergency_tracking = \"identity\"\nrecord_order = \"ledger_order\"\n\n[refresh]\nclaims_interval_secs = 60"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.emergency_tracking, EmergencyTracking::Identity);
        assert_eq!(config.record_order, RecordOrder::LedgerOrder);
        assert_eq!(config.refresh.claims_interval_secs, 60);
        assert_eq!(config.refresh.records_interval_secs, 30);
    }

    #[test]
    fn test_from_file_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "native_decimals = \"eighteen\"").unwrap();
        assert!(matches!(Config::from_file(file.path()), Err(Error::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("RECORD_SYNC_PERMISSIONS_INTERVAL_SECS", "5"),
            ("RECORD_SYNC_ORDER", "ledger"),
            ("RECORD_SYNC_EMERGENCY_TRACKING", "Identity"),
        ]
        .into_iter()
        .collect();

        let config = Config::default()
            .with_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.refresh.permission_requests_interval_secs, 5);
        assert_eq!(config.record_order, RecordOrder::LedgerOrder);
        assert_eq!(config.emergency_tracking, EmergencyTracking::Identity);

        let bad = Config::default().with_overrides(|name| {
            (name == "RECORD_SYNC_NATIVE_DECIMALS").then(|| "lots".to_string())
        });
        assert!(matches!(bad, Err(Error::Config(_))));
    }
}
