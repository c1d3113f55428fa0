//! Snapshot diffing
//!
//! Each tracked collection keeps a baseline of what it last observed. A
//! baseline starts unseeded: the first observation only seeds it and reports
//! nothing, since there is nothing to compare against.

use crate::config::EmergencyTracking;
use record_core::{Claim, ClaimStatus, HealthRecord, PermissionRequest, RequestStatus};
use std::collections::{HashMap, HashSet};

/// A meaningful change between two observations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// A known request changed status
    PermissionTransition {
        /// Request as observed now
        request: PermissionRequest,
        /// Previous status
        from: RequestStatus,
    },

    /// Pending requests not seen before
    PermissionArrivals {
        /// New request ids
        request_ids: Vec<u64>,
    },

    /// More emergency records than at the last observation
    EmergencyArrivals {
        /// Number of new emergency records
        count: usize,
    },

    /// A known claim changed status
    ClaimTransition {
        /// Claim as observed now
        claim: Claim,
        /// Previous status
        from: ClaimStatus,
    },
}

/// Baseline for permission requests: status by request id
#[derive(Debug, Default)]
pub struct PermissionBaseline {
    statuses: Option<HashMap<u64, RequestStatus>>,
}

impl PermissionBaseline {
    /// Whether a first observation has been made
    pub fn is_seeded(&self) -> bool {
        self.statuses.is_some()
    }

    /// Compare with the current observation, then adopt it as the baseline
    pub fn observe(&mut self, current: &[PermissionRequest]) -> Vec<Change> {
        let next: HashMap<u64, RequestStatus> =
            current.iter().map(|r| (r.request_id, r.status)).collect();

        let previous = match self.statuses.replace(next) {
            Some(previous) => previous,
            None => return Vec::new(),
        };

        let mut changes = Vec::new();
        let mut arrivals = Vec::new();

        for request in current {
            match previous.get(&request.request_id) {
                Some(&from) if from != request.status => {
                    changes.push(Change::PermissionTransition {
                        request: request.clone(),
                        from,
                    });
                }
                Some(_) => {}
                None if request.status == RequestStatus::Pending => {
                    arrivals.push(request.request_id);
                }
                None => {}
            }
        }

        if !arrivals.is_empty() {
            changes.push(Change::PermissionArrivals { request_ids: arrivals });
        }

        changes
    }
}

/// Baseline for health records: emergency-record arrivals
#[derive(Debug)]
pub enum EmergencyBaseline {
    /// Emergency record count at the last non-empty observation. Arrivals
    /// are only reported on top of a non-zero count.
    Count(Option<usize>),
    /// Emergency record content ids at the last non-empty observation
    Identity(Option<HashSet<String>>),
}

impl EmergencyBaseline {
    /// Unseeded baseline for a tracking mode
    pub fn new(tracking: EmergencyTracking) -> Self {
        match tracking {
            EmergencyTracking::Count => EmergencyBaseline::Count(None),
            EmergencyTracking::Identity => EmergencyBaseline::Identity(None),
        }
    }

    /// Whether a first observation has been made
    pub fn is_seeded(&self) -> bool {
        match self {
            EmergencyBaseline::Count(seen) => seen.is_some(),
            EmergencyBaseline::Identity(seen) => seen.is_some(),
        }
    }

    /// Compare with the current observation, then adopt it as the baseline.
    /// An empty record set is not an observation.
    pub fn observe(&mut self, current: &[HealthRecord]) -> Vec<Change> {
        if current.is_empty() {
            return Vec::new();
        }

        let emergency = current.iter().filter(|r| r.is_emergency());

        let count = match self {
            EmergencyBaseline::Count(previous) => {
                let now = emergency.count();
                match previous.replace(now) {
                    Some(before) if before > 0 => now.saturating_sub(before),
                    _ => 0,
                }
            }
            EmergencyBaseline::Identity(previous) => {
                let now: HashSet<String> = emergency.map(|r| r.ipfs_cid.clone()).collect();
                let added = previous
                    .as_ref()
                    .map(|before| now.difference(before).count())
                    .unwrap_or(0);
                *previous = Some(now);
                added
            }
        };

        if count > 0 {
            vec![Change::EmergencyArrivals { count }]
        } else {
            Vec::new()
        }
    }
}

/// Baseline for claims: status by claim id
#[derive(Debug, Default)]
pub struct ClaimBaseline {
    statuses: Option<HashMap<u64, ClaimStatus>>,
}

impl ClaimBaseline {
    /// Compare with the current observation, then adopt it as the baseline
    pub fn observe(&mut self, current: &[Claim]) -> Vec<Change> {
        let next: HashMap<u64, ClaimStatus> = current.iter().map(|c| (c.claim_id, c.status)).collect();

        let previous = match self.statuses.replace(next) {
            Some(previous) => previous,
            None => return Vec::new(),
        };

        current
            .iter()
            .filter_map(|claim| match previous.get(&claim.claim_id) {
                Some(&from) if from != claim.status => Some(Change::ClaimTransition {
                    claim: claim.clone(),
                    from,
                }),
                _ => None,
            })
            .collect()
    }
}
