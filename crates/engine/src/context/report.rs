//! Aggregate counters since process start

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

/// Monotonic sync counters. Reset only by a restart.
pub struct ReportCounters {
    init_count: AtomicU64,
    sync_count: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    started_at: DateTime<Utc>,
    seen: Mutex<HashSet<Uuid>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportSnapshot {
    pub init_count: u64,
    pub sync_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub counters_started_at: DateTime<Utc>,
}

impl Default for ReportCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportCounters {
    pub fn new() -> Self {
        Self {
            init_count: AtomicU64::new(0),
            sync_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            started_at: Utc::now(),
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Count a pass attempt.
    pub fn record_attempt(&self) {
        self.sync_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a successful pass; a tenant's first one also counts as an init.
    pub fn record_success(&self, tenant_id: Uuid) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
        if self.seen.lock().insert(tenant_id) {
            self.init_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ReportSnapshot {
        ReportSnapshot {
            init_count: self.init_count.load(Ordering::Relaxed),
            sync_count: self.sync_count.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            counters_started_at: self.started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_counted_once_per_tenant() {
        let counters = ReportCounters::new();
        let tenant = Uuid::now_v7();

        counters.record_attempt();
        counters.record_success(tenant);
        counters.record_attempt();
        counters.record_success(tenant);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.sync_count, 2);
        assert_eq!(snapshot.init_count, 1);
        assert_eq!(snapshot.success_count, 2);
    }

    #[test]
    fn test_failed_first_pass_is_not_an_init() {
        let counters = ReportCounters::new();
        let tenant = Uuid::now_v7();

        counters.record_attempt();
        counters.record_failure();
        assert_eq!(counters.snapshot().init_count, 0);

        counters.record_attempt();
        counters.record_success(tenant);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.sync_count, 2);
        assert_eq!(snapshot.init_count, 1);
        assert_eq!(snapshot.failure_count, 1);
    }

    #[test]
    fn test_snapshot_field_names() {
        let json = serde_json::to_value(ReportCounters::new().snapshot()).unwrap();
        assert_eq!(json["initCount"], 0);
        assert!(json.get("countersStartedAt").is_some());
    }
}
