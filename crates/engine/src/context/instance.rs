//! Instance identity and runtime-tunable settings

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use calsync_core::PlanTier;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

/// Default bound on one reconciliation pass.
pub const DEFAULT_PASS_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Identity and configuration of this fleet member
///
/// Read once at startup. The pass timeout and the stop flag are the only
/// fields that change at runtime.
pub struct InstanceContext {
    prefix: String,
    version: String,
    started_at: DateTime<Utc>,
    workers: BTreeMap<PlanTier, usize>,
    timeout_ms: AtomicU64,
    stop: AtomicBool,
    stop_tx: watch::Sender<bool>,
}

/// Serializable view of [`InstanceContext`].
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSnapshot {
    pub prefix: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub workers: BTreeMap<PlanTier, usize>,
    pub timeout_ms: u64,
    pub stopped: bool,
}

impl InstanceContext {
    pub fn new(
        prefix: impl Into<String>,
        version: impl Into<String>,
        workers: BTreeMap<PlanTier, usize>,
        timeout: Duration,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            prefix: prefix.into(),
            version: version.into(),
            started_at: Utc::now(),
            workers,
            timeout_ms: AtomicU64::new(timeout.as_millis() as u64),
            stop: AtomicBool::new(false),
            stop_tx,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn workers(&self) -> &BTreeMap<PlanTier, usize> {
        &self.workers
    }

    /// Current bound on one reconciliation pass.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_timeout(&self, timeout: Duration) {
        let ms = timeout.as_millis() as u64;
        self.timeout_ms.store(ms, Ordering::Relaxed);
        info!(timeout_ms = ms, "Pass timeout updated");
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Set the stop flag and wake sleeping loops. Idempotent.
    pub fn request_stop(&self) {
        if !self.stop.swap(true, Ordering::SeqCst) {
            info!(prefix = %self.prefix, "Stop requested");
        }
        self.stop_tx.send_replace(true);
    }

    /// Receiver that flips to `true` once stop is requested.
    pub fn subscribe_stop(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            prefix: self.prefix.clone(),
            version: self.version.clone(),
            started_at: self.started_at,
            workers: self.workers.clone(),
            timeout_ms: self.timeout().as_millis() as u64,
            stopped: self.is_stopped(),
        }
    }
}
