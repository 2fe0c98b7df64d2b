//! Per-loop bookkeeping for the health report

use calsync_core::PlanTier;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

/// One worker loop as seen by the report.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoopEntry {
    pub loop_id: String,
    pub tier: PlanTier,
    pub current_tenant_id: Option<Uuid>,
    pub completed_count: u64,
    /// When the current pass started
    pub loop_started_at: Option<DateTime<Utc>>,
}

/// Ordered registry of running worker loops.
#[derive(Default)]
pub struct WorkerPoolContext {
    entries: RwLock<Vec<LoopEntry>>,
}

impl WorkerPoolContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, loop_id: &str, tier: PlanTier) {
        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.loop_id == loop_id) {
            return;
        }
        entries.push(LoopEntry {
            loop_id: loop_id.to_string(),
            tier,
            current_tenant_id: None,
            completed_count: 0,
            loop_started_at: None,
        });
    }

    pub fn claim(&self, loop_id: &str, tenant_id: Uuid) {
        if let Some(entry) = self.entries.write().iter_mut().find(|e| e.loop_id == loop_id) {
            entry.current_tenant_id = Some(tenant_id);
            entry.loop_started_at = Some(Utc::now());
        }
    }

    pub fn finish(&self, loop_id: &str) {
        if let Some(entry) = self.entries.write().iter_mut().find(|e| e.loop_id == loop_id) {
            entry.current_tenant_id = None;
            entry.loop_started_at = None;
            entry.completed_count += 1;
        }
    }

    pub fn deregister(&self, loop_id: &str) {
        self.entries.write().retain(|e| e.loop_id != loop_id);
    }

    /// Loops currently holding a tenant.
    pub fn busy_count(&self) -> usize {
        self.entries
            .read()
            .iter()
            .filter(|e| e.current_tenant_id.is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn snapshot(&self) -> Vec<LoopEntry> {
        self.entries.read().clone()
    }
}
