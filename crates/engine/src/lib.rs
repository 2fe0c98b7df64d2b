//! # Sync Engine
//!
//! Keeps each tenant's calendars and document database in step, across a
//! fleet of instances sharing one PostgreSQL store.
//!
//! ## Features
//!
//! - **Lease-based tenant claims**: one loop per tenant at a time, fleet-wide
//! - **Event links**: lookup-or-create that never duplicates a pairing
//! - **Fixed-delay retries and bounded waits** around every upstream call
//! - **Graceful drain**: stop flag, woken sleepers, forced abort at a deadline
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Scheduler                             │
//! │  (N loops per plan tier: claim, reconcile, cool down)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ReconcilePass                            │
//! │  (calendar side, document side, pending removals)           │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                              │
//!                 ▼                              ▼
//! ┌───────────────────────────┐  ┌──────────────────────────────┐
//! │  Calendar / Document      │  │         SyncStore            │
//! │  providers (traits)       │  │  (tenants, links, log rows)  │
//! └───────────────────────────┘  └──────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use calsync_engine::prelude::*;
//!
//! let store: Arc<dyn SyncStore> = Arc::new(PostgresSyncStore::new(pool));
//! let pass = ReconcilePass::new(store.clone(), providers, PassSettings::default());
//! let scheduler = Scheduler::new(store, Arc::new(pass), instance, workers, report, SchedulerConfig::default());
//!
//! scheduler.start()?;
//! // ...
//! scheduler.shutdown(Duration::from_secs(60)).await?;
//! ```

pub mod context;
pub mod fakes;
pub mod persistence;
pub mod reconcile;
pub mod reliability;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::context::{InstanceContext, ReportCounters, WorkerPoolContext};
    pub use crate::persistence::{
        InMemorySyncStore, PostgresSyncStore, StoreError, SyncStore,
    };
    pub use crate::reconcile::{PassRunner, PassSettings, ReconcilePass};
    pub use crate::reliability::{retry, with_timeout, RetryPolicy};
    pub use crate::worker::{Scheduler, SchedulerConfig, SchedulerError};
}

// Re-export key types at crate root
pub use context::{
    InstanceContext, InstanceSnapshot, LoopEntry, ReportCounters, ReportSnapshot,
    WorkerPoolContext, DEFAULT_PASS_TIMEOUT,
};
pub use persistence::{
    ClaimRequest, InMemorySyncStore, LinkKey, LinkOutcome, PendingRemoval, PostgresSyncStore,
    StoreError, SyncStore,
};
pub use reconcile::{
    Candidate, Observed, PassRunner, PassSettings, PassSummary, ReconcilePass, Resolution,
    Resolver,
};
pub use reliability::{
    retry, retry_if, with_timeout, with_timeout_detached, RetryPolicy, TimeoutError,
    DEFAULT_DELAY, DEFAULT_MAX_ATTEMPTS, DOCUMENT_THROTTLE,
};
pub use worker::{LoopState, Scheduler, SchedulerConfig, SchedulerError};
