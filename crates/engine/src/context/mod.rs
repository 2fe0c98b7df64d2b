//! Process-local state of a fleet member
//!
//! Owned by the scheduler and shared with the control surface through `Arc`s.

mod instance;
mod pool;
mod report;

pub use instance::{InstanceContext, InstanceSnapshot, DEFAULT_PASS_TIMEOUT};
pub use pool::{LoopEntry, WorkerPoolContext};
pub use report::{ReportCounters, ReportSnapshot};
