//! Worker loops
//!
//! This module provides:
//! - [`Scheduler`] - spawns the per-tier loops and drains them on shutdown
//! - [`SchedulerConfig`] - cooldowns, idle interval and retry bounds
//! - [`LoopState`] - the states a loop moves through
//!
//! # Loop cycle
//!
//! ```text
//!   Idle ──► Claiming ──► Reconciling ──► Cooling ──► Idle
//!              │  ▲            │
//!   (nothing   │  │  (RETRY:   │
//!    due)      ▼  │  renew)    │
//!            sleep └───────────┘
//!
//!   stop flag set ──► Stopped (checked at Idle, woken from any sleep)
//! ```

mod scheduler;
mod sync_loop;

pub use scheduler::{Scheduler, SchedulerConfig, SchedulerError, DEFAULT_IDLE_INTERVAL};
pub use sync_loop::LoopState;
