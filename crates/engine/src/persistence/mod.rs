//! Persistence layer for the sync fleet
//!
//! This module provides:
//! - [`SyncStore`] trait for tenants, calendars, event links and sync logs
//! - [`InMemorySyncStore`] for testing and local runs
//! - [`PostgresSyncStore`] for production

mod memory;
mod postgres;
mod store;

pub use memory::InMemorySyncStore;
pub use postgres::PostgresSyncStore;
pub use store::{ClaimRequest, LinkKey, LinkOutcome, PendingRemoval, StoreError, SyncStore};
