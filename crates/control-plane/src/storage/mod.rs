// Fleet instance inventory
// Decision: One trait, two backends; the in-memory one runs the control plane without a database
// Decision: Prefix uniqueness is enforced by the backend, not checked-then-inserted by callers

mod memory;
mod postgres;

pub use memory::InMemoryInstanceStore;
pub use postgres::PostgresInstanceStore;

use async_trait::async_trait;
use calsync_core::{FleetInstance, RegisterInstance};

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum InventoryError {
    /// Another instance already uses this identity prefix
    #[error("identity prefix already registered: {0}")]
    PrefixTaken(String),

    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),
}

#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn register(&self, request: RegisterInstance) -> Result<FleetInstance, InventoryError>;

    /// Remove the instance with `prefix`. Returns the removed row.
    async fn deregister(&self, prefix: &str) -> Result<FleetInstance, InventoryError>;

    async fn get_by_prefix(&self, prefix: &str) -> Result<Option<FleetInstance>, InventoryError>;

    /// Every instance, ordered by prefix.
    async fn list(&self) -> Result<Vec<FleetInstance>, InventoryError>;
}
