// Calsync control plane library
// Decision: Shared library for binaries (operator server, export-openapi)

// Operator API routes and types (shared for OpenAPI generation)
pub mod api;

// Authenticated client for an instance's control surface
pub mod client;

// OpenAPI document generation
pub mod openapi;

// Fleet inventory
pub mod storage;

pub use api::{routes, AppState};
pub use client::{InstanceClient, InstanceClientError, InstanceLiveness};
pub use storage::{InMemoryInstanceStore, InstanceStore, InventoryError, PostgresInstanceStore};
