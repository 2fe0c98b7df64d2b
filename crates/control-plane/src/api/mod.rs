// Operator API
//
// Inventory management under /v1/instances, control calls proxied to a named
// instance, and a fleet-wide liveness sweep.

pub mod common;
pub mod fleet;
pub mod instances;

use std::sync::Arc;

use axum::Router;

pub use common::{ErrorResponse, ListResponse};

use crate::storage::InstanceStore;

/// App state shared by the operator routes
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn InstanceStore>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(store: Arc<dyn InstanceStore>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { store, http }
    }
}

/// All operator routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .merge(instances::routes(state.clone()))
        .merge(fleet::routes(state))
}
