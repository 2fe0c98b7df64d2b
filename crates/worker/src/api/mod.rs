// Instance control surface
//
// Routes the control plane calls on a running instance. Every route requires
// the prefix + secret headers (see auth.rs).

mod auth;
mod control;
mod logs;

use std::path::PathBuf;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::{Json, Router};
use calsync_engine::{InstanceContext, ReportCounters, SyncStore, WorkerPoolContext};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

pub use auth::{ControlAuth, WRONG_SECRET};
pub use control::{LivenessResponse, ReportResponse, TimeoutRequest};

/// Standard error body for control calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }

    /// Convert to axum response tuple
    pub fn into_response(self, status: StatusCode) -> (StatusCode, Json<Self>) {
        (status, Json(self))
    }
}

/// Shared state of the control routes
#[derive(Clone)]
pub struct ControlState {
    pub instance: Arc<InstanceContext>,
    pub pool: Arc<WorkerPoolContext>,
    pub report: Arc<ReportCounters>,
    pub store: Arc<dyn SyncStore>,
    pub log_dir: PathBuf,
    secret_digest: [u8; 32],
    exit_tx: Arc<watch::Sender<bool>>,
}

impl ControlState {
    pub fn new(
        instance: Arc<InstanceContext>,
        pool: Arc<WorkerPoolContext>,
        report: Arc<ReportCounters>,
        store: Arc<dyn SyncStore>,
        control_secret: &str,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        let (exit_tx, _) = watch::channel(false);
        Self {
            instance,
            pool,
            report,
            store,
            log_dir: log_dir.into(),
            secret_digest: auth::digest(control_secret),
            exit_tx: Arc::new(exit_tx),
        }
    }

    /// Receiver that flips to `true` when `/exit` is called.
    pub fn subscribe_exit(&self) -> watch::Receiver<bool> {
        self.exit_tx.subscribe()
    }

    pub(crate) fn request_exit(&self) {
        self.exit_tx.send_replace(true);
    }
}

/// Build the control router with request tracing.
pub fn router(state: ControlState) -> Router {
    Router::new()
        .merge(control::routes(state.clone()))
        .merge(logs::routes(state))
        .layer(TraceLayer::new_for_http())
}
