// Liveness, stop/exit and health report routes

use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use calsync_engine::{InstanceSnapshot, LoopEntry, ReportSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ControlAuth, ControlState, ErrorResponse};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LivenessResponse {
    pub status: String,
    pub prefix: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct StopResponse {
    stopped: bool,
}

/// Health snapshot of the whole instance.
#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub counters: ReportSnapshot,
    pub workers: Vec<LoopEntry>,
    pub instance: InstanceSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutRequest {
    pub timeout_ms: u64,
}

pub(super) fn routes(state: ControlState) -> Router {
    Router::new()
        .route("/liveness", get(liveness))
        .route("/stop", post(stop))
        .route("/exit", post(exit))
        .route("/report", get(report))
        .route("/timeout", put(set_timeout))
        .with_state(state)
}

/// GET /liveness
async fn liveness(_: ControlAuth, State(state): State<ControlState>) -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive".to_string(),
        prefix: state.instance.prefix().to_string(),
        version: state.instance.version().to_string(),
        started_at: state.instance.started_at(),
    })
}

/// POST /stop - loops finish their current pass and claim nothing new
async fn stop(_: ControlAuth, State(state): State<ControlState>) -> Json<StopResponse> {
    state.instance.request_stop();
    Json(StopResponse { stopped: true })
}

/// POST /exit - stop, drain, then terminate the process
async fn exit(_: ControlAuth, State(state): State<ControlState>) -> (StatusCode, Json<StopResponse>) {
    info!("Exit requested over control surface");
    state.instance.request_stop();
    state.request_exit();
    (StatusCode::ACCEPTED, Json(StopResponse { stopped: true }))
}

/// GET /report
async fn report(_: ControlAuth, State(state): State<ControlState>) -> Json<ReportResponse> {
    Json(ReportResponse {
        counters: state.report.snapshot(),
        workers: state.pool.snapshot(),
        instance: state.instance.snapshot(),
    })
}

/// PUT /timeout - retune the pass timeout for passes started from now on
async fn set_timeout(
    _: ControlAuth,
    State(state): State<ControlState>,
    Json(req): Json<TimeoutRequest>,
) -> Result<Json<InstanceSnapshot>, (StatusCode, Json<ErrorResponse>)> {
    if req.timeout_ms == 0 {
        return Err(ErrorResponse::new("invalid_timeout").into_response(StatusCode::BAD_REQUEST));
    }
    state.instance.set_timeout(Duration::from_millis(req.timeout_ms));
    Ok(Json(state.instance.snapshot()))
}
