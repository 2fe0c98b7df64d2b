// Fleet inventory and per-instance control routes
//
// Control calls are proxied to the instance named by its prefix, carrying the
// stored shared secret.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use calsync_core::{FleetInstance, RegisterInstance};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

use super::common::{ApiError, ErrorResponse, ListResponse};
use super::AppState;
use crate::client::{InstanceClient, InstanceClientError, InstanceLiveness};
use crate::storage::InventoryError;

/// Request to change an instance's pass timeout
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutRequest {
    /// New pass timeout in milliseconds. Must be positive.
    #[schema(example = 120000)]
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct LogFileQuery {
    /// Bare name of a file in the instance's log directory
    pub file_name: String,
}

/// Create instance routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/instances", post(register_instance).get(list_instances))
        .route(
            "/v1/instances/:prefix",
            get(get_instance).delete(deregister_instance),
        )
        .route("/v1/instances/:prefix/liveness", get(instance_liveness))
        .route("/v1/instances/:prefix/stop", post(stop_instance))
        .route("/v1/instances/:prefix/exit", post(exit_instance))
        .route("/v1/instances/:prefix/report", get(instance_report))
        .route("/v1/instances/:prefix/timeout", put(set_instance_timeout))
        .route("/v1/instances/:prefix/logs", get(instance_log_files))
        .route("/v1/instances/:prefix/logs/:date", get(instance_logs_for_day))
        .route("/v1/instances/:prefix/logs-static", get(instance_log_file))
        .with_state(state)
}

fn inventory_error(e: InventoryError) -> ApiError {
    match e {
        InventoryError::PrefixTaken(prefix) => {
            tracing::warn!(prefix = %prefix, "Identity prefix already registered");
            ErrorResponse::new("prefix_taken").into_response(StatusCode::CONFLICT)
        }
        InventoryError::NotFound(_) => {
            ErrorResponse::new("instance_not_found").into_response(StatusCode::NOT_FOUND)
        }
        InventoryError::Database(e) => {
            tracing::error!("Inventory failure: {}", e);
            ErrorResponse::new("internal_error").into_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Map a failed control call onto the operator's response.
///
/// Client errors from the instance (bad date, unknown file) keep their status
/// and error code; everything else is a bad gateway.
fn instance_error(prefix: &str, e: InstanceClientError) -> ApiError {
    tracing::warn!(prefix = %prefix, error = %e, "Control call failed");
    match e {
        InstanceClientError::Rejected => {
            ErrorResponse::new("wrong_controlSecret").into_response(StatusCode::BAD_GATEWAY)
        }
        InstanceClientError::Status { status, body } if (400..500).contains(&status) => {
            let code = serde_json::from_str::<ErrorResponse>(&body)
                .map(|r| r.error)
                .unwrap_or_else(|_| "instance_error".to_string());
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            ErrorResponse::new(code).into_response(status)
        }
        InstanceClientError::Status { .. } => {
            ErrorResponse::new("instance_error").into_response(StatusCode::BAD_GATEWAY)
        }
        InstanceClientError::Unreachable(_) => {
            ErrorResponse::new("instance_unreachable").into_response(StatusCode::BAD_GATEWAY)
        }
        InstanceClientError::Decode(_) => {
            ErrorResponse::new("invalid_instance_response").into_response(StatusCode::BAD_GATEWAY)
        }
    }
}

async fn client_for(state: &AppState, prefix: &str) -> Result<InstanceClient, ApiError> {
    let instance = state
        .store
        .get_by_prefix(prefix)
        .await
        .map_err(inventory_error)?
        .ok_or_else(|| {
            ErrorResponse::new("instance_not_found").into_response(StatusCode::NOT_FOUND)
        })?;
    Ok(InstanceClient::with_http_client(&instance, state.http.clone()))
}

fn non_blank(value: &str) -> bool {
    !value.trim().is_empty()
}

/// POST /v1/instances - Register a fleet instance
#[utoipa::path(
    post,
    path = "/v1/instances",
    request_body = RegisterInstance,
    responses(
        (status = 201, description = "Instance registered", body = FleetInstance),
        (status = 400, description = "Missing field", body = ErrorResponse),
        (status = 409, description = "Identity prefix already registered", body = ErrorResponse)
    ),
    tag = "instances"
)]
pub async fn register_instance(
    State(state): State<AppState>,
    Json(req): Json<RegisterInstance>,
) -> Result<(StatusCode, Json<FleetInstance>), ApiError> {
    let complete = [
        &req.name,
        &req.routing_url,
        &req.identity_prefix,
        &req.shared_secret,
    ]
    .into_iter()
    .all(|v| non_blank(v));
    if !complete {
        return Err(ErrorResponse::new("invalid_request").into_response(StatusCode::BAD_REQUEST));
    }

    let instance = state.store.register(req).await.map_err(inventory_error)?;
    tracing::info!(prefix = %instance.identity_prefix, url = %instance.routing_url, "Instance registered");
    Ok((StatusCode::CREATED, Json(instance)))
}

/// GET /v1/instances - List registered instances
#[utoipa::path(
    get,
    path = "/v1/instances",
    responses(
        (status = 200, description = "Registered instances ordered by prefix", body = ListResponse<FleetInstance>)
    ),
    tag = "instances"
)]
pub async fn list_instances(
    State(state): State<AppState>,
) -> Result<Json<ListResponse<FleetInstance>>, ApiError> {
    let instances = state.store.list().await.map_err(inventory_error)?;
    Ok(Json(ListResponse::new(instances)))
}

/// GET /v1/instances/{prefix} - Get one instance
#[utoipa::path(
    get,
    path = "/v1/instances/{prefix}",
    params(("prefix" = String, Path, description = "Identity prefix")),
    responses(
        (status = 200, description = "Instance found", body = FleetInstance),
        (status = 404, description = "Instance not found", body = ErrorResponse)
    ),
    tag = "instances"
)]
pub async fn get_instance(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
) -> Result<Json<FleetInstance>, ApiError> {
    state
        .store
        .get_by_prefix(&prefix)
        .await
        .map_err(inventory_error)?
        .map(Json)
        .ok_or_else(|| ErrorResponse::new("instance_not_found").into_response(StatusCode::NOT_FOUND))
}

/// DELETE /v1/instances/{prefix} - Remove an instance from the inventory
///
/// The instance itself keeps running; stop or exit it first.
#[utoipa::path(
    delete,
    path = "/v1/instances/{prefix}",
    params(("prefix" = String, Path, description = "Identity prefix")),
    responses(
        (status = 204, description = "Instance deregistered"),
        (status = 404, description = "Instance not found", body = ErrorResponse)
    ),
    tag = "instances"
)]
pub async fn deregister_instance(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
) -> Result<StatusCode, ApiError> {
    let removed = state
        .store
        .deregister(&prefix)
        .await
        .map_err(inventory_error)?;
    tracing::info!(prefix = %removed.identity_prefix, "Instance deregistered");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/instances/{prefix}/liveness
#[utoipa::path(
    get,
    path = "/v1/instances/{prefix}/liveness",
    params(("prefix" = String, Path, description = "Identity prefix")),
    responses(
        (status = 200, description = "Instance is alive", body = InstanceLiveness),
        (status = 404, description = "Instance not found", body = ErrorResponse),
        (status = 502, description = "Instance unreachable or rejected the secret", body = ErrorResponse)
    ),
    tag = "control"
)]
pub async fn instance_liveness(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
) -> Result<Json<InstanceLiveness>, ApiError> {
    let client = client_for(&state, &prefix).await?;
    client
        .liveness()
        .await
        .map(Json)
        .map_err(|e| instance_error(&prefix, e))
}

/// POST /v1/instances/{prefix}/stop - Stop claiming new tenants
#[utoipa::path(
    post,
    path = "/v1/instances/{prefix}/stop",
    params(("prefix" = String, Path, description = "Identity prefix")),
    responses(
        (status = 200, description = "Stop flag set", body = serde_json::Value),
        (status = 404, description = "Instance not found", body = ErrorResponse),
        (status = 502, description = "Control call failed", body = ErrorResponse)
    ),
    tag = "control"
)]
pub async fn stop_instance(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let client = client_for(&state, &prefix).await?;
    let body = client.stop().await.map_err(|e| instance_error(&prefix, e))?;
    tracing::info!(prefix = %prefix, "Instance stopped");
    Ok(Json(body))
}

/// POST /v1/instances/{prefix}/exit - Stop, drain and terminate the process
#[utoipa::path(
    post,
    path = "/v1/instances/{prefix}/exit",
    params(("prefix" = String, Path, description = "Identity prefix")),
    responses(
        (status = 202, description = "Exit accepted", body = serde_json::Value),
        (status = 404, description = "Instance not found", body = ErrorResponse),
        (status = 502, description = "Control call failed", body = ErrorResponse)
    ),
    tag = "control"
)]
pub async fn exit_instance(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let client = client_for(&state, &prefix).await?;
    let body = client.exit().await.map_err(|e| instance_error(&prefix, e))?;
    tracing::info!(prefix = %prefix, "Instance exit requested");
    Ok((StatusCode::ACCEPTED, Json(body)))
}

/// GET /v1/instances/{prefix}/report - Counters, loops and instance state
#[utoipa::path(
    get,
    path = "/v1/instances/{prefix}/report",
    params(("prefix" = String, Path, description = "Identity prefix")),
    responses(
        (status = 200, description = "Health report", body = serde_json::Value),
        (status = 404, description = "Instance not found", body = ErrorResponse),
        (status = 502, description = "Control call failed", body = ErrorResponse)
    ),
    tag = "control"
)]
pub async fn instance_report(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let client = client_for(&state, &prefix).await?;
    client
        .report()
        .await
        .map(Json)
        .map_err(|e| instance_error(&prefix, e))
}

/// PUT /v1/instances/{prefix}/timeout - Retune the pass timeout
#[utoipa::path(
    put,
    path = "/v1/instances/{prefix}/timeout",
    params(("prefix" = String, Path, description = "Identity prefix")),
    request_body = TimeoutRequest,
    responses(
        (status = 200, description = "Updated instance state", body = serde_json::Value),
        (status = 400, description = "Invalid timeout", body = ErrorResponse),
        (status = 404, description = "Instance not found", body = ErrorResponse),
        (status = 502, description = "Control call failed", body = ErrorResponse)
    ),
    tag = "control"
)]
pub async fn set_instance_timeout(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
    Json(req): Json<TimeoutRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.timeout_ms == 0 {
        return Err(ErrorResponse::new("invalid_timeout").into_response(StatusCode::BAD_REQUEST));
    }
    let client = client_for(&state, &prefix).await?;
    client
        .set_timeout(req.timeout_ms)
        .await
        .map(Json)
        .map_err(|e| instance_error(&prefix, e))
}

/// GET /v1/instances/{prefix}/logs - Log file names
#[utoipa::path(
    get,
    path = "/v1/instances/{prefix}/logs",
    params(("prefix" = String, Path, description = "Identity prefix")),
    responses(
        (status = 200, description = "Log file names", body = ListResponse<String>),
        (status = 404, description = "Instance not found", body = ErrorResponse),
        (status = 502, description = "Control call failed", body = ErrorResponse)
    ),
    tag = "logs"
)]
pub async fn instance_log_files(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let client = client_for(&state, &prefix).await?;
    client
        .log_files()
        .await
        .map(Json)
        .map_err(|e| instance_error(&prefix, e))
}

/// GET /v1/instances/{prefix}/logs/{date} - Sync errors persisted on one day
#[utoipa::path(
    get,
    path = "/v1/instances/{prefix}/logs/{date}",
    params(
        ("prefix" = String, Path, description = "Identity prefix"),
        ("date" = String, Path, description = "UTC day, YYYY-MM-DD")
    ),
    responses(
        (status = 200, description = "Sync error records", body = serde_json::Value),
        (status = 400, description = "Invalid date", body = ErrorResponse),
        (status = 404, description = "Instance not found", body = ErrorResponse),
        (status = 502, description = "Control call failed", body = ErrorResponse)
    ),
    tag = "logs"
)]
pub async fn instance_logs_for_day(
    State(state): State<AppState>,
    Path((prefix, date)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let day = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|_| ErrorResponse::new("invalid_date").into_response(StatusCode::BAD_REQUEST))?;
    let client = client_for(&state, &prefix).await?;
    client
        .logs_for_day(day)
        .await
        .map(Json)
        .map_err(|e| instance_error(&prefix, e))
}

/// GET /v1/instances/{prefix}/logs-static?fileName= - Contents of one log file
#[utoipa::path(
    get,
    path = "/v1/instances/{prefix}/logs-static",
    params(
        ("prefix" = String, Path, description = "Identity prefix"),
        LogFileQuery
    ),
    responses(
        (status = 200, description = "File contents", body = String, content_type = "text/plain"),
        (status = 400, description = "Invalid file name", body = ErrorResponse),
        (status = 404, description = "Instance or file not found", body = ErrorResponse),
        (status = 502, description = "Control call failed", body = ErrorResponse)
    ),
    tag = "logs"
)]
pub async fn instance_log_file(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
    Query(query): Query<LogFileQuery>,
) -> Result<String, ApiError> {
    let client = client_for(&state, &prefix).await?;
    client
        .log_file(&query.file_name)
        .await
        .map_err(|e| instance_error(&prefix, e))
}
