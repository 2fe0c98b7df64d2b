// Read-only access to this instance's logs
//
// /logs and /logs-static serve the daily files written by the telemetry file
// layer; /logs/:date serves the sync error rows persisted by this instance.

use std::path::{Component, Path as FsPath};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use calsync_core::{telemetry::is_log_file_name, LogRecord};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use super::{ControlAuth, ControlState, ErrorResponse};

type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticQuery {
    pub file_name: Option<String>,
}

pub(super) fn routes(state: ControlState) -> Router {
    Router::new()
        .route("/logs", get(list_files))
        .route("/logs/:date", get(logs_for_date))
        .route("/logs-static", get(read_file))
        .with_state(state)
}

fn internal(e: impl std::fmt::Display) -> ApiError {
    error!(error = %e, "Log access failed");
    ErrorResponse::new("internal_error").into_response(StatusCode::INTERNAL_SERVER_ERROR)
}

/// A bare file name inside the log directory.
fn is_plain_file_name(name: &str) -> bool {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
        return false;
    }
    let mut components = FsPath::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// GET /logs
async fn list_files(
    _: ControlAuth,
    State(state): State<ControlState>,
) -> Result<Json<ListResponse<String>>, ApiError> {
    let mut names = Vec::new();
    let mut entries = match tokio::fs::read_dir(&state.log_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Json(ListResponse { data: names }));
        }
        Err(e) => return Err(internal(e)),
    };

    while let Some(entry) = entries.next_entry().await.map_err(internal)? {
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        match entry.file_name().to_str() {
            Some(name) if is_file && is_log_file_name(name) => names.push(name.to_string()),
            _ => {}
        }
    }
    names.sort();
    Ok(Json(ListResponse { data: names }))
}

/// GET /logs/:date - persisted sync errors from one UTC day
async fn logs_for_date(
    _: ControlAuth,
    State(state): State<ControlState>,
    Path(date): Path<String>,
) -> Result<Json<ListResponse<LogRecord>>, ApiError> {
    let day = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|_| ErrorResponse::new("invalid_date").into_response(StatusCode::BAD_REQUEST))?;

    let records = state
        .store
        .logs_for_day(state.instance.prefix(), day)
        .await
        .map_err(internal)?;
    Ok(Json(ListResponse { data: records }))
}

/// GET /logs-static?fileName=
async fn read_file(
    _: ControlAuth,
    State(state): State<ControlState>,
    Query(query): Query<StaticQuery>,
) -> Result<String, ApiError> {
    let name = query.file_name.unwrap_or_default();
    if !is_plain_file_name(&name) {
        warn!(file_name = %name, "Rejected log file name");
        return Err(ErrorResponse::new("invalid_file_name").into_response(StatusCode::BAD_REQUEST));
    }

    match tokio::fs::read_to_string(state.log_dir.join(&name)).await {
        Ok(contents) => Ok(contents),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ErrorResponse::new("file_not_found").into_response(StatusCode::NOT_FOUND))
        }
        Err(e) => Err(internal(e)),
    }
}
