// Fleet-wide liveness sweep

use axum::{extract::State, routing::get, Json, Router};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::common::{ApiError, ErrorResponse, ListResponse};
use super::AppState;
use crate::client::{InstanceClient, InstanceLiveness};

/// Liveness of one registered instance
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemberLiveness {
    pub identity_prefix: String,
    pub name: String,
    pub alive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liveness: Option<InstanceLiveness>,
    /// Why the instance did not answer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/fleet/liveness", get(fleet_liveness))
        .with_state(state)
}

/// GET /v1/fleet/liveness - Ask every registered instance whether it is alive
#[utoipa::path(
    get,
    path = "/v1/fleet/liveness",
    responses(
        (status = 200, description = "One entry per registered instance", body = ListResponse<MemberLiveness>),
        (status = 500, description = "Inventory unavailable", body = ErrorResponse)
    ),
    tag = "fleet"
)]
pub async fn fleet_liveness(
    State(state): State<AppState>,
) -> Result<Json<ListResponse<MemberLiveness>>, ApiError> {
    let instances = state.store.list().await.map_err(|e| {
        tracing::error!("Failed to list instances: {}", e);
        ErrorResponse::new("internal_error")
            .into_response(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
    })?;

    let checks = instances.iter().map(|instance| {
        let client = InstanceClient::with_http_client(instance, state.http.clone());
        async move {
            match client.liveness().await {
                Ok(liveness) => MemberLiveness {
                    identity_prefix: instance.identity_prefix.clone(),
                    name: instance.name.clone(),
                    alive: true,
                    liveness: Some(liveness),
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(prefix = %instance.identity_prefix, error = %e, "Instance not alive");
                    MemberLiveness {
                        identity_prefix: instance.identity_prefix.clone(),
                        name: instance.name.clone(),
                        alive: false,
                        liveness: None,
                        error: Some(e.to_string()),
                    }
                }
            }
        }
    });

    let members = join_all(checks).await;
    let alive = members.iter().filter(|m| m.alive).count();
    tracing::info!(total = members.len(), alive, "Fleet liveness sweep");
    Ok(Json(ListResponse::new(members)))
}
