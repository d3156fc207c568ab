//! Host query, hold management, reservation, and maintenance endpoints.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use armada_api::rpc::{
    GetHostsByQueryRequest, GetHostsByQueryResponse, HostMaintenanceRequest, QueryHostsRequest,
    QueryHostsResponse, ReserveHostRequest,
};
use armada_id::TaskId;

use crate::api::error::ApiError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(query_hosts_default))
        .route("/query", post(query_hosts))
        .route("/by-resource", post(get_hosts_by_query))
        .route("/hold", post(hold_for_tasks))
        .route("/release-hold", post(release_hold))
        .route("/reserve", post(reserve_host))
        .route("/maintenance/start", post(start_maintenance))
        .route("/maintenance/complete", post(complete_maintenance))
}

async fn query_hosts_default(State(state): State<AppState>) -> Json<QueryHostsResponse> {
    let (hosts, draining) = state.pool().query_hosts(&[]);
    Json(QueryHostsResponse { hosts, draining })
}

async fn query_hosts(
    State(state): State<AppState>,
    Json(request): Json<QueryHostsRequest>,
) -> Json<QueryHostsResponse> {
    let (hosts, draining) = state.pool().query_hosts(&request.statuses);
    Json(QueryHostsResponse { hosts, draining })
}

async fn get_hosts_by_query(
    State(state): State<AppState>,
    Json(request): Json<GetHostsByQueryRequest>,
) -> Json<GetHostsByQueryResponse> {
    let hosts = state.pool().get_hosts_by_query(&request.query);
    Json(GetHostsByQueryResponse { hosts })
}

#[derive(Debug, Deserialize)]
struct HoldRequest {
    hostname: String,
    task_ids: Vec<TaskId>,
}

async fn hold_for_tasks(
    State(state): State<AppState>,
    Json(request): Json<HoldRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.hostname.is_empty() {
        return Err(ApiError::bad_request("InvalidArgument", "empty hostname"));
    }
    if request.task_ids.is_empty() {
        return Err(ApiError::bad_request("InvalidArgument", "empty task list"));
    }
    state
        .pool()
        .hold_for_tasks(&request.hostname, &request.task_ids, Utc::now())?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ReleaseHoldRequest {
    task_id: TaskId,
}

async fn release_hold(
    State(state): State<AppState>,
    Json(request): Json<ReleaseHoldRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.pool().release_hold_for_task(&request.task_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Reserves a host's offers for a stateful task: the cluster-manager
/// reserve/create-volume call plus the local Reserved transition.
async fn reserve_host(
    State(state): State<AppState>,
    Json(request): Json<ReserveHostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.hostname.is_empty() {
        return Err(ApiError::bad_request("InvalidArgument", "empty hostname"));
    }

    state.cluster().reserve_resources(&request).await?;

    let summary = state
        .pool()
        .summary(&request.hostname)
        .ok_or_else(|| ApiError::not_found("UnknownHost", request.hostname.clone()))?;
    summary
        .mark_reserved()
        .map_err(|e| ApiError::conflict("InvalidHostStatus", e.to_string()))?;

    info!(hostname = %request.hostname, task_id = %request.task_id, "Host reserved");
    Ok(StatusCode::NO_CONTENT)
}

async fn start_maintenance(
    State(state): State<AppState>,
    Json(request): Json<HostMaintenanceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.hostnames.is_empty() || request.hostnames.iter().any(String::is_empty) {
        return Err(ApiError::bad_request("InvalidArgument", "empty hostname"));
    }
    state.pool().start_maintenance(&request.hostnames);
    Ok(StatusCode::NO_CONTENT)
}

async fn complete_maintenance(
    State(state): State<AppState>,
    Json(request): Json<HostMaintenanceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.hostnames.is_empty() || request.hostnames.iter().any(String::is_empty) {
        return Err(ApiError::bad_request("InvalidArgument", "empty hostname"));
    }
    state.pool().complete_maintenance(&request.hostnames);
    Ok(StatusCode::NO_CONTENT)
}
