//! Offer ingestion and the acquire / claim / launch handshake.
//!
//! `POST /offers` and `/offers/rescind` are inbound from the cluster
//! manager; the rest serve the job manager's placement driver.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use tracing::{info, warn};

use armada_api::rpc::{
    AcquireHostOffersRequest, AcquireHostOffersResponse, AddOffersRequest,
    KillAndReserveTasksRequest, KillTasksRequest, LaunchTasksRequest, ReleaseHostOffersRequest,
    RescindOfferRequest, ShutdownExecutorsRequest,
};
use armada_id::TaskId;

use crate::api::error::ApiError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(add_offers))
        .route("/rescind", post(rescind_offer))
        .route("/acquire", post(acquire_host_offers))
        .route("/release", post(release_host_offers))
        .route("/launch", post(launch_tasks))
        .route("/kill", post(kill_tasks))
        .route("/kill-reserve", post(kill_and_reserve_tasks))
        .route("/shutdown-executors", post(shutdown_executors))
}

async fn add_offers(
    State(state): State<AppState>,
    Json(request): Json<AddOffersRequest>,
) -> Result<impl IntoResponse, ApiError> {
    for offer in &request.offers {
        if offer.hostname.is_empty() {
            return Err(ApiError::bad_request(
                "InvalidOffers",
                "offer with empty hostname",
            ));
        }
        if offer.agent_id.is_empty() {
            return Err(ApiError::bad_request(
                "InvalidOffers",
                "offer with empty agent id",
            ));
        }
    }
    state.pool().add_offers(request.offers, Utc::now());
    Ok(StatusCode::NO_CONTENT)
}

async fn rescind_offer(
    State(state): State<AppState>,
    Json(request): Json<RescindOfferRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.pool().rescind_offer(&request.offer_id, "rescinded");
    Ok(StatusCode::NO_CONTENT)
}

async fn acquire_host_offers(
    State(state): State<AppState>,
    Json(request): Json<AcquireHostOffersRequest>,
) -> Result<Json<AcquireHostOffersResponse>, ApiError> {
    let (host_offers, filter_result_counts) = state
        .pool()
        .acquire_host_offers(&request.filter, Utc::now())?;
    Ok(Json(AcquireHostOffersResponse {
        host_offers,
        filter_result_counts,
    }))
}

async fn release_host_offers(
    State(state): State<AppState>,
    Json(request): Json<ReleaseHostOffersRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.host_offers.is_empty() {
        return Err(ApiError::bad_request("InvalidOffers", "empty host offer list"));
    }
    state.pool().release_host_offers(&request.host_offers);
    Ok(StatusCode::NO_CONTENT)
}

/// Claims the placing session and forwards the launch to the cluster
/// manager. The claimed offers are consumed either way; a launch rejection
/// is surfaced to the caller for retry on a fresh acquire.
async fn launch_tasks(
    State(state): State<AppState>,
    Json(request): Json<LaunchTasksRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.hostname.is_empty() {
        return Err(ApiError::bad_request("InvalidArgument", "empty hostname"));
    }
    if request.tasks.is_empty() {
        return Err(ApiError::bad_request("InvalidArgument", "empty task list"));
    }

    let task_ids: Vec<TaskId> = request.tasks.iter().map(|t| t.run_id.task_id).collect();
    let consumed =
        state
            .pool()
            .claim_for_launch(&request.hostname, request.host_offer_id, &task_ids)?;

    info!(
        hostname = %request.hostname,
        tasks = request.tasks.len(),
        offers_consumed = consumed.len(),
        "Launching tasks"
    );

    state
        .cluster()
        .launch_tasks(&request.hostname, request.host_offer_id, &request.tasks)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn kill_tasks(
    State(state): State<AppState>,
    Json(request): Json<KillTasksRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.run_ids.is_empty() {
        return Err(ApiError::bad_request("InvalidArgument", "empty task list"));
    }
    state.cluster().kill_tasks(&request.run_ids).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Kills runs while keeping their hosts held for the replacement runs.
async fn kill_and_reserve_tasks(
    State(state): State<AppState>,
    Json(request): Json<KillAndReserveTasksRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.entries.is_empty() {
        return Err(ApiError::bad_request("InvalidArgument", "empty task list"));
    }

    let now = Utc::now();
    for entry in &request.entries {
        if let Err(error) = state
            .pool()
            .hold_for_tasks(&entry.hostname, &[entry.task_id], now)
        {
            warn!(
                hostname = %entry.hostname,
                task_id = %entry.task_id,
                %error,
                "Failed to hold host for kill-and-reserve"
            );
        }
    }

    let run_ids: Vec<_> = request.entries.iter().map(|e| e.run_id).collect();
    if let Err(error) = state.cluster().kill_tasks(&run_ids).await {
        // The kill failed; do not keep holds for runs that are still alive.
        for entry in &request.entries {
            let _ = state.pool().release_hold_for_task(&entry.task_id);
        }
        return Err(error.into());
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn shutdown_executors(
    State(state): State<AppState>,
    Json(request): Json<ShutdownExecutorsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.entries.is_empty() {
        return Err(ApiError::bad_request("InvalidArgument", "empty executor list"));
    }
    for entry in &request.entries {
        if entry.agent_id.is_empty() {
            return Err(ApiError::bad_request("InvalidArgument", "empty agent id"));
        }
    }
    state.cluster().shutdown_executors(&request.entries).await?;
    Ok(StatusCode::NO_CONTENT)
}
