//! Task status event ingestion from the cluster manager.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use tracing::{debug, info, warn};

use armada_api::rpc::TaskStatusEvent;
use armada_api::TaskState;

use crate::api::error::ApiError;
use crate::cache::UpdateMode;
use crate::goalstate::kill_orphan_task;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/status", post(task_status))
}

/// Applies one observed status event to the cache, or kills the orphan run
/// when nothing tracks it anymore.
async fn task_status(
    State(state): State<AppState>,
    Json(event): Json<TaskStatusEvent>,
) -> Result<impl IntoResponse, ApiError> {
    let task_id = event.run_id.task_id;

    let job = state.cache().get_job(task_id.job_id).await;
    let tracked = match &job {
        Some(job) => match job.get_task(task_id.instance).await {
            Some(task) => task.runtime(),
            None => None,
        },
        None => None,
    };

    let Some(mut runtime) = tracked else {
        info!(run_id = %event.run_id, state = %event.state, "Status event for untracked run");
        kill_orphan_task(
            state.hosts(),
            event.run_id,
            event.state,
            event.agent_id.as_deref(),
            false,
        )
        .await
        .map_err(|e| ApiError::unavailable("KillFailure", e.to_string()))?;
        return Ok(StatusCode::NO_CONTENT);
    };
    let job = job.expect("tracked runtime implies cached job");

    // A stale event for a previous run attempt: the current run is
    // unaffected, but a still-live old run must die.
    if runtime.run_id != Some(event.run_id) {
        debug!(
            run_id = %event.run_id,
            current = ?runtime.run_id,
            "Stale status event for a prior run"
        );
        if !event.state.is_terminal() {
            let has_volume = {
                let (_, spec) = job.get_config().await?;
                spec.task_config(task_id.instance).volume.is_some()
            };
            kill_orphan_task(
                state.hosts(),
                event.run_id,
                event.state,
                event.agent_id.as_deref(),
                has_volume,
            )
            .await
            .map_err(|e| ApiError::unavailable("KillFailure", e.to_string()))?;
        }
        return Ok(StatusCode::NO_CONTENT);
    }

    // Terminal states never regress.
    if runtime.state.is_terminal() && !event.state.is_terminal() {
        warn!(
            run_id = %event.run_id,
            current = %runtime.state,
            event_state = %event.state,
            "Dropping regressive status event"
        );
        return Ok(StatusCode::NO_CONTENT);
    }

    runtime.state = event.state;
    if let Some(healthy) = event.healthy {
        runtime.healthy = healthy;
    }
    if event.message.is_some() {
        runtime.message = event.message.clone();
    }
    if event.state == TaskState::Running && runtime.start_time.is_none() {
        runtime.start_time = Some(event.timestamp);
    }
    if event.state.is_terminal() {
        runtime.completion_time = Some(event.timestamp);
        if matches!(event.state, TaskState::Failed | TaskState::Lost) {
            runtime.failure_count = runtime.failure_count.saturating_add(1);
        }
    }

    job.update_task_runtime(task_id.instance, runtime, UpdateMode::CacheAndDb, Utc::now())
        .await?;

    let delay = std::time::Duration::from_millis(10);
    state.driver().enqueue_task(task_id, delay);
    state.driver().enqueue_job(task_id.job_id, delay);

    Ok(StatusCode::NO_CONTENT)
}
