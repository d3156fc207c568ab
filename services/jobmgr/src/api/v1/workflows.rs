//! Workflow pause / resume / abort endpoints.

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use tracing::info;

use armada_api::rpc::WorkflowOpResponse;
use armada_api::WorkflowStatus;
use armada_id::WorkflowId;

use crate::api::error::ApiError;
use crate::state::AppState;
use crate::storage::WorkflowRecord;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/{workflow_id}/pause", post(pause_workflow))
        .route("/{workflow_id}/resume", post(resume_workflow))
        .route("/{workflow_id}/abort", post(abort_workflow))
}

fn parse_workflow_id(raw: &str) -> Result<WorkflowId, ApiError> {
    WorkflowId::parse(raw).map_err(|e| ApiError::bad_request("InvalidWorkflowId", e.to_string()))
}

fn status(record: &WorkflowRecord) -> WorkflowStatus {
    let operated = record.completed.len() + record.failed.len();
    WorkflowStatus {
        workflow_id: record.id,
        kind: record.kind,
        state: record.state,
        num_instances_completed: record.completed.len() as u32,
        num_instances_failed: record.failed.len() as u32,
        num_instances_remaining: record.instances.len().saturating_sub(operated) as u32,
        target_version: record.target_version,
        prev_version: record.prev_version,
    }
}

async fn pause_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<WorkflowOpResponse>, ApiError> {
    let workflow_id = parse_workflow_id(&workflow_id)?;
    let record = state.workflow_controller().pause(workflow_id).await?;
    info!(%workflow_id, "Workflow paused");
    Ok(Json(WorkflowOpResponse {
        workflow_status: status(&record),
    }))
}

async fn resume_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<WorkflowOpResponse>, ApiError> {
    let workflow_id = parse_workflow_id(&workflow_id)?;
    let record = state.workflow_controller().resume(workflow_id).await?;
    state
        .driver()
        .enqueue_workflow(workflow_id, std::time::Duration::from_millis(10));
    info!(%workflow_id, "Workflow resumed");
    Ok(Json(WorkflowOpResponse {
        workflow_status: status(&record),
    }))
}

async fn abort_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<WorkflowOpResponse>, ApiError> {
    let workflow_id = parse_workflow_id(&workflow_id)?;
    let record = state.workflow_controller().abort(workflow_id).await?;
    info!(%workflow_id, "Workflow aborted");
    Ok(Json(WorkflowOpResponse {
        workflow_status: status(&record),
    }))
}
