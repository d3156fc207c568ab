//! Job lifecycle endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tracing::info;

use armada_api::rpc::{
    CreateJobRequest, CreateJobResponse, GetJobResponse, GetTaskResponse, JobVersionResponse,
    ListJobsResponse, QueryJobsRequest, QueryJobsResponse, RestartJobRequest, RestartJobResponse,
    UpdateJobRequest, UpdateJobResponse,
};
use armada_api::{
    JobSpec, JobState, JobStatus, JobSummary, JobType, WorkflowKind, WorkflowStatus,
};
use armada_id::{JobId, TaskId};

use crate::api::error::ApiError;
use crate::cache::UpdateMode;
use crate::state::AppState;
use crate::storage::{JobRuntime, WorkflowRecord};
use crate::workflow::new_workflow_record;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_job).get(list_jobs))
        .route("/query", post(query_jobs))
        .route("/{job_id}", get(get_job).put(update_job).delete(delete_job))
        .route("/{job_id}/start", post(start_job))
        .route("/{job_id}/stop", post(stop_job))
        .route("/{job_id}/restart", post(restart_job))
        .route("/{job_id}/tasks/{instance}", get(get_task))
}

fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    JobId::parse(raw).map_err(|e| ApiError::bad_request("InvalidJobId", e.to_string()))
}

fn validate_spec(spec: &JobSpec) -> Result<(), ApiError> {
    if spec.name.is_empty() {
        return Err(ApiError::bad_request("InvalidSpec", "job name is empty"));
    }
    if spec.default_config.resource.is_zero() && spec.instance_count > 0 {
        return Err(ApiError::bad_request(
            "InvalidSpec",
            "default task config requests no resources",
        ));
    }
    Ok(())
}

fn default_goal_state(job_type: JobType) -> JobState {
    match job_type {
        JobType::Service => JobState::Running,
        JobType::Batch => JobState::Succeeded,
    }
}

async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<CreateJobResponse>), ApiError> {
    validate_spec(&request.spec)?;

    let job_id = JobId::new();
    let goal_state = default_goal_state(request.spec.job_type);
    let runtime = JobRuntime::initial(goal_state, 1, Utc::now());

    let job = state.cache().add_job(job_id).await;
    job.create(1, request.spec, runtime).await?;
    state.store().add_active_job(job_id).await?;
    state
        .driver()
        .enqueue_job(job_id, std::time::Duration::from_millis(10));

    info!(%job_id, "Job created");
    Ok((StatusCode::CREATED, Json(CreateJobResponse { job_id })))
}

async fn job_summary(state: &AppState, job_id: JobId) -> Result<JobSummary, ApiError> {
    let job = state.cache().add_job(job_id).await;
    let runtime = job.get_runtime().await?;
    let (_, spec) = job.get_config().await?;
    Ok(JobSummary {
        id: job_id,
        name: spec.name,
        owner: spec.owner,
        job_type: spec.job_type,
        state: runtime.state,
        instance_count: spec.instance_count,
    })
}

async fn list_jobs(State(state): State<AppState>) -> Result<Json<ListJobsResponse>, ApiError> {
    let mut jobs = Vec::new();
    for job_id in state.store().list_jobs().await? {
        if let Ok(summary) = job_summary(&state, job_id).await {
            jobs.push(summary);
        }
    }
    Ok(Json(ListJobsResponse { jobs }))
}

async fn query_jobs(
    State(state): State<AppState>,
    Json(request): Json<QueryJobsRequest>,
) -> Result<Json<QueryJobsResponse>, ApiError> {
    let mut jobs = Vec::new();
    for job_id in state.store().list_jobs().await? {
        let Ok(summary) = job_summary(&state, job_id).await else {
            continue;
        };
        if !request.states.is_empty() && !request.states.contains(&summary.state) {
            continue;
        }
        if let Some(owner) = &request.owner {
            if &summary.owner != owner {
                continue;
            }
        }
        if let Some(fragment) = &request.name_contains {
            if !summary.name.contains(fragment.as_str()) {
                continue;
            }
        }
        jobs.push(summary);
    }
    Ok(Json(QueryJobsResponse { jobs }))
}

fn workflow_status(record: &WorkflowRecord) -> WorkflowStatus {
    let operated = record.completed.len() + record.failed.len();
    let remaining = record.instances.len().saturating_sub(operated) as u32;
    WorkflowStatus {
        workflow_id: record.id,
        kind: record.kind,
        state: record.state,
        num_instances_completed: record.completed.len() as u32,
        num_instances_failed: record.failed.len() as u32,
        num_instances_remaining: remaining,
        target_version: record.target_version,
        prev_version: record.prev_version,
    }
}

async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<GetJobResponse>, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let job = state.cache().add_job(job_id).await;
    let runtime = job.get_runtime().await?;
    let (version, spec) = job.get_config().await?;

    let workflow_status = match runtime.workflow_id {
        Some(workflow_id) => state
            .store()
            .get_workflow(workflow_id)
            .await?
            .map(|record| workflow_status(&record)),
        None => None,
    };

    Ok(Json(GetJobResponse {
        job_id,
        spec,
        status: JobStatus {
            state: runtime.state,
            goal_state: runtime.goal_state,
            version: runtime.revision,
            config_version: version,
            task_stats: runtime.task_stats,
            creation_time: Some(runtime.creation_time),
            start_time: runtime.start_time,
            completion_time: runtime.completion_time,
            workflow_status,
        },
    }))
}

/// Changes only the goal state; the goal-state engine does the rest.
async fn set_goal_state(state: &AppState, job_id: JobId, goal: JobState) -> Result<u64, ApiError> {
    let job = state.cache().add_job(job_id).await;
    let mut runtime = job.get_runtime().await?;
    if runtime.goal_state != goal {
        runtime.goal_state = goal;
        runtime = job.update_runtime(runtime, UpdateMode::CacheAndDb).await?;
    }
    state.store().add_active_job(job_id).await?;
    state
        .driver()
        .enqueue_job(job_id, std::time::Duration::from_millis(10));
    Ok(runtime.revision)
}

async fn start_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobVersionResponse>, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let job = state.cache().add_job(job_id).await;
    let goal = default_goal_state(job.job_type().await?);
    let version = set_goal_state(&state, job_id, goal).await?;
    Ok(Json(JobVersionResponse { version }))
}

async fn stop_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobVersionResponse>, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let version = set_goal_state(&state, job_id, JobState::Killed).await?;
    Ok(Json(JobVersionResponse { version }))
}

async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    set_goal_state(&state, job_id, JobState::Deleted).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Starts an update workflow moving the job to a new config version.
async fn update_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(request): Json<UpdateJobRequest>,
) -> Result<Json<UpdateJobResponse>, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    validate_spec(&request.spec)?;

    let job = state.cache().add_job(job_id).await;
    let mut runtime = job.get_runtime().await?;

    if let Some(existing) = runtime.workflow_id {
        if let Some(record) = state.store().get_workflow(existing).await? {
            if record.state.is_active() {
                return Err(ApiError::conflict(
                    "WorkflowInProgress",
                    format!("workflow {existing} is still active"),
                ));
            }
        }
    }

    let prev_version = runtime.config_version;
    let new_version = prev_version + 1;
    let instance_count = request.spec.instance_count;
    job.add_config_version(new_version, request.spec).await?;

    let record = new_workflow_record(
        job_id,
        WorkflowKind::Update,
        request.workflow,
        new_version,
        prev_version,
        (0..instance_count).collect(),
    );
    state.store().put_workflow(&record).await?;

    runtime.workflow_id = Some(record.id);
    runtime.config_version = new_version;
    job.update_runtime(runtime, UpdateMode::CacheAndDb).await?;

    state
        .driver()
        .enqueue_workflow(record.id, std::time::Duration::from_millis(10));
    state
        .driver()
        .enqueue_job(job_id, std::time::Duration::from_millis(10));

    info!(%job_id, workflow_id = %record.id, config_version = new_version, "Update workflow started");
    Ok(Json(UpdateJobResponse {
        workflow_id: record.id,
        config_version: new_version,
    }))
}

/// Starts a restart workflow over the requested instance ranges.
async fn restart_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(request): Json<RestartJobRequest>,
) -> Result<Json<RestartJobResponse>, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let job = state.cache().add_job(job_id).await;
    let mut runtime = job.get_runtime().await?;
    let (version, spec) = job.get_config().await?;

    if let Some(existing) = runtime.workflow_id {
        if let Some(record) = state.store().get_workflow(existing).await? {
            if record.state.is_active() {
                return Err(ApiError::conflict(
                    "WorkflowInProgress",
                    format!("workflow {existing} is still active"),
                ));
            }
        }
    }

    let instances: Vec<u32> = if request.instance_ranges.is_empty() {
        (0..spec.instance_count).collect()
    } else {
        request
            .instance_ranges
            .iter()
            .flat_map(|range| range.from..range.to.min(spec.instance_count))
            .collect()
    };
    if instances.is_empty() {
        return Err(ApiError::bad_request("InvalidArgument", "empty instance range"));
    }

    let record = new_workflow_record(
        job_id,
        WorkflowKind::Restart,
        request.workflow,
        version,
        version,
        instances,
    );
    state.store().put_workflow(&record).await?;

    runtime.workflow_id = Some(record.id);
    job.update_runtime(runtime, UpdateMode::CacheAndDb).await?;
    state
        .driver()
        .enqueue_workflow(record.id, std::time::Duration::from_millis(10));

    info!(%job_id, workflow_id = %record.id, "Restart workflow started");
    Ok(Json(RestartJobResponse {
        workflow_id: record.id,
    }))
}

async fn get_task(
    State(state): State<AppState>,
    Path((job_id, instance)): Path<(String, u32)>,
) -> Result<Json<GetTaskResponse>, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let task_id = TaskId::new(job_id, instance);

    if let Some(job) = state.cache().get_job(job_id).await {
        if let Some(task) = job.get_task(instance).await {
            if let Some(runtime) = task.runtime() {
                return Ok(Json(GetTaskResponse { task_id, runtime }));
            }
        }
    }
    let runtime = state
        .store()
        .get_task_runtime(task_id)
        .await?
        .ok_or_else(|| ApiError::not_found("TaskNotFound", task_id.to_string()))?;
    Ok(Json(GetTaskResponse { task_id, runtime }))
}
