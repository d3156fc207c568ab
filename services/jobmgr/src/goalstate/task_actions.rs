//! Task entity actions.

use std::sync::Arc;

use armada_api::{HealthState, JobSpec, JobType, TaskRuntime, TaskState};
use armada_id::{RunId, TaskId};
use chrono::Utc;
use tracing::{debug, info, warn};

use super::engine::{ActionError, ActionOutcome};
use super::Driver;
use crate::cache::UpdateMode;
use crate::hostclient::HostManagerClient;

/// What a task entity should do for a `(current, goal)` state pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskAction {
    /// Waiting on placement or on the cluster manager; steady requeue.
    NoOp,
    /// Issue a kill for the current run.
    Kill,
    /// Start a fresh run (service restart, retry, or config rollout).
    Restart,
    /// Terminal and at its goal; leave the queue.
    Untrack,
}

/// The `(current, goal)` action table for task entities.
///
/// `needs_new_run` is true when the task's config version lags its desired
/// version; `retries_left` gates batch retries.
pub fn task_action_table(
    current: TaskState,
    goal: TaskState,
    job_type: JobType,
    needs_new_run: bool,
    retries_left: bool,
) -> TaskAction {
    match goal {
        TaskState::Killed | TaskState::Deleted => {
            if current.is_terminal() {
                TaskAction::Untrack
            } else if current == TaskState::Killing {
                TaskAction::NoOp
            } else {
                TaskAction::Kill
            }
        }
        TaskState::Running | TaskState::Succeeded => {
            if !current.is_terminal() {
                // A running task that must move config versions is stopped
                // first; the terminal transition triggers the new run.
                if needs_new_run && current == TaskState::Running {
                    TaskAction::Kill
                } else {
                    TaskAction::NoOp
                }
            } else if needs_new_run {
                TaskAction::Restart
            } else {
                match (job_type, current) {
                    // Service instances are kept up.
                    (JobType::Service, TaskState::Failed)
                    | (JobType::Service, TaskState::Lost) => TaskAction::Restart,
                    (JobType::Service, TaskState::Killed) if goal == TaskState::Running => {
                        TaskAction::Restart
                    }
                    // Batch instances retry failures within budget.
                    (JobType::Batch, TaskState::Failed) | (JobType::Batch, TaskState::Lost) => {
                        if retries_left {
                            TaskAction::Restart
                        } else {
                            TaskAction::Untrack
                        }
                    }
                    _ => TaskAction::Untrack,
                }
            }
        }
        _ => TaskAction::NoOp,
    }
}

pub(super) async fn run_task_entity(
    driver: &Arc<Driver>,
    task_id: TaskId,
) -> Result<ActionOutcome, ActionError> {
    let Some(job) = driver.cache.get_job(task_id.job_id).await else {
        debug!(%task_id, "Job not in cache, dropping task entity");
        return Ok(ActionOutcome::Done);
    };
    let Some(task) = job.get_task(task_id.instance).await else {
        debug!(%task_id, "Task not in cache, dropping entity");
        return Ok(ActionOutcome::Done);
    };
    let Some(runtime) = task.runtime() else {
        return Ok(ActionOutcome::Requeue(driver.config.progress_delay));
    };

    let job_type = job
        .job_type()
        .await
        .map_err(|e| ActionError::Transient(e.to_string()))?;
    let needs_new_run = runtime.config_version != runtime.desired_config_version;
    let retries_left = runtime.failure_count < driver.config.max_task_retries;

    let action = task_action_table(
        runtime.state,
        runtime.goal_state,
        job_type,
        needs_new_run,
        retries_left,
    );
    debug!(%task_id, state = %runtime.state, goal = %runtime.goal_state, ?action, "Running task action");

    match action {
        TaskAction::NoOp => Ok(ActionOutcome::Requeue(driver.config.steady_state_delay)),
        TaskAction::Kill => kill_task(driver, &job, task_id, runtime).await,
        TaskAction::Restart => restart_task(driver, &job, task_id, runtime).await,
        TaskAction::Untrack => Ok(ActionOutcome::Done),
    }
}

async fn kill_task(
    driver: &Arc<Driver>,
    job: &Arc<crate::cache::CachedJob>,
    task_id: TaskId,
    mut runtime: TaskRuntime,
) -> Result<ActionOutcome, ActionError> {
    let now = Utc::now();
    match runtime.run_id {
        Some(run_id) => {
            driver
                .hosts
                .kill_tasks(&[run_id])
                .await
                .map_err(|e| ActionError::Transient(e.to_string()))?;
            runtime.state = TaskState::Killing;
        }
        None => {
            // Never launched; it terminates immediately.
            runtime.state = TaskState::Killed;
            runtime.completion_time = Some(now);
        }
    }
    job.update_task_runtime(task_id.instance, runtime, UpdateMode::CacheAndDb, now)
        .await
        .map_err(|e| ActionError::Transient(e.to_string()))?;
    driver.enqueue_job(task_id.job_id, driver.config.progress_delay);
    Ok(ActionOutcome::Requeue(driver.config.steady_state_delay))
}

async fn restart_task(
    driver: &Arc<Driver>,
    job: &Arc<crate::cache::CachedJob>,
    task_id: TaskId,
    runtime: TaskRuntime,
) -> Result<ActionOutcome, ActionError> {
    let now = Utc::now();
    let next_run = runtime
        .run_id
        .map(|run| run.next())
        .unwrap_or_else(|| RunId::initial(task_id));

    let failed = matches!(runtime.state, TaskState::Failed | TaskState::Lost);
    let target_version = runtime.desired_config_version;

    let mut fresh = TaskRuntime {
        state: TaskState::Initialized,
        goal_state: runtime.goal_state,
        run_id: Some(next_run),
        host: None,
        config_version: target_version,
        desired_config_version: target_version,
        healthy: runtime.healthy,
        start_time: None,
        completion_time: None,
        failure_count: runtime.failure_count,
        message: None,
    };
    // Failure counting happens at status-event ingestion; a restart after
    // failure carries the count forward, a clean restart resets it.
    if !failed {
        fresh.failure_count = 0;
    }

    info!(%task_id, run_id = %next_run, config_version = target_version, "Restarting task");
    job.update_task_runtime(task_id.instance, fresh, UpdateMode::CacheAndDb, now)
        .await
        .map_err(|e| ActionError::Transient(e.to_string()))?;
    driver.enqueue_job(task_id.job_id, driver.config.progress_delay);
    Ok(ActionOutcome::Requeue(driver.config.steady_state_delay))
}

/// The runtime written for a brand-new instance record.
///
/// The default goal state follows the job type: service instances converge
/// to RUNNING, batch instances to SUCCEEDED.
pub fn initializing_task_runtime(spec: &JobSpec, config_version: u64) -> TaskRuntime {
    let goal_state = match spec.job_type {
        JobType::Service => TaskState::Running,
        JobType::Batch => TaskState::Succeeded,
    };
    TaskRuntime {
        state: TaskState::Initialized,
        goal_state,
        run_id: None,
        host: None,
        config_version,
        desired_config_version: config_version,
        healthy: HealthState::Disabled,
        start_time: None,
        completion_time: None,
        failure_count: 0,
        message: None,
    }
}

/// Kills a run the cache no longer tracks.
///
/// Stateful orphans (tasks owning a persistent volume) are left alone; a
/// KILLING orphan gets its executor shut down instead of a plain kill.
pub async fn kill_orphan_task(
    hosts: &Arc<dyn HostManagerClient>,
    run_id: RunId,
    state: TaskState,
    agent_id: Option<&str>,
    has_volume: bool,
) -> Result<(), ActionError> {
    if has_volume {
        debug!(%run_id, "Skipping orphan kill for stateful task");
        return Ok(());
    }
    if state.is_terminal() {
        return Ok(());
    }

    let result = if state == TaskState::Killing {
        let Some(agent_id) = agent_id else {
            warn!(%run_id, "Orphan in KILLING state without agent id, falling back to kill");
            return hosts
                .kill_tasks(&[run_id])
                .await
                .map_err(|e| ActionError::Transient(e.to_string()));
        };
        hosts
            .shutdown_executors(&[armada_api::rpc::ShutdownExecutorEntry {
                executor_id: run_id.to_string(),
                agent_id: agent_id.to_string(),
            }])
            .await
    } else {
        hosts.kill_tasks(&[run_id]).await
    };

    result.map_err(|e| {
        warn!(%run_id, error = %e, "Failed to kill orphan task");
        ActionError::Transient(e.to_string())
    })
}
