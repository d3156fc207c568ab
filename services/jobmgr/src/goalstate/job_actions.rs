//! Job entity actions: the action table and the runtime updater.

use std::sync::Arc;

use armada_api::{JobSpec, JobState, JobType, TaskState, TaskStats};
use armada_id::{JobId, TaskId};
use chrono::Utc;
use tracing::{debug, info, warn};

use super::engine::{ActionError, ActionOutcome};
use super::task_actions;
use super::Driver;
use crate::cache::{CacheError, CachedJob, UpdateMode};
use crate::storage::JobRuntime;

/// What a job entity should do for a `(current, goal)` state pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    /// Nothing to do; requeue at the steady cadence.
    NoOp,
    /// Materialize missing instance records, then reconcile the runtime.
    CreateTasks,
    /// Reconcile the job runtime from task state counts.
    RuntimeUpdate,
    /// Drive every task toward KILLED.
    Kill,
    /// Terminal job reached its goal: retire it from active tracking.
    Untrack,
    /// Terminal job with goal DELETED: remove it entirely.
    Delete,
}

/// The `(current, goal)` action table for job entities.
pub fn job_action_table(current: JobState, goal: JobState) -> JobAction {
    match goal {
        JobState::Deleted => {
            if current.is_terminal() {
                JobAction::Delete
            } else if current == JobState::Killing {
                // Kills are in flight; reconcile until the tasks settle.
                JobAction::RuntimeUpdate
            } else {
                JobAction::Kill
            }
        }
        JobState::Killed => {
            if current.is_terminal() {
                JobAction::Untrack
            } else if current == JobState::Killing {
                JobAction::RuntimeUpdate
            } else {
                JobAction::Kill
            }
        }
        JobState::Running | JobState::Succeeded => match current {
            JobState::Initialized => JobAction::CreateTasks,
            JobState::Pending | JobState::Running | JobState::Killing => JobAction::RuntimeUpdate,
            _ if current.is_terminal() => JobAction::Untrack,
            _ => JobAction::RuntimeUpdate,
        },
        // Remaining goal states do not occur; reconcile as a fallback.
        _ => JobAction::RuntimeUpdate,
    }
}

pub(super) async fn run_job_entity(
    driver: &Arc<Driver>,
    job_id: JobId,
) -> Result<ActionOutcome, ActionError> {
    // An entity unknown to the cache is silently dropped.
    let Some(job) = driver.cache.get_job(job_id).await else {
        debug!(%job_id, "Job not in cache, dropping entity");
        return Ok(ActionOutcome::Done);
    };

    let runtime = job.get_runtime().await.map_err(map_cache_err)?;
    let action = job_action_table(runtime.state, runtime.goal_state);
    debug!(%job_id, state = %runtime.state, goal = %runtime.goal_state, ?action, "Running job action");

    match action {
        JobAction::NoOp => Ok(ActionOutcome::Requeue(driver.config.steady_state_delay)),
        JobAction::CreateTasks => {
            create_missing_tasks(driver, &job).await?;
            job_runtime_update(driver, &job).await
        }
        JobAction::RuntimeUpdate => job_runtime_update(driver, &job).await,
        JobAction::Kill => kill_job(driver, &job).await,
        JobAction::Untrack => untrack_job(driver, &job).await,
        JobAction::Delete => delete_job(driver, &job).await,
    }
}

fn map_cache_err(error: CacheError) -> ActionError {
    // Conflicts re-read and retry from scratch; backend errors back off.
    ActionError::Transient(error.to_string())
}

/// Creates instance records missing from the store for a freshly submitted
/// (or scaled-out) job, and enqueues them.
async fn create_missing_tasks(
    driver: &Arc<Driver>,
    job: &Arc<CachedJob>,
) -> Result<(), ActionError> {
    let (version, spec) = job.get_config().await.map_err(map_cache_err)?;
    let existing = job.all_tasks().await;
    let now = Utc::now();

    for instance in 0..spec.instance_count {
        if existing.contains_key(&instance) {
            continue;
        }
        let runtime = task_actions::initializing_task_runtime(&spec, version);
        job.update_task_runtime(instance, runtime, UpdateMode::CacheAndDb, now)
            .await
            .map_err(map_cache_err)?;
        driver.enqueue_task(TaskId::new(job.id(), instance), driver.config.progress_delay);
    }
    Ok(())
}

async fn kill_job(driver: &Arc<Driver>, job: &Arc<CachedJob>) -> Result<ActionOutcome, ActionError> {
    let tasks = job.all_tasks().await;
    let now = Utc::now();
    let mut run_ids = Vec::new();

    for (instance, task) in &tasks {
        let Some(mut runtime) = task.runtime() else {
            continue;
        };
        if runtime.state.is_terminal() || runtime.goal_state == TaskState::Killed {
            continue;
        }
        runtime.goal_state = TaskState::Killed;
        if let Some(run_id) = runtime.run_id {
            if !runtime.state.is_terminal() {
                run_ids.push(run_id);
            }
        }
        job.update_task_runtime(*instance, runtime, UpdateMode::CacheAndDb, now)
            .await
            .map_err(map_cache_err)?;
        driver.enqueue_task(TaskId::new(job.id(), *instance), driver.config.progress_delay);
    }

    if !run_ids.is_empty() {
        driver
            .hosts
            .kill_tasks(&run_ids)
            .await
            .map_err(|e| ActionError::Transient(e.to_string()))?;
    }

    let runtime = job.get_runtime().await.map_err(map_cache_err)?;
    if runtime.state != JobState::Killing && !runtime.state.is_terminal() {
        let mut updated = runtime;
        updated.state = JobState::Killing;
        job.update_runtime(updated, UpdateMode::CacheAndDb)
            .await
            .map_err(map_cache_err)?;
    }

    info!(job_id = %job.id(), killed_runs = run_ids.len(), "Kill issued for job");
    Ok(ActionOutcome::Requeue(driver.config.progress_delay))
}

/// Retires a terminal job from reconciliation. Batch jobs leave the active
/// set; terminal service jobs remain active so a restart can revive them.
async fn untrack_job(
    driver: &Arc<Driver>,
    job: &Arc<CachedJob>,
) -> Result<ActionOutcome, ActionError> {
    let job_type = job.job_type().await.map_err(map_cache_err)?;
    if job_type == JobType::Batch {
        driver
            .store
            .delete_active_job(job.id())
            .await
            .map_err(|e| ActionError::Transient(e.to_string()))?;
        driver.cache.remove_job(job.id()).await;
        info!(job_id = %job.id(), "Terminal batch job untracked");
    }
    Ok(ActionOutcome::Done)
}

async fn delete_job(
    driver: &Arc<Driver>,
    job: &Arc<CachedJob>,
) -> Result<ActionOutcome, ActionError> {
    let (_, spec) = job.get_config().await.map_err(map_cache_err)?;
    driver
        .store
        .delete_job(job.id())
        .await
        .map_err(|e| ActionError::Transient(e.to_string()))?;
    driver.cache.remove_job(job.id()).await;
    driver.delete_job_entities(job.id(), spec.instance_count);
    info!(job_id = %job.id(), "Job deleted");
    Ok(ActionOutcome::Done)
}

// =============================================================================
// Runtime updater
// =============================================================================

fn count(stats: &TaskStats, state: TaskState) -> u32 {
    stats.get(state.as_str()).copied().unwrap_or(0)
}

fn sum(stats: &TaskStats) -> u32 {
    stats.values().sum()
}

fn terminal_sum(stats: &TaskStats) -> u32 {
    [
        TaskState::Succeeded,
        TaskState::Failed,
        TaskState::Lost,
        TaskState::Killed,
        TaskState::Deleted,
    ]
    .iter()
    .map(|state| count(stats, *state))
    .sum()
}

/// Decides the new job state from per-task-state counts.
///
/// `controller_state` is instance 0's state when the config declares a
/// controller task, resolved by the caller.
pub fn determine_job_state(
    spec: &JobSpec,
    runtime: &JobRuntime,
    counts: &TaskStats,
    controller_state: Option<TaskState>,
) -> JobState {
    let n = spec.instance_count;
    let total = sum(counts);

    if total < n {
        return match spec.job_type {
            JobType::Batch => JobState::Initialized,
            JobType::Service => {
                if matches!(runtime.goal_state, JobState::Killed | JobState::Deleted) {
                    if count(counts, TaskState::Killed) > 0 {
                        JobState::Killed
                    } else {
                        JobState::Failed
                    }
                } else {
                    runtime.state
                }
            }
        };
    }

    if let Some(state) = controller_state {
        match state {
            TaskState::Succeeded => return JobState::Succeeded,
            // A failed or lost controller fails the job, but only once
            // every task has terminated; until then the counts rule.
            TaskState::Failed | TaskState::Lost => {
                if terminal_sum(counts) >= total {
                    return JobState::Failed;
                }
            }
            _ => {}
        }
    }

    if count(counts, TaskState::Running) > 0 {
        return JobState::Running;
    }
    let waiting = count(counts, TaskState::Pending)
        + count(counts, TaskState::Initialized)
        + count(counts, TaskState::Placed)
        + count(counts, TaskState::Launched)
        + count(counts, TaskState::Starting);
    if waiting > 0 {
        return JobState::Pending;
    }
    if count(counts, TaskState::Killing) > 0 {
        return JobState::Killing;
    }

    if terminal_sum(counts) >= total {
        if count(counts, TaskState::Failed) > 0 || count(counts, TaskState::Lost) > 0 {
            return JobState::Failed;
        }
        if count(counts, TaskState::Killed) > 0 {
            return JobState::Killed;
        }
        return JobState::Succeeded;
    }

    runtime.state
}

/// Picks the authoritative task-state counts: the materialized view by
/// default, a cache recount when freshness demands it.
async fn resolve_state_counts(
    driver: &Arc<Driver>,
    job: &Arc<CachedJob>,
    spec: &JobSpec,
    mv_counts: TaskStats,
) -> TaskStats {
    let cfg = &driver.config;
    let now = Utc::now();
    let last_update = job.last_task_update_time().await;

    let mv_diverged = sum(&mv_counts) > spec.instance_count;
    let recent = last_update.is_some_and(|t| now - t <= cfg.recent_task_update_duration);
    let stale = last_update.is_some_and(|t| now - t > cfg.stale_job_state_duration);

    let recount = spec.job_type == JobType::Service
        || mv_diverged
        || (cfg.job_runtime_calculation_via_cache && recent)
        || stale;

    if !recount {
        return mv_counts;
    }

    match job.state_counts_from_cache().await {
        Some(cache_counts) => {
            if mv_diverged {
                warn!(
                    job_id = %job.id(),
                    mv_total = sum(&mv_counts),
                    instance_count = spec.instance_count,
                    "Materialized view diverged, recounted from cache"
                );
            }
            cache_counts
        }
        // A half-hydrated cache would undercount; trust the view.
        None => mv_counts,
    }
}

/// The runtime-updater action: derives the job state from task counts and
/// commits it.
pub(super) async fn job_runtime_update(
    driver: &Arc<Driver>,
    job: &Arc<CachedJob>,
) -> Result<ActionOutcome, ActionError> {
    let runtime = job.get_runtime().await.map_err(map_cache_err)?;
    let (_, spec) = job.get_config().await.map_err(map_cache_err)?;

    let mv_counts = driver
        .store
        .task_state_summary(job.id())
        .await
        .map_err(|e| ActionError::Transient(e.to_string()))?;
    let counts = resolve_state_counts(driver, job, &spec, mv_counts).await;

    // Instance count zero is a valid terminated job; the determiner sees
    // sum == n == 0 and classifies from the (empty) terminal counts.
    let controller_state = if sum(&counts) >= spec.instance_count && spec.has_controller_task() {
        Some(fetch_controller_state(driver, job).await?)
    } else {
        None
    };

    let new_state = determine_job_state(&spec, &runtime, &counts, controller_state);

    let now = Utc::now();
    let mut updated = runtime.clone();
    updated.state = new_state;
    updated.task_stats = counts;

    if let Some(first) = job.first_task_update_time().await {
        updated.start_time = Some(first);
    }
    if new_state.is_terminal() && updated.completion_time.is_none() {
        // A terminal job's completion time must be nonempty even when its
        // tasks never ran.
        updated.completion_time = Some(job.last_task_update_time().await.unwrap_or(now));
    }
    if !new_state.is_terminal() {
        updated.completion_time = None;
    }

    if new_state != runtime.state {
        info!(
            job_id = %job.id(),
            from = %runtime.state,
            to = %new_state,
            "Job state transition"
        );
        job.update_runtime(updated, UpdateMode::CacheAndDb)
            .await
            .map_err(map_cache_err)?;
    } else {
        // Volatile stats only; skip the durable write.
        job.update_runtime(updated, UpdateMode::CacheOnly)
            .await
            .map_err(map_cache_err)?;
    }

    // A workflow in flight gets signaled on every meaningful pass.
    if let Some(workflow_id) = runtime.workflow_id {
        driver.enqueue_workflow(workflow_id, driver.config.progress_delay);
    }

    let partially_created = job.is_partially_created().await.map_err(map_cache_err)?;
    if new_state.is_terminal() || partially_created {
        // One more pass so collateral cleanup (or task creation) runs.
        Ok(ActionOutcome::Requeue(driver.config.progress_delay))
    } else {
        Ok(ActionOutcome::Requeue(driver.config.steady_state_delay))
    }
}

async fn fetch_controller_state(
    driver: &Arc<Driver>,
    job: &Arc<CachedJob>,
) -> Result<TaskState, ActionError> {
    if let Some(task) = job.get_task(0).await {
        let state = task.current_state();
        if state != TaskState::Unknown {
            return Ok(state);
        }
    }
    let runtime = driver
        .store
        .get_task_runtime(TaskId::new(job.id(), 0))
        .await
        .map_err(|e| ActionError::Transient(e.to_string()))?
        .ok_or_else(|| ActionError::Transient("controller task runtime missing".into()))?;
    Ok(runtime.state)
}
