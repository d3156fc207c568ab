//! Rolling-workflow controller for updates and restarts of service jobs.
//!
//! One workflow is active per job at a time. Each tick moves a bounded
//! batch of instances toward the target config version, counts completed
//! and failed instances, and either keeps rolling, rolls back, or settles
//! into a terminal state. The job SLA's `max_unavailable_instances` is a
//! hard bound: when honoring it would block progress, the controller
//! stalls rather than violate it.

use std::sync::Arc;

use armada_api::{
    HealthState, JobSpec, JobType, TaskState, WorkflowSpec, WorkflowState,
};
use armada_fsm::{StateMachine, TransitionTable};
use armada_id::{JobId, TaskId, WorkflowId};
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, CachedJob, JobCache, UpdateMode};
use crate::goalstate::engine::ActionError;
use crate::hostclient::{HostClientError, HostManagerClient};
use crate::storage::{Store, StoreError, WorkflowRecord};

/// Errors surfaced by workflow operations at the API boundary.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow {0} not found")]
    NotFound(WorkflowId),

    #[error("invalid workflow transition: {0}")]
    InvalidTransition(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The legal workflow state transitions.
pub fn workflow_transition_table() -> Arc<TransitionTable<WorkflowState>> {
    use WorkflowState::*;
    TransitionTable::builder()
        .allow(Initialized, RollingForward)
        .allow(Initialized, Paused)
        .allow(RollingForward, Paused)
        .allow(Paused, RollingForward)
        .allow(Paused, RollingBackward)
        .allow(RollingForward, RollingBackward)
        .allow(RollingForward, Succeeded)
        .allow(RollingForward, Failed)
        .allow(RollingBackward, RolledBack)
        .allow(RollingBackward, Failed)
        .allow(RollingBackward, Paused)
        .allow_from(&[Initialized, RollingForward, RollingBackward, Paused], Aborted)
        .build()
}

/// Result of one controller tick.
pub struct TickResult {
    /// False once the workflow is terminal.
    pub active: bool,

    /// Tasks the tick operated on; the caller re-enqueues them.
    pub touched: Vec<TaskId>,
}

enum InstanceStatus {
    Completed,
    Failed,
    InProgress,
}

/// Drives one tick of a workflow at a time.
pub struct WorkflowController {
    cache: Arc<JobCache>,
    store: Arc<dyn Store>,
    hosts: Arc<dyn HostManagerClient>,
    table: Arc<TransitionTable<WorkflowState>>,
}

impl WorkflowController {
    pub fn new(
        cache: Arc<JobCache>,
        store: Arc<dyn Store>,
        hosts: Arc<dyn HostManagerClient>,
    ) -> Self {
        Self {
            cache,
            store,
            hosts,
            table: workflow_transition_table(),
        }
    }

    fn transition(
        &self,
        record: &mut WorkflowRecord,
        to: WorkflowState,
    ) -> Result<(), WorkflowError> {
        let mut machine = StateMachine::new(Arc::clone(&self.table), record.state);
        machine
            .transition_to(to)
            .map_err(|e| WorkflowError::InvalidTransition(e.to_string()))?;
        debug!(workflow_id = %record.id, from = %record.state, to = %to, "Workflow transition");
        record.state = to;
        record.updated_at = Utc::now();
        Ok(())
    }

    /// Runs one tick.
    pub async fn tick(&self, workflow_id: WorkflowId) -> Result<TickResult, ActionError> {
        let Some(mut record) = self
            .store
            .get_workflow(workflow_id)
            .await
            .map_err(transient)?
        else {
            debug!(%workflow_id, "Workflow record missing, dropping");
            return Ok(TickResult {
                active: false,
                touched: Vec::new(),
            });
        };

        if record.state.is_terminal() {
            return Ok(TickResult {
                active: false,
                touched: Vec::new(),
            });
        }
        if record.state == WorkflowState::Paused {
            return Ok(TickResult {
                active: true,
                touched: Vec::new(),
            });
        }
        if record.state == WorkflowState::Initialized {
            self.transition(&mut record, WorkflowState::RollingForward)
                .map_err(|e| ActionError::Fatal(e.to_string()))?;
        }

        let Some(job) = self.cache.get_job(record.job_id).await else {
            warn!(%workflow_id, job_id = %record.job_id, "Job gone, aborting workflow");
            let _ = self.transition(&mut record, WorkflowState::Aborted);
            self.store.put_workflow(&record).await.map_err(transient)?;
            return Ok(TickResult {
                active: false,
                touched: Vec::new(),
            });
        };

        let spec = job
            .get_config_version(record.target_version)
            .await
            .map_err(cache_transient)?;

        let result = self.advance(&mut record, &job, &spec).await?;
        self.store.put_workflow(&record).await.map_err(transient)?;
        Ok(result)
    }

    /// The per-tick progression over instances.
    async fn advance(
        &self,
        record: &mut WorkflowRecord,
        job: &Arc<CachedJob>,
        spec: &JobSpec,
    ) -> Result<TickResult, ActionError> {
        let target = record.target_version;
        let mut touched = Vec::new();

        // Settle in-flight instances.
        let retries = record.spec.max_instance_retries;
        let mut still_in_flight = Vec::new();
        for &instance in &record.in_flight {
            match self
                .instance_status(job, instance, target, spec, retries)
                .await
            {
                InstanceStatus::Completed => record.completed.push(instance),
                InstanceStatus::Failed => record.failed.push(instance),
                InstanceStatus::InProgress => still_in_flight.push(instance),
            }
        }
        record.in_flight = still_in_flight;

        // Tolerance check before issuing more work.
        let failed_count = record.failed.len() as u32;
        let tolerance = record.spec.max_tolerable_instance_failures.max(1);
        if failed_count >= tolerance {
            if record.spec.rollback_on_failure && !record.rolling_back {
                info!(
                    workflow_id = %record.id,
                    failed = failed_count,
                    "Failure tolerance exceeded, rolling back"
                );
                self.begin_rollback(record)
                    .map_err(|e| ActionError::Fatal(e.to_string()))?;
                return Ok(TickResult {
                    active: true,
                    touched,
                });
            }
            warn!(workflow_id = %record.id, failed = failed_count, "Workflow failed");
            self.transition(record, WorkflowState::Failed)
                .map_err(|e| ActionError::Fatal(e.to_string()))?;
            return Ok(TickResult {
                active: false,
                touched,
            });
        }

        // Completion check.
        let operated: std::collections::HashSet<u32> = record
            .completed
            .iter()
            .chain(record.failed.iter())
            .chain(record.in_flight.iter())
            .copied()
            .collect();
        let remaining: Vec<u32> = record
            .instances
            .iter()
            .copied()
            .filter(|i| !operated.contains(i))
            .collect();

        if remaining.is_empty() && record.in_flight.is_empty() {
            let done_state = if record.rolling_back {
                WorkflowState::RolledBack
            } else {
                WorkflowState::Succeeded
            };
            info!(
                workflow_id = %record.id,
                completed = record.completed.len(),
                failed = record.failed.len(),
                state = %done_state,
                "Workflow finished"
            );
            self.transition(record, done_state)
                .map_err(|e| ActionError::Fatal(e.to_string()))?;
            return Ok(TickResult {
                active: false,
                touched,
            });
        }

        // Pick the next batch in ascending instance order, bounded by the
        // batch size and the availability SLA. Taking down an instance
        // that is already unavailable costs no SLA budget, so rollbacks
        // over failed instances still make progress.
        let batch_room = record
            .spec
            .batch_size
            .saturating_sub(record.in_flight.len() as u32) as usize;
        let unavailable = self.count_unavailable(job).await;
        let mut sla_budget = spec
            .sla
            .max_unavailable_instances
            .saturating_sub(unavailable);

        let mut picked = 0usize;
        let mut stalled = false;
        for &instance in &remaining {
            if picked >= batch_room {
                break;
            }
            if self.is_instance_available(job, instance).await {
                if sla_budget == 0 {
                    stalled = true;
                    continue;
                }
                sla_budget -= 1;
            }
            self.issue_instance_op(record, job, spec, instance, target)
                .await?;
            record.in_flight.push(instance);
            touched.push(TaskId::new(record.job_id, instance));
            picked += 1;
        }

        if stalled && picked < batch_room {
            debug!(
                workflow_id = %record.id,
                unavailable,
                max_unavailable = spec.sla.max_unavailable_instances,
                "Stalling to honor availability SLA"
            );
        }

        record.updated_at = Utc::now();
        Ok(TickResult {
            active: true,
            touched,
        })
    }

    /// Issues the update/restart operation for one instance: retarget its
    /// config version and stop the current run so the replacement comes up
    /// at the target.
    async fn issue_instance_op(
        &self,
        record: &WorkflowRecord,
        job: &Arc<CachedJob>,
        spec: &JobSpec,
        instance: u32,
        target: u64,
    ) -> Result<(), ActionError> {
        let task = job.add_task(instance).await;
        // An instance added by this update has no record yet.
        let mut runtime = task
            .runtime()
            .unwrap_or_else(|| crate::goalstate::initializing_task_runtime(spec, target));
        let now = Utc::now();

        runtime.desired_config_version = target;
        // A restart of an already-settled instance still needs a new run.
        if record.kind == armada_api::WorkflowKind::Restart
            && runtime.config_version == target
            && runtime.state == TaskState::Running
        {
            runtime.failure_count = 0;
        }

        let run_to_kill = match runtime.state {
            TaskState::Running
            | TaskState::Starting
            | TaskState::Launched
            | TaskState::Placed
            | TaskState::Pending => runtime.run_id,
            _ => None,
        };

        job.update_task_runtime(instance, runtime, UpdateMode::CacheAndDb, now)
            .await
            .map_err(cache_transient)?;

        if let Some(run_id) = run_to_kill {
            self.hosts
                .kill_tasks(&[run_id])
                .await
                .map_err(host_transient)?;
        }

        debug!(
            workflow_id = %record.id,
            instance,
            target_version = target,
            "Issued instance operation"
        );
        Ok(())
    }

    async fn instance_status(
        &self,
        job: &Arc<CachedJob>,
        instance: u32,
        target: u64,
        spec: &JobSpec,
        max_instance_retries: u32,
    ) -> InstanceStatus {
        let Some(task) = job.get_task(instance).await else {
            return InstanceStatus::InProgress;
        };
        let Some(runtime) = task.runtime() else {
            return InstanceStatus::InProgress;
        };

        if matches!(runtime.state, TaskState::Failed | TaskState::Lost)
            && runtime.failure_count >= max_instance_retries
        {
            return InstanceStatus::Failed;
        }
        if runtime.config_version != target {
            return InstanceStatus::InProgress;
        }

        let healthy = matches!(
            runtime.healthy,
            HealthState::Disabled | HealthState::Healthy
        );
        let settled = match spec.job_type {
            JobType::Service => runtime.state == TaskState::Running && healthy,
            JobType::Batch => runtime.state == TaskState::Succeeded,
        };
        if settled {
            InstanceStatus::Completed
        } else {
            InstanceStatus::InProgress
        }
    }

    async fn is_instance_available(&self, job: &Arc<CachedJob>, instance: u32) -> bool {
        match job.get_task(instance).await {
            Some(task) => matches!(
                task.current_state(),
                TaskState::Running | TaskState::Succeeded
            ),
            None => false,
        }
    }

    /// Instances of the job currently unavailable (not serving / not done).
    async fn count_unavailable(&self, job: &Arc<CachedJob>) -> u32 {
        let tasks = job.all_tasks().await;
        tasks
            .values()
            .filter(|task| {
                !matches!(
                    task.current_state(),
                    TaskState::Running | TaskState::Succeeded
                )
            })
            .count() as u32
    }

    fn begin_rollback(&self, record: &mut WorkflowRecord) -> Result<(), WorkflowError> {
        self.transition(record, WorkflowState::RollingBackward)?;
        record.rolling_back = true;

        // Reverse course: the previous version becomes the target, and the
        // instances already touched are the ones to roll back.
        let touched: Vec<u32> = {
            let mut all: Vec<u32> = record
                .completed
                .iter()
                .chain(record.failed.iter())
                .chain(record.in_flight.iter())
                .copied()
                .collect();
            all.sort_unstable();
            all.dedup();
            all
        };
        let forward_target = record.target_version;
        record.target_version = record.prev_version;
        record.prev_version = forward_target;
        record.instances = touched;
        record.completed.clear();
        record.failed.clear();
        record.in_flight.clear();
        Ok(())
    }

    // =========================================================================
    // Operator surface
    // =========================================================================

    pub async fn pause(&self, workflow_id: WorkflowId) -> Result<WorkflowRecord, WorkflowError> {
        self.operator_transition(workflow_id, WorkflowState::Paused)
            .await
    }

    pub async fn resume(&self, workflow_id: WorkflowId) -> Result<WorkflowRecord, WorkflowError> {
        let record = self
            .store
            .get_workflow(workflow_id)
            .await?
            .ok_or(WorkflowError::NotFound(workflow_id))?;
        let to = if record.rolling_back {
            WorkflowState::RollingBackward
        } else {
            WorkflowState::RollingForward
        };
        self.operator_transition(workflow_id, to).await
    }

    pub async fn abort(&self, workflow_id: WorkflowId) -> Result<WorkflowRecord, WorkflowError> {
        self.operator_transition(workflow_id, WorkflowState::Aborted)
            .await
    }

    async fn operator_transition(
        &self,
        workflow_id: WorkflowId,
        to: WorkflowState,
    ) -> Result<WorkflowRecord, WorkflowError> {
        let mut record = self
            .store
            .get_workflow(workflow_id)
            .await?
            .ok_or(WorkflowError::NotFound(workflow_id))?;
        self.transition(&mut record, to)?;
        self.store.put_workflow(&record).await?;
        Ok(record)
    }
}

/// Builds the record for a freshly requested workflow over `instances`.
pub fn new_workflow_record(
    job_id: JobId,
    kind: armada_api::WorkflowKind,
    spec: WorkflowSpec,
    target_version: u64,
    prev_version: u64,
    mut instances: Vec<u32>,
) -> WorkflowRecord {
    instances.sort_unstable();
    instances.dedup();
    let now = Utc::now();
    WorkflowRecord {
        id: WorkflowId::new(),
        job_id,
        kind,
        state: WorkflowState::Initialized,
        spec,
        target_version,
        prev_version,
        instances,
        completed: Vec::new(),
        failed: Vec::new(),
        in_flight: Vec::new(),
        rolling_back: false,
        created_at: now,
        updated_at: now,
    }
}

fn transient(error: StoreError) -> ActionError {
    ActionError::Transient(error.to_string())
}

fn cache_transient(error: CacheError) -> ActionError {
    ActionError::Transient(error.to_string())
}

fn host_transient(error: HostClientError) -> ActionError {
    ActionError::Transient(error.to_string())
}
