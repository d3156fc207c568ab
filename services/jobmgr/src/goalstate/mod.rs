//! Goal-state reconciliation: the engine plus the job, task, and workflow
//! entities that run in it.

pub mod engine;
mod job_actions;
mod task_actions;

pub use engine::{ActionError, ActionOutcome, Engine, EngineConfig, Entity};
pub use job_actions::{determine_job_state, JobAction};
pub use task_actions::{initializing_task_runtime, kill_orphan_task, TaskAction};

use std::sync::Arc;
use std::time::Duration;

use armada_id::{JobId, TaskId, WorkflowId};
use async_trait::async_trait;
use tokio::sync::watch;

use crate::cache::JobCache;
use crate::hostclient::HostManagerClient;
use crate::storage::Store;
use crate::workflow::WorkflowController;

/// Tunables for the driver and its actions.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Cluster-wide knob: recompute job state from the cache when the last
    /// task update is recent, instead of trusting the materialized view.
    pub job_runtime_calculation_via_cache: bool,

    /// A job whose last task update is older than this is considered stale
    /// and recounted from the cache.
    pub stale_job_state_duration: chrono::Duration,

    /// Window within which the recalculate flag applies.
    pub recent_task_update_duration: chrono::Duration,

    /// Requeue delay for entities in steady state.
    pub steady_state_delay: Duration,

    /// Requeue delay when progress is expected immediately.
    pub progress_delay: Duration,

    /// Requeue delay between workflow ticks.
    pub workflow_tick_delay: Duration,

    /// Per-instance retries before a batch task stops restarting.
    pub max_task_retries: u32,

    pub job_engine: EngineConfig,
    pub task_engine: EngineConfig,
    pub workflow_engine: EngineConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            job_runtime_calculation_via_cache: false,
            stale_job_state_duration: chrono::Duration::hours(6),
            recent_task_update_duration: chrono::Duration::minutes(10),
            steady_state_delay: Duration::from_secs(30),
            progress_delay: Duration::from_millis(100),
            workflow_tick_delay: Duration::from_secs(5),
            max_task_retries: 3,
            job_engine: EngineConfig::default(),
            task_engine: EngineConfig::default(),
            workflow_engine: EngineConfig::default(),
        }
    }
}

/// Owns the three engines and hands entities their collaborators.
pub struct Driver {
    pub cache: Arc<JobCache>,
    pub store: Arc<dyn Store>,
    pub hosts: Arc<dyn HostManagerClient>,
    pub config: DriverConfig,
    job_engine: Engine,
    task_engine: Engine,
    workflow_engine: Engine,
}

impl Driver {
    pub fn new(
        cache: Arc<JobCache>,
        store: Arc<dyn Store>,
        hosts: Arc<dyn HostManagerClient>,
        config: DriverConfig,
    ) -> Arc<Self> {
        let job_engine = Engine::new(config.job_engine.clone());
        let task_engine = Engine::new(config.task_engine.clone());
        let workflow_engine = Engine::new(config.workflow_engine.clone());
        Arc::new(Self {
            cache,
            store,
            hosts,
            config,
            job_engine,
            task_engine,
            workflow_engine,
        })
    }

    /// Starts all three engines' worker pools.
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = self.job_engine.start(shutdown.clone());
        handles.extend(self.task_engine.start(shutdown.clone()));
        handles.extend(self.workflow_engine.start(shutdown));
        handles
    }

    pub fn enqueue_job(self: &Arc<Self>, job_id: JobId, delay: Duration) {
        self.job_engine.enqueue(
            Arc::new(JobEntity {
                job_id,
                driver: Arc::clone(self),
            }),
            delay,
        );
    }

    pub fn enqueue_task(self: &Arc<Self>, task_id: TaskId, delay: Duration) {
        self.task_engine.enqueue(
            Arc::new(TaskEntity {
                task_id,
                driver: Arc::clone(self),
            }),
            delay,
        );
    }

    pub fn enqueue_workflow(self: &Arc<Self>, workflow_id: WorkflowId, delay: Duration) {
        self.workflow_engine.enqueue(
            Arc::new(WorkflowEntity {
                workflow_id,
                driver: Arc::clone(self),
            }),
            delay,
        );
    }

    /// Runs the job entity's due action once, bypassing the queue.
    ///
    /// The dispatch path used by operator tooling and tests; the engine
    /// workers go through the same function.
    pub async fn run_job_action(
        self: &Arc<Self>,
        job_id: JobId,
    ) -> Result<ActionOutcome, ActionError> {
        job_actions::run_job_entity(self, job_id).await
    }

    /// Runs the task entity's due action once, bypassing the queue.
    pub async fn run_task_action(
        self: &Arc<Self>,
        task_id: TaskId,
    ) -> Result<ActionOutcome, ActionError> {
        task_actions::run_task_entity(self, task_id).await
    }

    /// Queued entity counts per engine: (jobs, tasks, workflows).
    pub fn queue_depths(&self) -> (usize, usize, usize) {
        (
            self.job_engine.len(),
            self.task_engine.len(),
            self.workflow_engine.len(),
        )
    }

    /// Drops a job and its tasks from the queues (not from the cache).
    pub fn delete_job_entities(&self, job_id: JobId, instance_count: u32) {
        self.job_engine.delete(&format!("job:{job_id}"));
        for instance in 0..instance_count {
            self.task_engine
                .delete(&format!("task:{}", TaskId::new(job_id, instance)));
        }
    }

    fn workflow_controller(self: &Arc<Self>) -> WorkflowController {
        WorkflowController::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.store),
            Arc::clone(&self.hosts),
        )
    }
}

struct JobEntity {
    job_id: JobId,
    driver: Arc<Driver>,
}

#[async_trait]
impl Entity for JobEntity {
    fn key(&self) -> String {
        format!("job:{}", self.job_id)
    }

    async fn run(&self) -> Result<ActionOutcome, ActionError> {
        job_actions::run_job_entity(&self.driver, self.job_id).await
    }
}

struct TaskEntity {
    task_id: TaskId,
    driver: Arc<Driver>,
}

#[async_trait]
impl Entity for TaskEntity {
    fn key(&self) -> String {
        format!("task:{}", self.task_id)
    }

    async fn run(&self) -> Result<ActionOutcome, ActionError> {
        task_actions::run_task_entity(&self.driver, self.task_id).await
    }
}

struct WorkflowEntity {
    workflow_id: WorkflowId,
    driver: Arc<Driver>,
}

#[async_trait]
impl Entity for WorkflowEntity {
    fn key(&self) -> String {
        format!("workflow:{}", self.workflow_id)
    }

    async fn run(&self) -> Result<ActionOutcome, ActionError> {
        let controller = self.driver.workflow_controller();
        let result = controller.tick(self.workflow_id).await?;
        for task_id in result.touched {
            self.driver
                .enqueue_task(task_id, self.driver.config.progress_delay);
        }
        if result.active {
            Ok(ActionOutcome::Requeue(self.driver.config.workflow_tick_delay))
        } else {
            Ok(ActionOutcome::Done)
        }
    }
}
