//! Narrow persistent-store interface.
//!
//! The job manager only ever touches the store through [`Store`]: an
//! active-jobs set, append-mostly job configs keyed by version, CAS-updated
//! job runtimes, per-instance task runtimes, the task-state materialized
//! view, and workflow records. The Postgres implementation backs
//! production; the in-memory implementation backs tests.

mod memory;
mod postgres;

pub use memory::MemStore;
pub use postgres::PgStore;

use std::collections::BTreeMap;

use armada_api::{JobSpec, JobState, TaskRuntime, TaskStats, WorkflowSpec, WorkflowState};
use armada_id::{JobId, TaskId, WorkflowId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The revision CAS failed; the caller re-reads and retries.
    #[error("stale revision for {entity}: expected {expected}, found {actual}")]
    Conflict {
        entity: String,
        expected: u64,
        actual: u64,
    },

    /// Backend failure; retried with backoff.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persisted job runtime, CAS-guarded by `revision`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRuntime {
    pub state: JobState,
    pub goal_state: JobState,

    /// Monotone per-job revision; every committed update increments it.
    pub revision: u64,

    /// Version of the config this runtime reflects.
    pub config_version: u64,

    /// Active workflow, at most one at a time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<WorkflowId>,

    #[serde(default)]
    pub task_stats: TaskStats,

    pub creation_time: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
}

impl JobRuntime {
    /// A fresh runtime for a just-created job.
    pub fn initial(goal_state: JobState, config_version: u64, now: DateTime<Utc>) -> Self {
        Self {
            state: JobState::Initialized,
            goal_state,
            revision: 1,
            config_version,
            workflow_id: None,
            task_stats: TaskStats::new(),
            creation_time: now,
            start_time: None,
            completion_time: None,
        }
    }
}

/// Persisted workflow record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: WorkflowId,
    pub job_id: JobId,
    pub kind: armada_api::WorkflowKind,
    pub state: WorkflowState,
    pub spec: WorkflowSpec,

    /// Config version the workflow drives toward.
    pub target_version: u64,

    /// Config version to return to on rollback.
    pub prev_version: u64,

    /// Instances in scope, ascending.
    pub instances: Vec<u32>,

    /// Instances settled at the target.
    pub completed: Vec<u32>,

    /// Instances that exhausted retries.
    pub failed: Vec<u32>,

    /// Instances whose operation has been issued but not settled.
    pub in_flight: Vec<u32>,

    /// True once the workflow reversed course; lets a paused rollback
    /// resume in the right direction.
    #[serde(default)]
    pub rolling_back: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The narrow store surface.
#[async_trait]
pub trait Store: Send + Sync {
    // Active-jobs set: the jobs recovery must revisit.
    async fn add_active_job(&self, job_id: JobId) -> StoreResult<()>;
    async fn delete_active_job(&self, job_id: JobId) -> StoreResult<()>;
    async fn list_active_jobs(&self) -> StoreResult<Vec<JobId>>;

    // Job config, append-mostly by version.
    async fn create_job_config(
        &self,
        job_id: JobId,
        version: u64,
        spec: &JobSpec,
    ) -> StoreResult<()>;
    async fn get_job_config(&self, job_id: JobId, version: u64) -> StoreResult<Option<JobSpec>>;

    // Job runtime, revision-CAS on update.
    async fn create_job_runtime(&self, job_id: JobId, runtime: &JobRuntime) -> StoreResult<()>;
    async fn get_job_runtime(&self, job_id: JobId) -> StoreResult<Option<JobRuntime>>;

    /// Commits `runtime` only if the stored revision equals
    /// `expected_revision`; `runtime.revision` must already be bumped.
    async fn update_job_runtime(
        &self,
        job_id: JobId,
        runtime: &JobRuntime,
        expected_revision: u64,
    ) -> StoreResult<()>;

    /// Removes the job and everything under it.
    async fn delete_job(&self, job_id: JobId) -> StoreResult<()>;

    async fn list_jobs(&self) -> StoreResult<Vec<JobId>>;

    // Task runtimes keyed by (job, instance).
    async fn put_task_runtime(&self, task_id: TaskId, runtime: &TaskRuntime) -> StoreResult<()>;
    async fn get_task_runtime(&self, task_id: TaskId) -> StoreResult<Option<TaskRuntime>>;
    async fn list_task_runtimes(&self, job_id: JobId) -> StoreResult<BTreeMap<u32, TaskRuntime>>;

    /// Per-state task counts from the materialized view: fast and possibly
    /// stale. The fresh recount lives in the cache, not here.
    async fn task_state_summary(&self, job_id: JobId) -> StoreResult<TaskStats>;

    // Workflow records.
    async fn put_workflow(&self, record: &WorkflowRecord) -> StoreResult<()>;
    async fn get_workflow(&self, workflow_id: WorkflowId) -> StoreResult<Option<WorkflowRecord>>;
}
