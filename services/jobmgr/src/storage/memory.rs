//! In-memory store used by tests and local development.
//!
//! Behaves like the real store including revision CAS. The materialized
//! view is tracked as its own map so tests can inject the stale or
//! diverged counts the runtime updater must tolerate.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use armada_api::{JobSpec, TaskRuntime, TaskStats};
use armada_id::{JobId, TaskId, WorkflowId};
use async_trait::async_trait;

use super::{JobRuntime, Store, StoreError, StoreResult, WorkflowRecord};

#[derive(Default)]
struct MemState {
    active: HashSet<JobId>,
    configs: HashMap<(JobId, u64), JobSpec>,
    runtimes: HashMap<JobId, JobRuntime>,
    tasks: HashMap<JobId, BTreeMap<u32, TaskRuntime>>,
    summaries: HashMap<JobId, TaskStats>,
    summary_overrides: HashMap<JobId, TaskStats>,
    workflows: HashMap<WorkflowId, WorkflowRecord>,
}

/// In-memory [`Store`] implementation.
#[derive(Default)]
pub struct MemStore {
    state: Mutex<MemState>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the materialized-view summary for a job to an arbitrary value,
    /// simulating a stale or diverged view.
    pub fn inject_task_state_summary(&self, job_id: JobId, stats: TaskStats) {
        let mut state = self.state.lock().expect("store lock poisoned");
        state.summary_overrides.insert(job_id, stats);
    }

    /// Clears an injected summary; the view tracks writes again.
    pub fn clear_task_state_summary(&self, job_id: JobId) {
        let mut state = self.state.lock().expect("store lock poisoned");
        state.summary_overrides.remove(&job_id);
    }

    fn recompute_summary(state: &mut MemState, job_id: JobId) {
        let mut stats = TaskStats::new();
        if let Some(tasks) = state.tasks.get(&job_id) {
            for runtime in tasks.values() {
                *stats.entry(runtime.state.as_str().to_string()).or_insert(0) += 1;
            }
        }
        state.summaries.insert(job_id, stats);
    }
}

#[async_trait]
impl Store for MemStore {
    async fn add_active_job(&self, job_id: JobId) -> StoreResult<()> {
        let mut state = self.state.lock().expect("store lock poisoned");
        state.active.insert(job_id);
        Ok(())
    }

    async fn delete_active_job(&self, job_id: JobId) -> StoreResult<()> {
        let mut state = self.state.lock().expect("store lock poisoned");
        state.active.remove(&job_id);
        Ok(())
    }

    async fn list_active_jobs(&self) -> StoreResult<Vec<JobId>> {
        let state = self.state.lock().expect("store lock poisoned");
        let mut ids: Vec<JobId> = state.active.iter().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn create_job_config(
        &self,
        job_id: JobId,
        version: u64,
        spec: &JobSpec,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().expect("store lock poisoned");
        state.configs.insert((job_id, version), spec.clone());
        Ok(())
    }

    async fn get_job_config(&self, job_id: JobId, version: u64) -> StoreResult<Option<JobSpec>> {
        let state = self.state.lock().expect("store lock poisoned");
        Ok(state.configs.get(&(job_id, version)).cloned())
    }

    async fn create_job_runtime(&self, job_id: JobId, runtime: &JobRuntime) -> StoreResult<()> {
        let mut state = self.state.lock().expect("store lock poisoned");
        state.runtimes.insert(job_id, runtime.clone());
        Ok(())
    }

    async fn get_job_runtime(&self, job_id: JobId) -> StoreResult<Option<JobRuntime>> {
        let state = self.state.lock().expect("store lock poisoned");
        Ok(state.runtimes.get(&job_id).cloned())
    }

    async fn update_job_runtime(
        &self,
        job_id: JobId,
        runtime: &JobRuntime,
        expected_revision: u64,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().expect("store lock poisoned");
        let current = state
            .runtimes
            .get(&job_id)
            .ok_or_else(|| StoreError::Backend(format!("no runtime for {job_id}")))?;
        if current.revision != expected_revision {
            return Err(StoreError::Conflict {
                entity: job_id.to_string(),
                expected: expected_revision,
                actual: current.revision,
            });
        }
        state.runtimes.insert(job_id, runtime.clone());
        Ok(())
    }

    async fn delete_job(&self, job_id: JobId) -> StoreResult<()> {
        let mut state = self.state.lock().expect("store lock poisoned");
        state.active.remove(&job_id);
        state.runtimes.remove(&job_id);
        state.tasks.remove(&job_id);
        state.summaries.remove(&job_id);
        state.summary_overrides.remove(&job_id);
        state.configs.retain(|(id, _), _| *id != job_id);
        state.workflows.retain(|_, record| record.job_id != job_id);
        Ok(())
    }

    async fn list_jobs(&self) -> StoreResult<Vec<JobId>> {
        let state = self.state.lock().expect("store lock poisoned");
        let mut ids: Vec<JobId> = state.runtimes.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn put_task_runtime(&self, task_id: TaskId, runtime: &TaskRuntime) -> StoreResult<()> {
        let mut state = self.state.lock().expect("store lock poisoned");
        state
            .tasks
            .entry(task_id.job_id)
            .or_default()
            .insert(task_id.instance, runtime.clone());
        Self::recompute_summary(&mut state, task_id.job_id);
        Ok(())
    }

    async fn get_task_runtime(&self, task_id: TaskId) -> StoreResult<Option<TaskRuntime>> {
        let state = self.state.lock().expect("store lock poisoned");
        Ok(state
            .tasks
            .get(&task_id.job_id)
            .and_then(|tasks| tasks.get(&task_id.instance))
            .cloned())
    }

    async fn list_task_runtimes(&self, job_id: JobId) -> StoreResult<BTreeMap<u32, TaskRuntime>> {
        let state = self.state.lock().expect("store lock poisoned");
        Ok(state.tasks.get(&job_id).cloned().unwrap_or_default())
    }

    async fn task_state_summary(&self, job_id: JobId) -> StoreResult<TaskStats> {
        let state = self.state.lock().expect("store lock poisoned");
        if let Some(overridden) = state.summary_overrides.get(&job_id) {
            return Ok(overridden.clone());
        }
        Ok(state.summaries.get(&job_id).cloned().unwrap_or_default())
    }

    async fn put_workflow(&self, record: &WorkflowRecord) -> StoreResult<()> {
        let mut state = self.state.lock().expect("store lock poisoned");
        state.workflows.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_workflow(&self, workflow_id: WorkflowId) -> StoreResult<Option<WorkflowRecord>> {
        let state = self.state.lock().expect("store lock poisoned");
        Ok(state.workflows.get(&workflow_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_api::{JobState, TaskState};
    use chrono::Utc;

    #[tokio::test]
    async fn test_runtime_cas() {
        let store = MemStore::new();
        let job_id = JobId::new();
        let mut runtime = JobRuntime::initial(JobState::Succeeded, 1, Utc::now());
        store.create_job_runtime(job_id, &runtime).await.unwrap();

        runtime.state = JobState::Pending;
        runtime.revision = 2;
        store.update_job_runtime(job_id, &runtime, 1).await.unwrap();

        // A second writer with the stale revision conflicts.
        let err = store
            .update_job_runtime(job_id, &runtime, 1)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_summary_tracks_writes_and_overrides() {
        let store = MemStore::new();
        let job_id = JobId::new();
        let mut runtime = TaskRuntime::default();
        runtime.state = TaskState::Running;
        store
            .put_task_runtime(TaskId::new(job_id, 0), &runtime)
            .await
            .unwrap();

        let stats = store.task_state_summary(job_id).await.unwrap();
        assert_eq!(stats.get("RUNNING"), Some(&1));

        let mut stale = TaskStats::new();
        stale.insert("PENDING".into(), 7);
        store.inject_task_state_summary(job_id, stale);
        let stats = store.task_state_summary(job_id).await.unwrap();
        assert_eq!(stats.get("PENDING"), Some(&7));

        store.clear_task_state_summary(job_id);
        let stats = store.task_state_summary(job_id).await.unwrap();
        assert_eq!(stats.get("RUNNING"), Some(&1));
    }

    #[tokio::test]
    async fn test_delete_job_cleans_everything() {
        let store = MemStore::new();
        let job_id = JobId::new();
        store.add_active_job(job_id).await.unwrap();
        store
            .create_job_config(job_id, 1, &JobSpec::default())
            .await
            .unwrap();
        store
            .create_job_runtime(job_id, &JobRuntime::initial(JobState::Succeeded, 1, Utc::now()))
            .await
            .unwrap();
        store
            .put_task_runtime(TaskId::new(job_id, 0), &TaskRuntime::default())
            .await
            .unwrap();

        store.delete_job(job_id).await.unwrap();
        assert!(store.list_active_jobs().await.unwrap().is_empty());
        assert!(store.get_job_runtime(job_id).await.unwrap().is_none());
        assert!(store.get_job_config(job_id, 1).await.unwrap().is_none());
        assert!(store
            .list_task_runtimes(job_id)
            .await
            .unwrap()
            .is_empty());
    }
}
