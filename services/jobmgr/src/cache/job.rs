//! Cached job entry: config versions, runtime, and the task map.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use armada_api::{JobSpec, JobType, TaskRuntime, TaskStats};
use armada_id::{JobId, TaskId};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::{CacheError, CachedTask};
use crate::storage::{JobRuntime, Store};

/// Whether a write lands in the store or only refreshes the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Commit to the store, then refresh the cache. The normal path.
    CacheAndDb,
    /// Refresh the cache only; used when replaying state already durable.
    CacheOnly,
}

#[derive(Default)]
struct JobInner {
    specs: BTreeMap<u64, JobSpec>,
    runtime: Option<JobRuntime>,
    tasks: HashMap<u32, Arc<CachedTask>>,
    first_task_update: Option<DateTime<Utc>>,
    last_task_update: Option<DateTime<Utc>>,
}

/// One job's cached state, with its own lock shard.
pub struct CachedJob {
    id: JobId,
    store: Arc<dyn Store>,
    inner: RwLock<JobInner>,
}

impl CachedJob {
    pub(super) fn new(id: JobId, store: Arc<dyn Store>) -> Self {
        Self {
            id,
            store,
            inner: RwLock::new(JobInner::default()),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Persists a brand-new job (config version + runtime) and primes the
    /// cache.
    pub async fn create(
        &self,
        version: u64,
        spec: JobSpec,
        runtime: JobRuntime,
    ) -> Result<(), CacheError> {
        self.store.create_job_config(self.id, version, &spec).await?;
        self.store.create_job_runtime(self.id, &runtime).await?;

        let mut inner = self.inner.write().await;
        inner.specs.insert(version, spec);
        inner.runtime = Some(runtime);
        Ok(())
    }

    /// Appends a new config version (job update path).
    pub async fn add_config_version(&self, version: u64, spec: JobSpec) -> Result<(), CacheError> {
        self.store.create_job_config(self.id, version, &spec).await?;
        self.inner.write().await.specs.insert(version, spec);
        Ok(())
    }

    /// The runtime, loaded from the store on a cold entry.
    pub async fn get_runtime(&self) -> Result<JobRuntime, CacheError> {
        if let Some(runtime) = self.inner.read().await.runtime.clone() {
            return Ok(runtime);
        }
        let runtime = self
            .store
            .get_job_runtime(self.id)
            .await?
            .ok_or(CacheError::MissingRuntime(self.id))?;
        self.inner.write().await.runtime = Some(runtime.clone());
        Ok(runtime)
    }

    /// The config at the runtime's current version.
    pub async fn get_config(&self) -> Result<(u64, JobSpec), CacheError> {
        let version = self.get_runtime().await?.config_version;
        let spec = self.get_config_version(version).await?;
        Ok((version, spec))
    }

    /// The config at a specific version.
    pub async fn get_config_version(&self, version: u64) -> Result<JobSpec, CacheError> {
        if let Some(spec) = self.inner.read().await.specs.get(&version).cloned() {
            return Ok(spec);
        }
        let spec = self
            .store
            .get_job_config(self.id, version)
            .await?
            .ok_or(CacheError::MissingConfig {
                job_id: self.id,
                version,
            })?;
        self.inner.write().await.specs.insert(version, spec.clone());
        Ok(spec)
    }

    pub async fn job_type(&self) -> Result<JobType, CacheError> {
        Ok(self.get_config().await?.1.job_type)
    }

    /// Commits a runtime update guarded by the optimistic revision.
    ///
    /// The new runtime's revision is bumped here; on a CAS conflict the
    /// cached runtime is invalidated so the caller re-reads fresh state
    /// before retrying.
    pub async fn update_runtime(
        &self,
        mut runtime: JobRuntime,
        mode: UpdateMode,
    ) -> Result<JobRuntime, CacheError> {
        match mode {
            UpdateMode::CacheAndDb => {
                let expected = runtime.revision;
                runtime.revision += 1;
                match self
                    .store
                    .update_job_runtime(self.id, &runtime, expected)
                    .await
                {
                    Ok(()) => {}
                    Err(error) => {
                        if error.is_conflict() {
                            debug!(job_id = %self.id, "Runtime CAS conflict, invalidating cache");
                            self.inner.write().await.runtime = None;
                        }
                        return Err(error.into());
                    }
                }
            }
            UpdateMode::CacheOnly => {}
        }
        self.inner.write().await.runtime = Some(runtime.clone());
        Ok(runtime)
    }

    /// Primes the cache from already-durable state (recovery path).
    pub async fn hydrate(&self, version: u64, spec: JobSpec, runtime: JobRuntime) {
        let mut inner = self.inner.write().await;
        inner.specs.insert(version, spec);
        inner.runtime = Some(runtime);
    }

    /// Drops cached runtime and config so the next read hits the store.
    pub async fn invalidate(&self) {
        let mut inner = self.inner.write().await;
        inner.runtime = None;
        inner.specs.clear();
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    /// The cached task entry, created on first touch.
    pub async fn add_task(&self, instance: u32) -> Arc<CachedTask> {
        if let Some(task) = self.inner.read().await.tasks.get(&instance) {
            return Arc::clone(task);
        }
        let mut inner = self.inner.write().await;
        Arc::clone(inner.tasks.entry(instance).or_insert_with(|| {
            Arc::new(CachedTask::new(TaskId::new(self.id, instance)))
        }))
    }

    pub async fn get_task(&self, instance: u32) -> Option<Arc<CachedTask>> {
        self.inner.read().await.tasks.get(&instance).cloned()
    }

    /// Snapshot of all cached tasks keyed by instance.
    pub async fn all_tasks(&self) -> BTreeMap<u32, Arc<CachedTask>> {
        self.inner
            .read()
            .await
            .tasks
            .iter()
            .map(|(instance, task)| (*instance, Arc::clone(task)))
            .collect()
    }

    /// Writes a task runtime through to the store and cache, tracking the
    /// first and last task update times used for job start/completion.
    pub async fn update_task_runtime(
        &self,
        instance: u32,
        runtime: TaskRuntime,
        mode: UpdateMode,
        now: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        if mode == UpdateMode::CacheAndDb {
            self.store
                .put_task_runtime(TaskId::new(self.id, instance), &runtime)
                .await?;
        }
        let task = self.add_task(instance).await;
        task.set_runtime(runtime);

        let mut inner = self.inner.write().await;
        if inner.first_task_update.is_none() {
            inner.first_task_update = Some(now);
        }
        inner.last_task_update = Some(now);
        Ok(())
    }

    pub async fn first_task_update_time(&self) -> Option<DateTime<Utc>> {
        self.inner.read().await.first_task_update
    }

    pub async fn last_task_update_time(&self) -> Option<DateTime<Utc>> {
        self.inner.read().await.last_task_update
    }

    /// True while fewer instance records exist than the config calls for.
    pub async fn is_partially_created(&self) -> Result<bool, CacheError> {
        let (_, spec) = self.get_config().await?;
        let tasks = self.inner.read().await.tasks.len() as u32;
        Ok(tasks < spec.instance_count)
    }

    /// Recounts task states from the cache.
    ///
    /// Returns `None` when any cached task is still in `Unknown` state: a
    /// recount over a half-hydrated cache would undercount, so the caller
    /// falls back to the materialized view.
    pub async fn state_counts_from_cache(&self) -> Option<TaskStats> {
        let inner = self.inner.read().await;
        let mut stats = TaskStats::new();
        for task in inner.tasks.values() {
            let state = task.current_state();
            if state == armada_api::TaskState::Unknown {
                return None;
            }
            *stats.entry(state.as_str().to_string()).or_insert(0) += 1;
        }
        Some(stats)
    }

    /// Whether any cached task currently sits in the given state.
    pub async fn has_task_in_state(&self, state: armada_api::TaskState) -> bool {
        let inner = self.inner.read().await;
        inner.tasks.values().any(|t| t.current_state() == state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::JobCache;
    use crate::storage::MemStore;
    use armada_api::{JobState, TaskState};

    async fn cached_job() -> (Arc<MemStore>, Arc<CachedJob>) {
        let store = Arc::new(MemStore::new());
        let cache = JobCache::new(store.clone() as Arc<dyn Store>);
        let job_id = JobId::new();
        let job = cache.add_job(job_id).await;
        let spec = JobSpec {
            instance_count: 2,
            ..JobSpec::default()
        };
        job.create(1, spec, JobRuntime::initial(JobState::Succeeded, 1, Utc::now()))
            .await
            .unwrap();
        (store, job)
    }

    #[tokio::test]
    async fn test_update_runtime_bumps_revision() {
        let (_, job) = cached_job().await;
        let mut runtime = job.get_runtime().await.unwrap();
        assert_eq!(runtime.revision, 1);

        runtime.state = JobState::Pending;
        let committed = job
            .update_runtime(runtime, UpdateMode::CacheAndDb)
            .await
            .unwrap();
        assert_eq!(committed.revision, 2);
        assert_eq!(job.get_runtime().await.unwrap().state, JobState::Pending);
    }

    #[tokio::test]
    async fn test_conflict_invalidates_cache() {
        let (store, job) = cached_job().await;
        let runtime = job.get_runtime().await.unwrap();

        // Another writer slips in underneath the cache.
        let mut other = runtime.clone();
        other.revision = 2;
        other.state = JobState::Running;
        store
            .update_job_runtime(job.id(), &other, 1)
            .await
            .unwrap();

        let mut stale = runtime;
        stale.state = JobState::Pending;
        let err = job
            .update_runtime(stale, UpdateMode::CacheAndDb)
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        // The re-read sees the other writer's state.
        assert_eq!(job.get_runtime().await.unwrap().state, JobState::Running);
    }

    #[tokio::test]
    async fn test_partial_creation_and_counts() {
        let (_, job) = cached_job().await;
        assert!(job.is_partially_created().await.unwrap());

        let mut runtime = TaskRuntime::default();
        runtime.state = TaskState::Running;
        job.update_task_runtime(0, runtime.clone(), UpdateMode::CacheAndDb, Utc::now())
            .await
            .unwrap();
        runtime.state = TaskState::Succeeded;
        job.update_task_runtime(1, runtime, UpdateMode::CacheAndDb, Utc::now())
            .await
            .unwrap();

        assert!(!job.is_partially_created().await.unwrap());
        let counts = job.state_counts_from_cache().await.unwrap();
        assert_eq!(counts.get("RUNNING"), Some(&1));
        assert_eq!(counts.get("SUCCEEDED"), Some(&1));
        assert!(job.first_task_update_time().await.is_some());
    }

    #[tokio::test]
    async fn test_unknown_task_voids_recount() {
        let (_, job) = cached_job().await;
        job.add_task(0).await;
        assert!(job.state_counts_from_cache().await.is_none());
    }
}
