//! In-memory job and task cache.
//!
//! The cache is the single source of truth for hot-path decisions: every
//! durable write goes through it, so a successful commit leaves cache and
//! store agreeing. Reads fall back to the store on a cold entry and
//! populate the cache on the way out.
//!
//! Locking is sharded per job: the top-level map only guards membership,
//! and each [`CachedJob`] carries its own lock, so work on two jobs never
//! contends.

mod job;
mod task;

pub use job::{CachedJob, UpdateMode};
pub use task::CachedTask;

use std::collections::HashMap;
use std::sync::Arc;

use armada_id::JobId;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::storage::{Store, StoreError};

/// Errors from cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The job has no runtime anywhere; it does not exist.
    #[error("no runtime for job {0}")]
    MissingRuntime(JobId),

    /// The runtime references a config version that does not exist.
    #[error("no config version {version} for job {job_id}")]
    MissingConfig { job_id: JobId, version: u64 },
}

impl CacheError {
    /// Whether a retry with backoff can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(StoreError::Backend(_)))
    }

    /// Whether this is a CAS conflict the caller should retry from scratch.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(StoreError::Conflict { .. }))
    }
}

/// Process-wide index of cached jobs.
pub struct JobCache {
    store: Arc<dyn Store>,
    jobs: RwLock<HashMap<JobId, Arc<CachedJob>>>,
}

impl JobCache {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Gets the cached job, creating an empty shell if unknown.
    ///
    /// The shell lazily loads config and runtime from the store on first
    /// access, so adding a job id that does not exist is harmless.
    pub async fn add_job(&self, job_id: JobId) -> Arc<CachedJob> {
        if let Some(job) = self.jobs.read().await.get(&job_id) {
            return Arc::clone(job);
        }
        let mut jobs = self.jobs.write().await;
        Arc::clone(
            jobs.entry(job_id)
                .or_insert_with(|| Arc::new(CachedJob::new(job_id, Arc::clone(&self.store)))),
        )
    }

    /// Gets the cached job without creating it.
    pub async fn get_job(&self, job_id: JobId) -> Option<Arc<CachedJob>> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    /// Drops a job from the cache (not from the store).
    pub async fn remove_job(&self, job_id: JobId) {
        self.jobs.write().await.remove(&job_id);
    }

    /// Snapshot of every cached job id.
    pub async fn job_ids(&self) -> Vec<JobId> {
        self.jobs.read().await.keys().copied().collect()
    }

    /// Snapshot of every cached job, for metrics publishing and queries.
    pub async fn jobs(&self) -> Vec<Arc<CachedJob>> {
        self.jobs.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{JobRuntime, MemStore};
    use armada_api::{JobSpec, JobState};
    use chrono::Utc;

    fn setup() -> (Arc<MemStore>, JobCache) {
        let store = Arc::new(MemStore::new());
        let cache = JobCache::new(store.clone() as Arc<dyn Store>);
        (store, cache)
    }

    #[tokio::test]
    async fn test_add_job_is_idempotent() {
        let (_, cache) = setup();
        let job_id = JobId::new();
        let first = cache.add_job(job_id).await;
        let second = cache.add_job(job_id).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.job_ids().await, vec![job_id]);
    }

    #[tokio::test]
    async fn test_cold_entry_loads_from_store() {
        let (store, cache) = setup();
        let job_id = JobId::new();
        store
            .create_job_config(job_id, 1, &JobSpec::default())
            .await
            .unwrap();
        store
            .create_job_runtime(job_id, &JobRuntime::initial(JobState::Succeeded, 1, Utc::now()))
            .await
            .unwrap();

        let job = cache.add_job(job_id).await;
        let runtime = job.get_runtime().await.unwrap();
        assert_eq!(runtime.state, JobState::Initialized);
        let (version, _) = job.get_config().await.unwrap();
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn test_concurrent_add_and_iterate() {
        let (store, cache) = setup();
        let cache = Arc::new(cache);
        let now = Utc::now();

        for _ in 0..32 {
            let job_id = JobId::new();
            store
                .create_job_runtime(job_id, &JobRuntime::initial(JobState::Succeeded, 1, now))
                .await
                .unwrap();
            store
                .create_job_config(job_id, 1, &JobSpec::default())
                .await
                .unwrap();
            cache.add_job(job_id).await;
        }

        // Concurrent adders and a publisher iterating all jobs must not
        // deadlock, and the publisher sees every job.
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                for _ in 0..16 {
                    let job_id = JobId::new();
                    cache.add_job(job_id).await;
                }
            }));
        }
        let publisher = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                let mut seen = 0;
                for _ in 0..16 {
                    seen = cache.jobs().await.len();
                    tokio::task::yield_now().await;
                }
                seen
            })
        };

        for handle in handles {
            handle.await.unwrap();
        }
        let seen = publisher.await.unwrap();
        assert!(seen >= 32);
        assert_eq!(cache.job_ids().await.len(), 32 + 8 * 16);
    }
}
