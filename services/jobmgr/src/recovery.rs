//! Startup recovery of in-flight jobs from the store.
//!
//! Walks the active-jobs set, drops entries that can no longer be
//! recovered, hydrates the cache, and enqueues everything back into the
//! goal-state engine. Task hydration runs in bounded-parallel batches;
//! each batch retries independently, and recovery as a whole fails only
//! when some batch exhausts its retries.

use std::sync::Arc;
use std::time::Duration;

use armada_api::JobType;
use armada_id::TaskId;
use anyhow::{anyhow, Result};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::cache::{CachedJob, JobCache, UpdateMode};
use crate::goalstate::Driver;
use crate::storage::Store;

/// Recovery tuning.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Instances hydrated per batch.
    pub batch_size: u32,

    /// Concurrent batches in flight.
    pub concurrency: usize,

    /// Retries per batch before recovery is declared failed.
    pub max_batch_retries: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            concurrency: 8,
            max_batch_retries: 3,
        }
    }
}

/// Recovers every active job, hydrating the cache and priming the engine.
pub async fn recover_active_jobs(
    store: Arc<dyn Store>,
    cache: Arc<JobCache>,
    driver: Arc<Driver>,
    config: RecoveryConfig,
) -> Result<()> {
    let active = store
        .list_active_jobs()
        .await
        .map_err(|e| anyhow!("listing active jobs: {e}"))?;
    info!(count = active.len(), "Recovering active jobs");

    let mut recovered = 0usize;
    for job_id in active {
        let runtime = store
            .get_job_runtime(job_id)
            .await
            .map_err(|e| anyhow!("fetching runtime for {job_id}: {e}"))?;
        let Some(runtime) = runtime else {
            // The only legitimate cause is an interrupted delete; finish it.
            warn!(%job_id, "Active job has no runtime, removing from active set");
            store
                .delete_active_job(job_id)
                .await
                .map_err(|e| anyhow!("pruning {job_id}: {e}"))?;
            continue;
        };

        let spec = store
            .get_job_config(job_id, runtime.config_version)
            .await
            .map_err(|e| anyhow!("fetching config for {job_id}: {e}"))?;
        let Some(spec) = spec else {
            warn!(%job_id, "Active job has no config, removing from active set");
            store
                .delete_active_job(job_id)
                .await
                .map_err(|e| anyhow!("pruning {job_id}: {e}"))?;
            continue;
        };

        // Terminal batch jobs are done for good; terminal service jobs
        // stay active so a restart can revive them.
        if runtime.state.is_terminal() && spec.job_type == JobType::Batch {
            info!(%job_id, state = %runtime.state, "Dropping terminal batch job from active set");
            store
                .delete_active_job(job_id)
                .await
                .map_err(|e| anyhow!("pruning {job_id}: {e}"))?;
            continue;
        }

        let job = cache.add_job(job_id).await;
        job.hydrate(runtime.config_version, spec.clone(), runtime)
            .await;

        recover_job_tasks(&store, &driver, &job, spec.instance_count, &config).await?;
        driver.enqueue_job(job_id, Duration::from_millis(100));
        recovered += 1;
    }

    info!(recovered, "Recovery complete");
    Ok(())
}

/// Hydrates one job's task runtimes in bounded-parallel, retried batches.
async fn recover_job_tasks(
    store: &Arc<dyn Store>,
    driver: &Arc<Driver>,
    job: &Arc<CachedJob>,
    instance_count: u32,
    config: &RecoveryConfig,
) -> Result<()> {
    let runtimes = store
        .list_task_runtimes(job.id())
        .await
        .map_err(|e| anyhow!("listing tasks for {}: {e}", job.id()))?;

    let instances: Vec<u32> = (0..instance_count)
        .filter(|i| runtimes.contains_key(i))
        .collect();
    let batches: Vec<Vec<u32>> = instances
        .chunks(config.batch_size.max(1) as usize)
        .map(|chunk| chunk.to_vec())
        .collect();

    let mut pending = batches.into_iter();
    let mut join_set: JoinSet<Result<()>> = JoinSet::new();
    let mut in_flight = 0usize;

    loop {
        while in_flight < config.concurrency {
            let Some(batch) = pending.next() else {
                break;
            };
            let job = Arc::clone(job);
            let driver = Arc::clone(driver);
            let runtimes = runtimes.clone();
            let max_retries = config.max_batch_retries;
            in_flight += 1;
            join_set.spawn(async move {
                let mut attempt = 0;
                loop {
                    match hydrate_batch(&job, &driver, &batch, &runtimes).await {
                        Ok(()) => return Ok(()),
                        Err(error) => {
                            attempt += 1;
                            if attempt > max_retries {
                                return Err(anyhow!(
                                    "batch for {} exhausted retries: {error}",
                                    job.id()
                                ));
                            }
                            warn!(
                                job_id = %job.id(),
                                attempt,
                                %error,
                                "Task recovery batch failed, retrying"
                            );
                            tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                        }
                    }
                }
            });
        }

        let Some(result) = join_set.join_next().await else {
            break;
        };
        in_flight -= 1;
        result.map_err(|e| anyhow!("recovery batch panicked: {e}"))??;
    }

    Ok(())
}

async fn hydrate_batch(
    job: &Arc<CachedJob>,
    driver: &Arc<Driver>,
    batch: &[u32],
    runtimes: &std::collections::BTreeMap<u32, armada_api::TaskRuntime>,
) -> Result<()> {
    for &instance in batch {
        let Some(runtime) = runtimes.get(&instance) else {
            continue;
        };
        job.update_task_runtime(
            instance,
            runtime.clone(),
            UpdateMode::CacheOnly,
            chrono::Utc::now(),
        )
        .await
        .map_err(|e| anyhow!("hydrating {}-{instance}: {e}", job.id()))?;
        driver.enqueue_task(
            TaskId::new(job.id(), instance),
            Duration::from_millis(100),
        );
    }
    Ok(())
}
