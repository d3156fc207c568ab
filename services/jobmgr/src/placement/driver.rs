//! Placement driver: the loop coupling pending tasks to host offers.
//!
//! Each cycle scans the cache for tasks awaiting placement, groups them
//! through the strategy, acquires matching host offers, launches what was
//! placed, and releases what was not.

use std::sync::Arc;
use std::time::Duration;

use armada_api::rpc::LaunchableTask;
use armada_api::{HostOffer, TaskState};
use armada_id::RunId;
use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use super::{Assignment, PlacementStrategy};
use crate::cache::UpdateMode;
use crate::goalstate::Driver;

/// Placement driver tuning.
#[derive(Debug, Clone)]
pub struct PlacementConfig {
    /// Interval between placement cycles.
    pub interval: Duration,

    /// Upper bound on tasks considered per cycle.
    pub max_assignments_per_cycle: usize,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_assignments_per_cycle: 256,
        }
    }
}

/// The placement loop.
pub struct PlacementDriver {
    driver: Arc<Driver>,
    strategy: Arc<dyn PlacementStrategy>,
    config: PlacementConfig,

    /// Serializes `place` for strategies that are not concurrency safe.
    serialize: Option<Mutex<()>>,
}

impl PlacementDriver {
    pub fn new(
        driver: Arc<Driver>,
        strategy: Arc<dyn PlacementStrategy>,
        config: PlacementConfig,
    ) -> Self {
        let serialize = if strategy.concurrency_safe() {
            None
        } else {
            Some(Mutex::new(()))
        };
        Self {
            driver,
            strategy,
            config,
            serialize,
        }
    }

    /// Runs placement cycles until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            "Starting placement driver"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(error) = self.place_once().await {
                        error!(%error, "Placement cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Placement driver shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One full placement cycle.
    pub async fn place_once(&self) -> anyhow::Result<()> {
        let assignments = self.collect_assignments().await;
        if assignments.is_empty() {
            return Ok(());
        }
        debug!(count = assignments.len(), "Placing pending tasks");

        for (filter, indices) in self.strategy.filters(&assignments) {
            let group: Vec<Assignment> =
                indices.iter().map(|&i| assignments[i].clone()).collect();

            let response = match self.driver.hosts.acquire_host_offers(&filter).await {
                Ok(response) => response,
                Err(error) => {
                    warn!(%error, "Failed to acquire host offers");
                    continue;
                }
            };
            if response.host_offers.is_empty() {
                debug!(
                    passed_over = ?response.filter_result_counts,
                    "No hosts matched filter"
                );
                continue;
            }

            let placements = match &self.serialize {
                Some(lock) => {
                    let _guard = lock.lock().await;
                    self.strategy.place(&group, &response.host_offers)
                }
                None => self.strategy.place(&group, &response.host_offers),
            };

            // Launch per host; hosts that got nothing are released.
            let mut used = vec![false; response.host_offers.len()];
            for host_index in 0..response.host_offers.len() {
                let host_tasks: Vec<&Assignment> = placements
                    .iter()
                    .filter(|(_, &h)| h == host_index)
                    .map(|(&t, _)| &group[t])
                    .collect();
                if host_tasks.is_empty() {
                    continue;
                }
                used[host_index] = true;
                self.launch_on_host(&response.host_offers[host_index], &host_tasks)
                    .await;
            }

            let unused: Vec<HostOffer> = response
                .host_offers
                .into_iter()
                .zip(used)
                .filter(|(_, used)| !used)
                .map(|(host, _)| host)
                .collect();
            if !unused.is_empty() {
                if let Err(error) = self.driver.hosts.release_host_offers(&unused).await {
                    warn!(%error, "Failed to release unused host offers");
                }
            }
        }
        Ok(())
    }

    /// Pending-task scan over the cache.
    async fn collect_assignments(&self) -> Vec<Assignment> {
        let mut assignments = Vec::new();
        for job in self.driver.cache.jobs().await {
            let Ok((_, spec)) = job.get_config().await else {
                continue;
            };
            for (instance, task) in job.all_tasks().await {
                if assignments.len() >= self.config.max_assignments_per_cycle {
                    return assignments;
                }
                let Some(runtime) = task.runtime() else {
                    continue;
                };
                let awaiting = matches!(
                    runtime.state,
                    TaskState::Initialized | TaskState::Pending
                ) && matches!(
                    runtime.goal_state,
                    TaskState::Running | TaskState::Succeeded
                );
                if !awaiting {
                    continue;
                }
                assignments.push(Assignment {
                    task_id: task.task_id(),
                    config: spec.task_config(instance).clone(),
                    preferred_host: runtime.host.clone(),
                });
            }
        }
        assignments
    }

    /// Claims the host and records launched runtimes.
    async fn launch_on_host(&self, host: &HostOffer, tasks: &[&Assignment]) {
        let now = Utc::now();
        let mut launchable = Vec::with_capacity(tasks.len());
        let mut runs = Vec::with_capacity(tasks.len());

        for assignment in tasks {
            let task_id = assignment.task_id;
            // A restarted task already carries its next run id; a first
            // launch mints the initial one.
            let existing_run = match self.driver.cache.get_job(task_id.job_id).await {
                Some(job) => match job.get_task(task_id.instance).await {
                    Some(task) => task.runtime().and_then(|r| r.run_id),
                    None => None,
                },
                None => None,
            };
            let run_id = existing_run.unwrap_or_else(|| RunId::initial(task_id));
            launchable.push(LaunchableTask {
                run_id,
                config: assignment.config.clone(),
            });
            runs.push((task_id, run_id));
        }

        if let Err(error) = self
            .driver
            .hosts
            .launch_tasks(&host.hostname, host.host_offer_id, launchable)
            .await
        {
            warn!(
                hostname = %host.hostname,
                %error,
                "Launch failed, tasks stay pending"
            );
            return;
        }

        for (task_id, run_id) in runs {
            let Some(job) = self.driver.cache.get_job(task_id.job_id).await else {
                continue;
            };
            let Some(task) = job.get_task(task_id.instance).await else {
                continue;
            };
            let Some(mut runtime) = task.runtime() else {
                continue;
            };
            runtime.state = TaskState::Launched;
            runtime.host = Some(host.hostname.clone());
            runtime.run_id = Some(run_id);
            if let Err(error) = job
                .update_task_runtime(task_id.instance, runtime, UpdateMode::CacheAndDb, now)
                .await
            {
                warn!(%task_id, %error, "Failed to record launch");
                continue;
            }
            self.driver
                .enqueue_task(task_id, self.driver.config.progress_delay);
            self.driver
                .enqueue_job(task_id.job_id, self.driver.config.progress_delay);
        }

        info!(
            hostname = %host.hostname,
            tasks = tasks.len(),
            "Launched tasks"
        );
    }
}
