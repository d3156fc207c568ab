//! Shared test harness: an in-memory store wired to a scripted host
//! manager.

use std::sync::{Arc, Mutex};

use armada_api::rpc::{
    AcquireHostOffersResponse, KillAndReserveEntry, LaunchableTask, ShutdownExecutorEntry,
};
use armada_api::{HostFilter, HostOffer, JobSpec, JobState, JobType, ResourceSpec};
use armada_id::{HostOfferId, JobId, RunId, TaskId};
use async_trait::async_trait;
use chrono::Utc;

use armada_jobmgr::cache::JobCache;
use armada_jobmgr::goalstate::{Driver, DriverConfig};
use armada_jobmgr::hostclient::{HostClientError, HostManagerClient};
use armada_jobmgr::storage::{JobRuntime, MemStore, Store};

/// Records every call; hands out canned host offers.
#[derive(Default)]
pub struct FakeHostManager {
    pub killed: Mutex<Vec<RunId>>,
    pub launched: Mutex<Vec<(String, Vec<LaunchableTask>)>>,
    pub released: Mutex<Vec<String>>,
    pub offers_to_return: Mutex<Vec<HostOffer>>,
}

impl FakeHostManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn killed_runs(&self) -> Vec<RunId> {
        self.killed.lock().unwrap().clone()
    }

    pub fn stage_offer(&self, hostname: &str, cpu: f64) {
        self.offers_to_return.lock().unwrap().push(HostOffer {
            hostname: hostname.to_string(),
            host_offer_id: HostOfferId::new(),
            offers: vec![armada_api::Offer {
                id: armada_id::OfferId::from(format!("{hostname}-offer")),
                hostname: hostname.to_string(),
                agent_id: hostname.to_string(),
                resources: ResourceSpec {
                    cpu,
                    mem_mb: 4096.0,
                    disk_mb: 4096.0,
                    gpu: 0.0,
                    ports: 8,
                },
                revocable: false,
                attributes: Default::default(),
                reservation: None,
            }],
        });
    }
}

#[async_trait]
impl HostManagerClient for FakeHostManager {
    async fn acquire_host_offers(
        &self,
        _filter: &HostFilter,
    ) -> Result<AcquireHostOffersResponse, HostClientError> {
        let host_offers = std::mem::take(&mut *self.offers_to_return.lock().unwrap());
        Ok(AcquireHostOffersResponse {
            host_offers,
            filter_result_counts: Default::default(),
        })
    }

    async fn release_host_offers(&self, host_offers: &[HostOffer]) -> Result<(), HostClientError> {
        let mut released = self.released.lock().unwrap();
        released.extend(host_offers.iter().map(|h| h.hostname.clone()));
        Ok(())
    }

    async fn launch_tasks(
        &self,
        hostname: &str,
        _host_offer_id: HostOfferId,
        tasks: Vec<LaunchableTask>,
    ) -> Result<(), HostClientError> {
        self.launched
            .lock()
            .unwrap()
            .push((hostname.to_string(), tasks));
        Ok(())
    }

    async fn kill_tasks(&self, run_ids: &[RunId]) -> Result<(), HostClientError> {
        self.killed.lock().unwrap().extend_from_slice(run_ids);
        Ok(())
    }

    async fn kill_and_reserve_tasks(
        &self,
        entries: &[KillAndReserveEntry],
    ) -> Result<(), HostClientError> {
        self.killed
            .lock()
            .unwrap()
            .extend(entries.iter().map(|e| e.run_id));
        Ok(())
    }

    async fn shutdown_executors(
        &self,
        _entries: &[ShutdownExecutorEntry],
    ) -> Result<(), HostClientError> {
        Ok(())
    }

    async fn release_hold(&self, _task_id: TaskId) -> Result<(), HostClientError> {
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<MemStore>,
    pub cache: Arc<JobCache>,
    pub hosts: Arc<FakeHostManager>,
    pub driver: Arc<Driver>,
}

/// Builds the standard harness with default driver tuning.
pub fn harness() -> Harness {
    harness_with(DriverConfig::default())
}

pub fn harness_with(config: DriverConfig) -> Harness {
    let store = Arc::new(MemStore::new());
    let cache = Arc::new(JobCache::new(store.clone() as Arc<dyn Store>));
    let hosts = FakeHostManager::new();
    let driver = Driver::new(
        Arc::clone(&cache),
        store.clone() as Arc<dyn Store>,
        hosts.clone() as Arc<dyn HostManagerClient>,
        config,
    );
    Harness {
        store,
        cache,
        hosts,
        driver,
    }
}

/// Creates a job in store and cache, returning its id.
pub async fn create_job(
    harness: &Harness,
    job_type: JobType,
    instance_count: u32,
    goal_state: JobState,
) -> JobId {
    let job_id = JobId::new();
    let mut spec = JobSpec {
        name: format!("test-{job_id}"),
        job_type,
        instance_count,
        ..JobSpec::default()
    };
    spec.default_config.resource.cpu = 1.0;
    spec.default_config.resource.mem_mb = 128.0;

    let job = harness.cache.add_job(job_id).await;
    job.create(1, spec, JobRuntime::initial(goal_state, 1, Utc::now()))
        .await
        .unwrap();
    harness.store.add_active_job(job_id).await.unwrap();
    job_id
}
