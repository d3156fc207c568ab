//! Placement driver behavior: pending tasks coupled to acquired offers.

mod common;

use std::sync::Arc;

use armada_api::{JobState, JobType, TaskState};
use armada_jobmgr::placement::{BatchStrategy, PlacementConfig, PlacementDriver};
use common::{create_job, harness};

#[tokio::test]
async fn pending_tasks_launch_on_acquired_hosts() {
    let h = harness();
    let job_id = create_job(&h, JobType::Batch, 2, JobState::Succeeded).await;

    // Materialize the instance records via the job action.
    h.driver.run_job_action(job_id).await.unwrap();

    h.hosts.stage_offer("host-a", 8.0);
    let placement = PlacementDriver::new(
        Arc::clone(&h.driver),
        Arc::new(BatchStrategy),
        PlacementConfig::default(),
    );
    placement.place_once().await.unwrap();

    // Both instances fit one host and were launched together.
    let launched = h.hosts.launched.lock().unwrap().clone();
    assert_eq!(launched.len(), 1);
    assert_eq!(launched[0].0, "host-a");
    assert_eq!(launched[0].1.len(), 2);

    // The cache records the launch.
    let job = h.cache.get_job(job_id).await.unwrap();
    for instance in 0..2u32 {
        let runtime = job.get_task(instance).await.unwrap().runtime().unwrap();
        assert_eq!(runtime.state, TaskState::Launched);
        assert_eq!(runtime.host.as_deref(), Some("host-a"));
        assert!(runtime.run_id.is_some());
    }
}

#[tokio::test]
async fn nothing_pending_means_no_acquire() {
    let h = harness();
    h.hosts.stage_offer("host-a", 8.0);

    let placement = PlacementDriver::new(
        Arc::clone(&h.driver),
        Arc::new(BatchStrategy),
        PlacementConfig::default(),
    );
    placement.place_once().await.unwrap();

    // The staged offer was never consumed or released.
    assert!(h.hosts.launched.lock().unwrap().is_empty());
    assert_eq!(h.hosts.offers_to_return.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn oversized_task_releases_unused_hosts() {
    let h = harness();
    let job_id = create_job(&h, JobType::Batch, 1, JobState::Succeeded).await;
    h.driver.run_job_action(job_id).await.unwrap();

    // Inflate the demand beyond what the staged host can offer.
    let job = h.cache.get_job(job_id).await.unwrap();
    let (_, mut spec) = job.get_config().await.unwrap();
    spec.default_config.resource.cpu = 64.0;
    job.add_config_version(2, spec).await.unwrap();
    let mut runtime = job.get_runtime().await.unwrap();
    runtime.config_version = 2;
    job.update_runtime(runtime, armada_jobmgr::cache::UpdateMode::CacheAndDb)
        .await
        .unwrap();

    h.hosts.stage_offer("host-small", 2.0);
    let placement = PlacementDriver::new(
        Arc::clone(&h.driver),
        Arc::new(BatchStrategy),
        PlacementConfig::default(),
    );
    placement.place_once().await.unwrap();

    assert!(h.hosts.launched.lock().unwrap().is_empty());
    assert_eq!(
        h.hosts.released.lock().unwrap().clone(),
        vec!["host-small".to_string()]
    );
}
