//! Recovery behavior: active-set filtering and cache hydration.

mod common;

use std::sync::Arc;

use armada_api::{JobSpec, JobState, JobType, TaskRuntime, TaskState};
use armada_id::{JobId, TaskId};
use armada_jobmgr::recovery::{recover_active_jobs, RecoveryConfig};
use armada_jobmgr::storage::{JobRuntime, Store};
use chrono::Utc;

use common::harness;

fn spec(job_type: JobType, instances: u32) -> JobSpec {
    let mut spec = JobSpec {
        name: "recovered".into(),
        job_type,
        instance_count: instances,
        ..JobSpec::default()
    };
    spec.default_config.resource.cpu = 1.0;
    spec
}

fn runtime(state: JobState, goal: JobState) -> JobRuntime {
    let mut runtime = JobRuntime::initial(goal, 1, Utc::now());
    runtime.state = state;
    runtime
}

#[tokio::test]
async fn recovery_filters_and_hydrates() {
    let h = harness();

    // A healthy running service job with three tasks.
    let running_id = JobId::new();
    h.store.add_active_job(running_id).await.unwrap();
    h.store
        .create_job_config(running_id, 1, &spec(JobType::Service, 3))
        .await
        .unwrap();
    h.store
        .create_job_runtime(running_id, &runtime(JobState::Running, JobState::Running))
        .await
        .unwrap();
    for instance in 0..3u32 {
        let mut task = TaskRuntime::default();
        task.state = TaskState::Running;
        task.goal_state = TaskState::Running;
        task.config_version = 1;
        task.desired_config_version = 1;
        h.store
            .put_task_runtime(TaskId::new(running_id, instance), &task)
            .await
            .unwrap();
    }

    // An active entry whose runtime is gone (interrupted delete).
    let orphan_id = JobId::new();
    h.store.add_active_job(orphan_id).await.unwrap();

    // A terminal batch job that should leave the active set.
    let done_id = JobId::new();
    h.store.add_active_job(done_id).await.unwrap();
    h.store
        .create_job_config(done_id, 1, &spec(JobType::Batch, 1))
        .await
        .unwrap();
    h.store
        .create_job_runtime(done_id, &runtime(JobState::Succeeded, JobState::Succeeded))
        .await
        .unwrap();

    // A terminal service job, which stays active for potential restart.
    let parked_id = JobId::new();
    h.store.add_active_job(parked_id).await.unwrap();
    h.store
        .create_job_config(parked_id, 1, &spec(JobType::Service, 1))
        .await
        .unwrap();
    h.store
        .create_job_runtime(parked_id, &runtime(JobState::Killed, JobState::Killed))
        .await
        .unwrap();

    recover_active_jobs(
        h.store.clone() as Arc<dyn Store>,
        Arc::clone(&h.cache),
        Arc::clone(&h.driver),
        RecoveryConfig::default(),
    )
    .await
    .unwrap();

    // Filtering: orphan and terminal batch pruned, the rest kept.
    let active = h.store.list_active_jobs().await.unwrap();
    assert!(active.contains(&running_id));
    assert!(active.contains(&parked_id));
    assert!(!active.contains(&orphan_id));
    assert!(!active.contains(&done_id));

    // Hydration: the running job is in cache with all tasks populated.
    let job = h.cache.get_job(running_id).await.unwrap();
    let counts = job.state_counts_from_cache().await.unwrap();
    assert_eq!(counts.get("RUNNING"), Some(&3));

    // The engine was primed with the job and its tasks.
    let (jobs_queued, tasks_queued, _) = h.driver.queue_depths();
    assert!(jobs_queued >= 2);
    assert!(tasks_queued >= 3);
}

#[tokio::test]
async fn recovered_job_reconciles_immediately() {
    let h = harness();

    let job_id = JobId::new();
    h.store.add_active_job(job_id).await.unwrap();
    h.store
        .create_job_config(job_id, 1, &spec(JobType::Batch, 2))
        .await
        .unwrap();
    h.store
        .create_job_runtime(job_id, &runtime(JobState::Running, JobState::Succeeded))
        .await
        .unwrap();
    for instance in 0..2u32 {
        let mut task = TaskRuntime::default();
        task.state = TaskState::Succeeded;
        task.goal_state = TaskState::Succeeded;
        task.config_version = 1;
        task.desired_config_version = 1;
        h.store
            .put_task_runtime(TaskId::new(job_id, instance), &task)
            .await
            .unwrap();
    }

    recover_active_jobs(
        h.store.clone() as Arc<dyn Store>,
        Arc::clone(&h.cache),
        Arc::clone(&h.driver),
        RecoveryConfig::default(),
    )
    .await
    .unwrap();

    // The first reconciliation pass after recovery finds the finished
    // tasks and lands the job on SUCCEEDED.
    h.driver.run_job_action(job_id).await.unwrap();
    let committed = h.store.get_job_runtime(job_id).await.unwrap().unwrap();
    assert_eq!(committed.state, JobState::Succeeded);
}
