//! Runtime-updater behavior: job state derived from task state counts,
//! including materialized-view divergence and controller tasks.

mod common;

use armada_api::{JobSpec, JobState, JobType, TaskRuntime, TaskState, TaskStats};
use armada_jobmgr::cache::UpdateMode;
use armada_jobmgr::goalstate::determine_job_state;
use armada_jobmgr::storage::{JobRuntime, Store};
use chrono::Utc;

use common::{create_job, harness};

fn stats(entries: &[(TaskState, u32)]) -> TaskStats {
    let mut stats = TaskStats::new();
    for (state, count) in entries {
        stats.insert(state.as_str().to_string(), *count);
    }
    stats
}

fn runtime(state: JobState, goal: JobState) -> JobRuntime {
    let mut r = JobRuntime::initial(goal, 1, Utc::now());
    r.state = state;
    r
}

fn batch_spec(n: u32) -> JobSpec {
    JobSpec {
        instance_count: n,
        job_type: JobType::Batch,
        ..JobSpec::default()
    }
}

fn service_spec(n: u32) -> JobSpec {
    JobSpec {
        instance_count: n,
        job_type: JobType::Service,
        ..JobSpec::default()
    }
}

async fn fill_tasks(
    harness: &common::Harness,
    job_id: armada_id::JobId,
    entries: &[(TaskState, u32)],
) {
    let job = harness.cache.get_job(job_id).await.unwrap();
    let mut instance = 0u32;
    for (state, count) in entries {
        for _ in 0..*count {
            let mut task = TaskRuntime::default();
            task.state = *state;
            task.goal_state = TaskState::Succeeded;
            task.config_version = 1;
            task.desired_config_version = 1;
            job.update_task_runtime(instance, task, UpdateMode::CacheAndDb, Utc::now())
                .await
                .unwrap();
            instance += 1;
        }
    }
}

// =============================================================================
// End-to-end scenarios through the job action
// =============================================================================

#[tokio::test]
async fn batch_job_succeeds() {
    let h = harness();
    let job_id = create_job(&h, JobType::Batch, 100, JobState::Succeeded).await;
    fill_tasks(&h, job_id, &[(TaskState::Succeeded, 100)]).await;

    h.driver.run_job_action(job_id).await.unwrap();

    let committed = h.store.get_job_runtime(job_id).await.unwrap().unwrap();
    assert_eq!(committed.state, JobState::Succeeded);
    assert_eq!(committed.task_stats.get("SUCCEEDED"), Some(&100));
    assert!(committed.start_time.is_some());
    assert!(committed.completion_time.is_some());
}

#[tokio::test]
async fn batch_job_failed_lost_mix() {
    let h = harness();
    let job_id = create_job(&h, JobType::Batch, 100, JobState::Succeeded).await;
    fill_tasks(
        &h,
        job_id,
        &[(TaskState::Failed, 50), (TaskState::Succeeded, 50)],
    )
    .await;

    h.driver.run_job_action(job_id).await.unwrap();

    let committed = h.store.get_job_runtime(job_id).await.unwrap().unwrap();
    assert_eq!(committed.state, JobState::Failed);
    assert!(committed.completion_time.is_some());
}

#[tokio::test]
async fn batch_job_running_mix() {
    let h = harness();
    let job_id = create_job(&h, JobType::Batch, 100, JobState::Succeeded).await;
    fill_tasks(
        &h,
        job_id,
        &[
            (TaskState::Pending, 25),
            (TaskState::Running, 25),
            (TaskState::Launched, 25),
            (TaskState::Succeeded, 25),
        ],
    )
    .await;

    h.driver.run_job_action(job_id).await.unwrap();
    let committed = h.store.get_job_runtime(job_id).await.unwrap().unwrap();
    assert_eq!(committed.state, JobState::Running);
}

#[tokio::test]
async fn killed_job_with_no_tasks_gets_completion_time() {
    let h = harness();
    let job_id = create_job(&h, JobType::Batch, 0, JobState::Succeeded).await;

    // Instance count zero: immediately terminal with a completion time
    // even though no task ever ran.
    h.driver.run_job_action(job_id).await.unwrap();
    let committed = h.store.get_job_runtime(job_id).await.unwrap().unwrap();
    assert!(committed.state.is_terminal());
    assert_eq!(committed.state, JobState::Succeeded);
    assert!(committed.completion_time.is_some());
}

#[tokio::test]
async fn terminal_batch_job_untracks_on_followup_pass() {
    let h = harness();
    let job_id = create_job(&h, JobType::Batch, 4, JobState::Succeeded).await;
    fill_tasks(&h, job_id, &[(TaskState::Succeeded, 4)]).await;

    // First pass: terminal transition. Second pass: untrack.
    h.driver.run_job_action(job_id).await.unwrap();
    h.driver.run_job_action(job_id).await.unwrap();

    assert!(h.store.list_active_jobs().await.unwrap().is_empty());
    assert!(h.cache.get_job(job_id).await.is_none());
}

#[tokio::test]
async fn diverged_view_recounted_from_cache() {
    let h = harness();
    let job_id = create_job(&h, JobType::Batch, 10, JobState::Succeeded).await;
    fill_tasks(&h, job_id, &[(TaskState::Succeeded, 10)]).await;

    // The view claims more tasks than configured; the cache recount wins.
    h.store.inject_task_state_summary(
        job_id,
        stats(&[(TaskState::Killing, 10), (TaskState::Killed, 10)]),
    );

    h.driver.run_job_action(job_id).await.unwrap();
    let committed = h.store.get_job_runtime(job_id).await.unwrap().unwrap();
    assert_eq!(committed.state, JobState::Succeeded);
    assert_eq!(committed.task_stats.get("SUCCEEDED"), Some(&10));
}

#[tokio::test]
async fn half_hydrated_cache_falls_back_to_view() {
    let h = harness();
    let job_id = create_job(&h, JobType::Service, 10, JobState::Running).await;
    fill_tasks(&h, job_id, &[(TaskState::Running, 10)]).await;

    // One cache entry is a bare shell in UNKNOWN state; the recount is
    // void and the (injected) view counts win.
    let job = h.cache.get_job(job_id).await.unwrap();
    job.add_task(10).await;
    h.store
        .inject_task_state_summary(job_id, stats(&[(TaskState::Running, 10)]));

    h.driver.run_job_action(job_id).await.unwrap();
    let committed = h.store.get_job_runtime(job_id).await.unwrap().unwrap();
    assert_eq!(committed.state, JobState::Running);
}

#[tokio::test]
async fn stop_then_reconcile_reaches_killed() {
    let h = harness();
    let job_id = create_job(&h, JobType::Batch, 3, JobState::Succeeded).await;
    fill_tasks(&h, job_id, &[(TaskState::Running, 3)]).await;
    // Give each running task a run id so the kill has something to stop.
    let job = h.cache.get_job(job_id).await.unwrap();
    for instance in 0..3 {
        let task = job.get_task(instance).await.unwrap();
        let mut runtime = task.runtime().unwrap();
        runtime.run_id = Some(armada_id::RunId::initial(armada_id::TaskId::new(
            job_id, instance,
        )));
        job.update_task_runtime(instance, runtime, UpdateMode::CacheAndDb, Utc::now())
            .await
            .unwrap();
    }

    // Flip the goal and run the job action: the kill path fires.
    let mut runtime = job.get_runtime().await.unwrap();
    runtime.goal_state = JobState::Killed;
    job.update_runtime(runtime, UpdateMode::CacheAndDb)
        .await
        .unwrap();

    h.driver.run_job_action(job_id).await.unwrap();
    assert_eq!(h.hosts.killed_runs().len(), 3);
    let committed = h.store.get_job_runtime(job_id).await.unwrap().unwrap();
    assert_eq!(committed.state, JobState::Killing);

    // Observed kills settle the tasks; reconciliation lands on KILLED.
    fill_tasks(&h, job_id, &[(TaskState::Killed, 3)]).await;
    h.driver.run_job_action(job_id).await.unwrap();
    let committed = h.store.get_job_runtime(job_id).await.unwrap().unwrap();
    assert_eq!(committed.state, JobState::Killed);
}

// =============================================================================
// State determination rules
// =============================================================================

#[test]
fn all_killed_with_goal_succeeded_is_killed() {
    let state = determine_job_state(
        &batch_spec(100),
        &runtime(JobState::Pending, JobState::Succeeded),
        &stats(&[(TaskState::Killed, 100)]),
        None,
    );
    assert_eq!(state, JobState::Killed);
}

#[test]
fn mixed_failed_and_killed_fails() {
    let state = determine_job_state(
        &batch_spec(100),
        &runtime(JobState::Pending, JobState::Succeeded),
        &stats(&[
            (TaskState::Failed, 25),
            (TaskState::Lost, 25),
            (TaskState::Killed, 25),
            (TaskState::Succeeded, 25),
        ]),
        None,
    );
    assert_eq!(state, JobState::Failed);
}

#[test]
fn killing_tasks_report_killing() {
    let state = determine_job_state(
        &batch_spec(100),
        &runtime(JobState::Killing, JobState::Killed),
        &stats(&[
            (TaskState::Killing, 25),
            (TaskState::Killed, 50),
            (TaskState::Succeeded, 25),
        ]),
        None,
    );
    assert_eq!(state, JobState::Killing);
}

#[test]
fn partially_created_batch_reports_initialized() {
    let state = determine_job_state(
        &batch_spec(100),
        &runtime(JobState::Pending, JobState::Succeeded),
        &stats(&[(TaskState::Pending, 49), (TaskState::Succeeded, 49)]),
        None,
    );
    assert_eq!(state, JobState::Initialized);
}

#[test]
fn partially_created_service_with_goal_deleted() {
    // No KILLED instances: the partial create failed outright.
    let state = determine_job_state(
        &service_spec(100),
        &runtime(JobState::Pending, JobState::Deleted),
        &stats(&[(TaskState::Failed, 33), (TaskState::Lost, 33)]),
        None,
    );
    assert_eq!(state, JobState::Failed);

    // A KILLED subset flips the verdict to KILLED.
    let state = determine_job_state(
        &service_spec(100),
        &runtime(JobState::Pending, JobState::Deleted),
        &stats(&[
            (TaskState::Failed, 33),
            (TaskState::Lost, 33),
            (TaskState::Killed, 33),
        ]),
        None,
    );
    assert_eq!(state, JobState::Killed);
}

#[test]
fn partially_created_service_otherwise_keeps_state() {
    let state = determine_job_state(
        &service_spec(100),
        &runtime(JobState::Pending, JobState::Running),
        &stats(&[(TaskState::Failed, 33), (TaskState::Killed, 33)]),
        None,
    );
    assert_eq!(state, JobState::Pending);
}

#[test]
fn controller_task_overrides_outcome() {
    let spec = {
        let mut spec = batch_spec(10);
        spec.default_config.controller = true;
        spec
    };

    // Controller failed while every other instance succeeded: job fails.
    let state = determine_job_state(
        &spec,
        &runtime(JobState::Running, JobState::Succeeded),
        &stats(&[(TaskState::Succeeded, 9), (TaskState::Failed, 1)]),
        Some(TaskState::Failed),
    );
    assert_eq!(state, JobState::Failed);

    // Controller succeeded: job succeeds.
    let state = determine_job_state(
        &spec,
        &runtime(JobState::Running, JobState::Succeeded),
        &stats(&[(TaskState::Succeeded, 10)]),
        Some(TaskState::Succeeded),
    );
    assert_eq!(state, JobState::Succeeded);
}

#[test]
fn lost_controller_waits_for_remaining_tasks() {
    let spec = {
        let mut spec = batch_spec(10);
        spec.default_config.controller = true;
        spec
    };

    // The controller is LOST but other tasks still run: no terminal
    // verdict until everything settles.
    let state = determine_job_state(
        &spec,
        &runtime(JobState::Running, JobState::Succeeded),
        &stats(&[(TaskState::Running, 5), (TaskState::Lost, 5)]),
        Some(TaskState::Lost),
    );
    assert_eq!(state, JobState::Running);

    // Once everything is terminal the lost controller decides.
    let state = determine_job_state(
        &spec,
        &runtime(JobState::Running, JobState::Succeeded),
        &stats(&[(TaskState::Succeeded, 5), (TaskState::Lost, 5)]),
        Some(TaskState::Lost),
    );
    assert_eq!(state, JobState::Failed);

    // While the controller itself is still running, counts rule.
    let state = determine_job_state(
        &spec,
        &runtime(JobState::Running, JobState::Succeeded),
        &stats(&[(TaskState::Running, 1), (TaskState::Succeeded, 9)]),
        Some(TaskState::Running),
    );
    assert_eq!(state, JobState::Running);
}
