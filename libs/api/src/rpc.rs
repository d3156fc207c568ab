//! Request and response payloads for the two HTTP surfaces.

use std::collections::BTreeMap;

use armada_id::{JobId, RunId, TaskId, WorkflowId};
use serde::{Deserialize, Serialize};

use crate::host::{HostFilter, HostInfo, HostOffer, HostQuery, HostStatus, Offer};
use crate::job::{JobSpec, JobState, JobStatus, JobSummary};
use crate::resources::ResourceSpec;
use crate::task::{TaskConfig, TaskRuntime};
use crate::workflow::{WorkflowSpec, WorkflowStatus};

// =============================================================================
// Job manager surface
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub spec: JobSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobResponse {
    pub job_id: JobId,
}

/// Updates a job's spec, starting a rolling workflow over the change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateJobRequest {
    pub spec: JobSpec,
    #[serde(default)]
    pub workflow: WorkflowSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateJobResponse {
    pub workflow_id: WorkflowId,
    pub config_version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetJobResponse {
    pub job_id: JobId,
    pub spec: JobSpec,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobSummary>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryJobsRequest {
    #[serde(default)]
    pub states: Vec<JobState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_contains: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryJobsResponse {
    pub jobs: Vec<JobSummary>,
}

/// Restart a job's instances; empty ranges mean every instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestartJobRequest {
    #[serde(default)]
    pub instance_ranges: Vec<InstanceRange>,
    #[serde(default)]
    pub workflow: WorkflowSpec,
}

/// Half-open instance index range `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRange {
    pub from: u32,
    pub to: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartJobResponse {
    pub workflow_id: WorkflowId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobVersionResponse {
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowOpResponse {
    pub workflow_status: WorkflowStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTaskResponse {
    pub task_id: TaskId,
    pub runtime: TaskRuntime,
}

/// Observed task status pushed by the cluster manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusEvent {
    pub run_id: RunId,
    pub state: crate::task::TaskState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthy: Option<crate::task::HealthState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Agent the run executes on; needed to shut down orphan executors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    pub timestamp: chrono::DateTime<chrono::Utc>,
}

// =============================================================================
// Host manager surface
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddOffersRequest {
    pub offers: Vec<Offer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescindOfferRequest {
    pub offer_id: armada_id::OfferId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireHostOffersRequest {
    pub filter: HostFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireHostOffersResponse {
    pub host_offers: Vec<HostOffer>,

    /// How many hosts fell into each non-match bucket, keyed by
    /// `HostFilterResult` name. Useful for placement diagnostics.
    #[serde(default)]
    pub filter_result_counts: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseHostOffersRequest {
    pub host_offers: Vec<HostOffer>,
}

/// A task ready to launch on a claimed host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchableTask {
    pub run_id: RunId,
    pub config: TaskConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchTasksRequest {
    pub hostname: String,
    pub host_offer_id: armada_id::HostOfferId,
    pub tasks: Vec<LaunchableTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillTasksRequest {
    pub run_ids: Vec<RunId>,
}

/// Kill a run and keep its host held for the replacement run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillAndReserveEntry {
    pub run_id: RunId,
    pub hostname: String,
    /// Task the hold is kept for.
    pub task_id: TaskId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillAndReserveTasksRequest {
    pub entries: Vec<KillAndReserveEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownExecutorEntry {
    pub executor_id: String,
    pub agent_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownExecutorsRequest {
    pub entries: Vec<ShutdownExecutorEntry>,
}

/// Reserve resources and create a persistent volume, composed into a single
/// call when launching stateful tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveHostRequest {
    pub hostname: String,
    pub task_id: TaskId,
    pub resources: ResourceSpec,
    pub volume: crate::task::VolumeSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetHostsByQueryRequest {
    pub query: HostQuery,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetHostsByQueryResponse {
    pub hosts: Vec<HostInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostMaintenanceRequest {
    pub hostnames: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryHostsRequest {
    #[serde(default)]
    pub statuses: Vec<HostStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryHostsResponse {
    pub hosts: Vec<HostInfo>,

    /// Hosts currently drained for maintenance.
    #[serde(default)]
    pub draining: Vec<String>,
}
