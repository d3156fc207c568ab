//! Task (instance) spec and runtime wire types.

use std::collections::BTreeMap;

use armada_id::RunId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resources::ResourceSpec;

/// Observed state of a single task run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// State could not be determined (e.g. cache entry still hydrating).
    #[default]
    Unknown,
    /// Instance record written, not yet admitted for placement.
    Initialized,
    /// Admitted, waiting for resources.
    Pending,
    /// Matched to a host, launch not yet issued.
    Placed,
    /// Launch accepted by the cluster manager.
    Launched,
    /// Executor started, workload not yet running.
    Starting,
    Running,
    Succeeded,
    Failed,
    /// The cluster manager lost track of the run.
    Lost,
    Killing,
    Killed,
    Deleted,
}

impl TaskState {
    /// Stable name used as a task-stat key and stored column value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Initialized => "INITIALIZED",
            Self::Pending => "PENDING",
            Self::Placed => "PLACED",
            Self::Launched => "LAUNCHED",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Lost => "LOST",
            Self::Killing => "KILLING",
            Self::Killed => "KILLED",
            Self::Deleted => "DELETED",
        }
    }

    /// Parses a stable state name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UNKNOWN" => Some(Self::Unknown),
            "INITIALIZED" => Some(Self::Initialized),
            "PENDING" => Some(Self::Pending),
            "PLACED" => Some(Self::Placed),
            "LAUNCHED" => Some(Self::Launched),
            "STARTING" => Some(Self::Starting),
            "RUNNING" => Some(Self::Running),
            "SUCCEEDED" => Some(Self::Succeeded),
            "FAILED" => Some(Self::Failed),
            "LOST" => Some(Self::Lost),
            "KILLING" => Some(Self::Killing),
            "KILLED" => Some(Self::Killed),
            "DELETED" => Some(Self::Deleted),
            _ => None,
        }
    }

    /// Terminal states never transition further.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Lost | Self::Killed | Self::Deleted
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health as reported by the task's health check, if one is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthState {
    /// No health check configured for this task.
    #[default]
    Disabled,
    /// Health check configured but no report received yet.
    Unknown,
    Healthy,
    Unhealthy,
}

/// A persistent volume requested by a stateful task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Mount path inside the container.
    pub container_path: String,

    /// Volume size in megabytes.
    pub size_mb: u64,
}

/// Per-instance configuration.
///
/// A job carries one default config plus sparse per-instance overrides;
/// `JobSpec::task_config` resolves the effective config for an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskConfig {
    /// Resource requirement for one instance.
    #[serde(default)]
    pub resource: ResourceSpec,

    /// Marks the controller task (instance 0 of a batch job) whose outcome
    /// overrides the whole-job outcome.
    #[serde(default)]
    pub controller: bool,

    /// Whether the executor runs a health check for this task.
    #[serde(default)]
    pub health_check_enabled: bool,

    /// Whether this task may be placed on revocable resources.
    #[serde(default)]
    pub revocable: bool,

    /// Persistent volume, for stateful tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeSpec>,

    /// Free-form labels matched by scheduling constraints.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Task runtime as carried on the wire and persisted per instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskRuntime {
    pub state: TaskState,
    pub goal_state: TaskState,

    /// Current run attempt; `None` until the task is first launched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,

    /// Host the current run is placed on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Version of the job config this run was started from.
    pub config_version: u64,

    /// Version of the job config this task should converge to.
    pub desired_config_version: u64,

    #[serde(default)]
    pub healthy: HealthState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,

    /// Consecutive launch/run failures at the current config version.
    #[serde(default)]
    pub failure_count: u32,

    /// Human-readable reason for the last state change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
