//! Job spec and status wire types.

use std::collections::BTreeMap;

use armada_id::JobId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::TaskConfig;
use crate::workflow::WorkflowStatus;

/// How a job's instances are expected to terminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    /// Runs to completion; instances are expected to succeed.
    #[default]
    Batch,
    /// Long-running; instances are expected to stay up.
    Service,
}

/// Aggregated state of a job, derived from its task states.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Instance records are still being created.
    #[default]
    Initialized,
    /// All instances created, none running yet.
    Pending,
    Running,
    Succeeded,
    Failed,
    Killing,
    Killed,
    Deleted,
}

impl JobState {
    /// Stable name used on the wire and in stored columns.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "INITIALIZED",
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Killing => "KILLING",
            Self::Killed => "KILLED",
            Self::Deleted => "DELETED",
        }
    }

    /// Parses a stable state name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INITIALIZED" => Some(Self::Initialized),
            "PENDING" => Some(Self::Pending),
            "RUNNING" => Some(Self::Running),
            "SUCCEEDED" => Some(Self::Succeeded),
            "FAILED" => Some(Self::Failed),
            "KILLING" => Some(Self::Killing),
            "KILLED" => Some(Self::Killed),
            "DELETED" => Some(Self::Deleted),
            _ => None,
        }
    }

    /// Terminal states never transition further on their own.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Killed | Self::Deleted
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service-level agreement attached to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaConfig {
    /// Scheduling priority within the resource pool.
    #[serde(default)]
    pub priority: u32,

    /// Whether running instances may be preempted by higher-priority work.
    #[serde(default)]
    pub preemptible: bool,

    /// Whether instances may run on revocable resources.
    #[serde(default)]
    pub revocable: bool,

    /// Upper bound on instances simultaneously unavailable during a rolling
    /// workflow. The controller stalls rather than exceed it.
    #[serde(default = "default_max_unavailable")]
    pub max_unavailable_instances: u32,
}

fn default_max_unavailable() -> u32 {
    1
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            priority: 0,
            preemptible: false,
            revocable: false,
            max_unavailable_instances: default_max_unavailable(),
        }
    }
}

/// Declarative job specification as submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct JobSpec {
    pub name: String,

    #[serde(default)]
    pub owner: String,

    #[serde(default)]
    pub job_type: JobType,

    pub instance_count: u32,

    #[serde(default)]
    pub sla: SlaConfig,

    /// Config applied to every instance unless overridden.
    #[serde(default)]
    pub default_config: TaskConfig,

    /// Sparse per-instance overrides, keyed by instance index.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub instance_config: BTreeMap<u32, TaskConfig>,

    /// Resource pool the job draws from.
    #[serde(default)]
    pub resource_pool: String,
}

impl JobSpec {
    /// Effective config for an instance: the override if present, the
    /// default otherwise.
    #[must_use]
    pub fn task_config(&self, instance: u32) -> &TaskConfig {
        self.instance_config
            .get(&instance)
            .unwrap_or(&self.default_config)
    }

    /// Whether instance 0 is a controller task whose outcome decides the
    /// whole job's outcome.
    #[must_use]
    pub fn has_controller_task(&self) -> bool {
        self.task_config(0).controller
    }
}

/// Per-state instance counts keyed by stable task state names.
pub type TaskStats = BTreeMap<String, u32>;

/// Job status as returned by the query surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    pub goal_state: JobState,

    /// Opaque, monotonically increasing per-job revision.
    pub version: u64,

    /// Version of the config the runtime currently reflects.
    pub config_version: u64,

    #[serde(default)]
    pub task_stats: TaskStats,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_status: Option<WorkflowStatus>,
}

/// Condensed job row for list and query responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub name: String,
    pub owner: String,
    pub job_type: JobType,
    pub state: JobState,
    pub instance_count: u32,
}
