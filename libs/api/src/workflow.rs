//! Rolling workflow (update / restart) wire types.

use armada_id::WorkflowId;
use serde::{Deserialize, Serialize};

/// What a workflow does to the instances it touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowKind {
    /// Move instances to a new config version.
    Update,
    /// Restart instances at their current config version.
    Restart,
}

/// Lifecycle state of a rolling workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    #[default]
    Initialized,
    RollingForward,
    RollingBackward,
    Paused,
    Succeeded,
    Aborted,
    Failed,
    RolledBack,
}

impl WorkflowState {
    /// Stable name used on the wire and in stored columns.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "INITIALIZED",
            Self::RollingForward => "ROLLING_FORWARD",
            Self::RollingBackward => "ROLLING_BACKWARD",
            Self::Paused => "PAUSED",
            Self::Succeeded => "SUCCEEDED",
            Self::Aborted => "ABORTED",
            Self::Failed => "FAILED",
            Self::RolledBack => "ROLLED_BACK",
        }
    }

    /// Parses a stable state name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INITIALIZED" => Some(Self::Initialized),
            "ROLLING_FORWARD" => Some(Self::RollingForward),
            "ROLLING_BACKWARD" => Some(Self::RollingBackward),
            "PAUSED" => Some(Self::Paused),
            "SUCCEEDED" => Some(Self::Succeeded),
            "ABORTED" => Some(Self::Aborted),
            "FAILED" => Some(Self::Failed),
            "ROLLED_BACK" => Some(Self::RolledBack),
            _ => None,
        }
    }

    /// A terminal workflow no longer progresses and frees its job slot.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Aborted | Self::Failed | Self::RolledBack
        )
    }

    /// An active workflow occupies its job's single workflow slot.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Knobs controlling how a workflow progresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    /// Instances operated on concurrently per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Retries per instance before it counts as failed.
    #[serde(default = "default_instance_retries")]
    pub max_instance_retries: u32,

    /// Failed-instance count at which the workflow gives up.
    #[serde(default)]
    pub max_tolerable_instance_failures: u32,

    /// On giving up, roll back to the previous config version instead of
    /// failing in place.
    #[serde(default)]
    pub rollback_on_failure: bool,

    /// Experimental: start instances that are not currently running when the
    /// update reaches them.
    #[serde(default)]
    pub start_tasks: bool,
}

fn default_batch_size() -> u32 {
    1
}

fn default_instance_retries() -> u32 {
    3
}

impl Default for WorkflowSpec {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_instance_retries: default_instance_retries(),
            max_tolerable_instance_failures: 0,
            rollback_on_failure: false,
            start_tasks: false,
        }
    }
}

/// Progress report for a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub workflow_id: WorkflowId,
    pub kind: WorkflowKind,
    pub state: WorkflowState,

    /// Instances already at the target version and settled.
    pub num_instances_completed: u32,

    /// Instances that exhausted their retries.
    pub num_instances_failed: u32,

    /// Instances not yet operated on.
    pub num_instances_remaining: u32,

    /// Config version the workflow drives toward.
    pub target_version: u64,

    /// Config version to return to on rollback.
    pub prev_version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_state_roundtrip() {
        for state in [
            WorkflowState::Initialized,
            WorkflowState::RollingForward,
            WorkflowState::RollingBackward,
            WorkflowState::Paused,
            WorkflowState::Succeeded,
            WorkflowState::Aborted,
            WorkflowState::Failed,
            WorkflowState::RolledBack,
        ] {
            assert_eq!(WorkflowState::parse(state.as_str()), Some(state));
        }
    }

    #[test]
    fn test_active_vs_terminal() {
        assert!(WorkflowState::RollingForward.is_active());
        assert!(WorkflowState::Paused.is_active());
        assert!(WorkflowState::RolledBack.is_terminal());
        assert!(!WorkflowState::RolledBack.is_active());
    }
}
