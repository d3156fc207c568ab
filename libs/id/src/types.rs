//! Typed ID definitions for orchestrator resources.
//!
//! Jobs, workflows, and host-offer sessions get prefixed ULIDs. Tasks and
//! runs are composite IDs addressed by instance index and run attempt.

use crate::define_id;
use crate::IdError;

define_id!(JobId, "job");
define_id!(WorkflowId, "wf");
define_id!(NodeId, "node");

// A host-offer session token is minted when a host transitions to Placing;
// a launch or release call must present the same token to bind to that
// placing session.
define_id!(HostOfferId, "hof");

/// Identifier of a single instance of a job: `{job_id}-{instance}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId {
    pub job_id: JobId,
    pub instance: u32,
}

impl TaskId {
    /// Creates a task ID for the given job instance.
    #[must_use]
    pub const fn new(job_id: JobId, instance: u32) -> Self {
        Self { job_id, instance }
    }

    /// Parses a task ID from `{job_id}-{instance}`.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }

        let Some((job_str, instance_str)) = s.rsplit_once('-') else {
            return Err(IdError::InvalidComponent {
                message: format!("task ID '{s}' missing instance suffix"),
            });
        };

        let job_id = JobId::parse(job_str)?;
        let instance = instance_str
            .parse::<u32>()
            .map_err(|_| IdError::InvalidComponent {
                message: format!("invalid instance index '{instance_str}'"),
            })?;

        Ok(Self { job_id, instance })
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.job_id, self.instance)
    }
}

impl std::str::FromStr for TaskId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for TaskId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for TaskId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Identifier of one run attempt of a task: `{task_id}-{attempt}`.
///
/// Every restart of an instance mints a new run; the cluster manager only
/// ever sees run IDs, so a stale status event for a prior attempt can be
/// told apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId {
    pub task_id: TaskId,
    pub attempt: u64,
}

impl RunId {
    /// The attempt number assigned to the first run of a task.
    pub const INITIAL_ATTEMPT: u64 = 1;

    /// Creates a run ID for the given task attempt.
    #[must_use]
    pub const fn new(task_id: TaskId, attempt: u64) -> Self {
        Self { task_id, attempt }
    }

    /// Creates the run ID for a task's first attempt.
    #[must_use]
    pub const fn initial(task_id: TaskId) -> Self {
        Self::new(task_id, Self::INITIAL_ATTEMPT)
    }

    /// Returns the run ID for the next attempt of the same task.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self::new(self.task_id, self.attempt + 1)
    }

    /// Parses a run ID from `{job_id}-{instance}-{attempt}`.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }

        let Some((task_str, attempt_str)) = s.rsplit_once('-') else {
            return Err(IdError::InvalidComponent {
                message: format!("run ID '{s}' missing attempt suffix"),
            });
        };

        let task_id = TaskId::parse(task_str)?;
        let attempt = attempt_str
            .parse::<u64>()
            .map_err(|_| IdError::InvalidComponent {
                message: format!("invalid run attempt '{attempt_str}'"),
            })?;

        Ok(Self { task_id, attempt })
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.task_id, self.attempt)
    }
}

impl std::str::FromStr for RunId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for RunId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for RunId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Opaque offer identifier assigned by the external cluster manager.
///
/// Armada never inspects the contents; it only indexes by it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct OfferId(String);

impl OfferId {
    /// Wraps a raw offer identifier.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the raw identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the identifier is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for OfferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OfferId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for OfferId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}
