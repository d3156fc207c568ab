//! Cached per-instance task entry.

use armada_api::{TaskRuntime, TaskState};
use armada_id::TaskId;
use std::sync::RwLock;

/// One instance's cached runtime.
///
/// Task entries live under their job's shard; the entry's own lock only
/// guards the runtime snapshot.
pub struct CachedTask {
    task_id: TaskId,
    runtime: RwLock<Option<TaskRuntime>>,
}

impl CachedTask {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            runtime: RwLock::new(None),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Current state; `Unknown` while the entry is still hydrating.
    pub fn current_state(&self) -> TaskState {
        self.runtime
            .read()
            .expect("task lock poisoned")
            .as_ref()
            .map(|r| r.state)
            .unwrap_or(TaskState::Unknown)
    }

    /// Snapshot of the runtime, if hydrated.
    pub fn runtime(&self) -> Option<TaskRuntime> {
        self.runtime.read().expect("task lock poisoned").clone()
    }

    pub(crate) fn set_runtime(&self, runtime: TaskRuntime) {
        *self.runtime.write().expect("task lock poisoned") = Some(runtime);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_id::JobId;

    #[test]
    fn test_unhydrated_task_is_unknown() {
        let task = CachedTask::new(TaskId::new(JobId::new(), 0));
        assert_eq!(task.current_state(), TaskState::Unknown);
        assert!(task.runtime().is_none());
    }

    #[test]
    fn test_set_runtime() {
        let task = CachedTask::new(TaskId::new(JobId::new(), 0));
        let mut runtime = TaskRuntime::default();
        runtime.state = TaskState::Running;
        task.set_runtime(runtime);
        assert_eq!(task.current_state(), TaskState::Running);
    }
}
