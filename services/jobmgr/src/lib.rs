//! Armada job manager: goal-state reconciliation for batch and service
//! jobs.
//!
//! Submissions are persisted through the job cache, enqueued into the
//! goal-state engine, and continuously reconciled toward their declared
//! goal state. Placement couples pending tasks to host offers acquired
//! from the host manager; a rolling-workflow controller drives updates and
//! restarts; recovery re-hydrates everything after a restart.

pub mod api;
pub mod cache;
pub mod config;
pub mod goalstate;
pub mod hostclient;
pub mod placement;
pub mod recovery;
pub mod state;
pub mod storage;
pub mod workflow;
