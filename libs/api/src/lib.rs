//! # armada-api
//!
//! Wire types shared by the job manager, the host manager, and the CLI.
//!
//! Everything here is plain serde data: requests and responses for the two
//! HTTP surfaces, plus the spec/runtime types they carry. State enums expose
//! stable string names (used as task-stat keys and stored columns) and
//! terminality predicates, so callers never match on display strings.

pub mod host;
pub mod job;
pub mod resources;
pub mod rpc;
pub mod task;
pub mod workflow;

pub use host::*;
pub use job::*;
pub use resources::*;
pub use task::*;
pub use workflow::*;
