//! # armada-id
//!
//! Typed identifiers for armada resources.
//!
//! ## Design Principles
//!
//! - IDs are system-generated and stable for the lifetime of the resource
//! - All IDs have a canonical string representation with strict parsing
//! - IDs round-trip through serialization (parse → format → parse)
//! - IDs are typed so a job id cannot be passed where a workflow id is expected
//!
//! ## ID Format
//!
//! Resource IDs use a prefixed format: `{prefix}_{ulid}`
//!
//! Examples:
//! - `job_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `wf_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//! - `hof_01HV4Z4NYPLTRS0JTUA8XDME5F`
//!
//! Task identifiers are composite: a task is `{job_id}-{instance}` and a run
//! is `{task_id}-{attempt}`, because instances are addressed by index within
//! their job rather than by a standalone key.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
