//! Quasar Local: an in-process worker pool
//!
//! `LocalCluster` implements [`TaskExecutor`](quasar_core_interface::TaskExecutor)
//! with one tokio task per worker. It is used for single-process sessions, for
//! the `quasar demo` command and throughout the test suites.
//!
//! Semantics mirror a real pool closely enough for placement to be observable:
//!
//! - a pinned task runs on, and is held by, exactly the requested worker
//! - an unpinned task follows its first input, or is placed round-robin
//! - a broadcast scatter is held by every worker, so `owner_of` is ambiguous
//! - a failed task poisons every task that consumes its output
//!
//! `submitted_tasks()` counts accepted submissions, which lets callers check how
//! many dispatch rounds an operation really issued.

pub mod cluster;
pub mod config;
pub mod error;
pub mod lifecycle;

pub use cluster::LocalCluster;
pub use config::ClusterConfig;
pub use error::LocalError;
pub use lifecycle::{WorkerLifecycle, WorkerState};
