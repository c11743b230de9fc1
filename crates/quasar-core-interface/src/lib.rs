//! Quasar Core Interface: the task-submission boundary
//!
//! This crate defines the `TaskExecutor` trait, which abstracts the worker pool that
//! actually holds remote values and runs tasks. Everything above it (handle sets,
//! grid topologies, dispatch and placement) is written against this trait only.
//!
//! # Architecture
//!
//! The `TaskExecutor` trait provides the four primitives the core consumes:
//!
//! 1. **submit**: run a task once its input handles are ready, optionally pinned to a worker
//! 2. **owner_of**: report the single worker currently holding a handle
//! 3. **resolve**: block until a handle is terminal, surfacing the captured failure
//! 4. **scatter**: place plain values onto named workers
//!
//! # Example
//!
//! ```rust,no_run
//! use quasar_core_interface::{Task, TaskExecutor, Value};
//!
//! async fn double_everywhere<E: TaskExecutor>(executor: &E) -> quasar_core_interface::Result<()> {
//!     let workers = executor.workers();
//!     let inputs = executor
//!         .scatter(vec![Value::Int(1), Value::Int(2)], &workers, false)
//!         .await?;
//!
//!     for input in inputs {
//!         let owner = executor.owner_of(input).await?;
//!         let task = Task::new("double", |values| {
//!             Ok(Value::Int(values[0].as_int().unwrap_or_default() * 2))
//!         });
//!         let doubled = executor.submit(task, &[input], Some(&owner)).await?;
//!         println!("{}", executor.resolve(doubled).await?);
//!     }
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub mod object;
pub mod value;

pub use object::{Args, Class, ObjectRef, RemoteObject};
pub use value::{Block, DType, Value};

/// Failure raised by a task or a remote object while running on a worker.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    #[error("'{type_name}' object has no attribute '{name}'")]
    AttributeNotFound { type_name: String, name: String },

    #[error("'{type_name}' object has no method '{name}'")]
    MethodNotFound { type_name: String, name: String },

    #[error("Expected {expected}, got {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Missing argument '{0}'")]
    MissingArgument(String),

    #[error("Remote object lock poisoned")]
    Poisoned,

    #[error("{0}")]
    Failed(String),
}

impl RemoteError {
    pub fn type_mismatch(expected: impl Into<String>, found: &Value) -> Self {
        RemoteError::TypeMismatch {
            expected: expected.into(),
            found: found.type_name().to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutorError {
    #[error("Unknown handle: {0}")]
    UnknownHandle(HandleId),

    #[error("Unknown worker: {0}")]
    UnknownWorker(WorkerId),

    #[error("Handle {handle} is held by {holders} workers, expected exactly one")]
    AmbiguousOwner { handle: HandleId, holders: usize },

    #[error("Task '{task}' failed on {worker}: {source}")]
    TaskFailed {
        task: String,
        worker: WorkerId,
        #[source]
        source: RemoteError,
    },

    #[error("Worker pool assembly failed: expected {expected} workers, {connected} connected")]
    PoolAssembly { expected: usize, connected: usize },

    #[error("Executor is shut down")]
    Shutdown,

    #[error("Executor error: {0}")]
    System(String),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;

/// Identity of one worker of the pool
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for WorkerId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Opaque reference to a value living on a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// Status of a handle as reported by the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotStatus {
    /// Task not finished yet
    Pending,
    /// Value available
    Ready,
    /// Task failed; resolving re-raises the captured failure
    Failed,
}

impl SlotStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SlotStatus::Pending)
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotStatus::Pending => write!(f, "pending"),
            SlotStatus::Ready => write!(f, "ready"),
            SlotStatus::Failed => write!(f, "failed"),
        }
    }
}

pub type TaskFn =
    dyn Fn(Vec<Value>) -> std::result::Result<Value, RemoteError> + Send + Sync + 'static;

/// A function shipped to a worker together with the handles it consumes.
///
/// The function receives the resolved input values in the order the handles were
/// passed to [`TaskExecutor::submit`].
#[derive(Clone)]
pub struct Task {
    name: String,
    func: Arc<TaskFn>,
}

impl Task {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Vec<Value>) -> std::result::Result<Value, RemoteError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Task returning a copy of its single input, used to relocate a value
    pub fn identity() -> Self {
        Self::new("identity", |mut values| {
            values
                .pop()
                .ok_or_else(|| RemoteError::MissingArgument("value".to_string()))
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run(&self, inputs: Vec<Value>) -> std::result::Result<Value, RemoteError> {
        (self.func)(inputs)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("name", &self.name).finish()
    }
}

/// The worker pool the core submits to
///
/// Implementations:
/// - **LocalCluster** (`quasar-local`): tokio tasks standing in for workers
/// - anything backed by a real scheduler, as long as it honours pinning
///
/// # Ordering
///
/// Submissions made in sequence are accepted in sequence. Completion order across
/// workers is unspecified.
#[async_trait]
pub trait TaskExecutor: Send + Sync + 'static {
    /// Workers currently part of the pool, in a stable order
    fn workers(&self) -> Vec<WorkerId>;

    /// Run `task` on the values behind `inputs` once they are available.
    ///
    /// With `pin` set, the task runs on that worker and the new handle is held there.
    async fn submit(
        &self,
        task: Task,
        inputs: &[HandleId],
        pin: Option<&WorkerId>,
    ) -> Result<HandleId>;

    /// Report the worker holding `handle`.
    ///
    /// # Errors
    ///
    /// Returns `ExecutorError::AmbiguousOwner` when the value is replicated.
    async fn owner_of(&self, handle: HandleId) -> Result<WorkerId>;

    /// Block until `handle` is terminal and return its value or its failure
    async fn resolve(&self, handle: HandleId) -> Result<Value>;

    /// Non-blocking status probe
    async fn status(&self, handle: HandleId) -> Result<SlotStatus>;

    /// Place plain values onto `workers`, one handle per value.
    ///
    /// Without `broadcast`, value *i* goes to `workers[i % workers.len()]`; with it,
    /// every value is replicated on every listed worker. An empty worker list means
    /// the whole pool.
    async fn scatter(
        &self,
        values: Vec<Value>,
        workers: &[WorkerId],
        broadcast: bool,
    ) -> Result<Vec<HandleId>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_task_returns_input() {
        let task = Task::identity();
        assert_eq!(task.name(), "identity");
        assert_eq!(task.run(vec![Value::Int(7)]).unwrap(), Value::Int(7));
        assert!(matches!(
            task.run(vec![]),
            Err(RemoteError::MissingArgument(_))
        ));
    }

    #[test]
    fn test_slot_status_terminal() {
        assert!(!SlotStatus::Pending.is_terminal());
        assert!(SlotStatus::Ready.is_terminal());
        assert!(SlotStatus::Failed.is_terminal());
        assert_eq!(SlotStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_task_failed_display_names_worker() {
        let err = ExecutorError::TaskFailed {
            task: "values".to_string(),
            worker: WorkerId::new("local-1"),
            source: RemoteError::Failed("boom".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("local-1"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn test_executor_is_object_safe() {
        fn assert_object_safe(_: Option<Arc<dyn TaskExecutor>>) {}
        assert_object_safe(None);
    }
}
