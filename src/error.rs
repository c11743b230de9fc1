/*!
 * Error types for Quasar
 */

use quasar_core_interface::{DType, ExecutorError, Value};
use quasar_core_topology::GridError;
use quasar_local::LocalError;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, QuasarError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_REMOTE: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QuasarError {
    /// A dispatch was requested without any remote argument
    #[error("No remote argument given: at least one argument must be a handle set")]
    NoRemoteArgument,

    /// Remote arguments of one dispatch come from different grids
    #[error("Topology mismatch: {reason}")]
    TopologyMismatch { reason: String },

    /// Placement discovery found an ambiguous or inconsistent grid
    #[error("Topology error: {0}")]
    Topology(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Index {index} out of range for {len} slots")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Axis mismatch: {0}")]
    AxisMismatch(String),

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Cannot chunk axis {axis} of size {size} in {extent} pieces")]
    Chunking {
        axis: usize,
        size: usize,
        extent: usize,
    },

    /// Slots of a global or constant read disagree
    #[error("Inconsistent results across slots: {}", list(.values))]
    InconsistentResult { values: Vec<Value> },

    #[error("Blocks have different dtypes: {}", list(.dtypes))]
    DTypeMismatch { dtypes: Vec<DType> },

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Failure reported by the worker pool
    #[error("Remote failure: {0}")]
    Remote(#[source] ExecutorError),

    #[error("Worker pool assembly failed: expected {expected} workers, got {connected}")]
    PoolAssembly { expected: usize, connected: usize },

    #[error("Configuration error: {0}")]
    Config(String),
}

fn list<T: fmt::Display>(items: &[T]) -> String {
    let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
    format!("({})", parts.join(", "))
}

impl QuasarError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            ErrorCategory::Remote | ErrorCategory::Aggregation => EXIT_REMOTE,
            _ => EXIT_FATAL,
        }
    }

    /// Whether the error was raised before any task was submitted
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            QuasarError::NoRemoteArgument
                | QuasarError::TopologyMismatch { .. }
                | QuasarError::KeyNotFound(_)
                | QuasarError::IndexOutOfRange { .. }
                | QuasarError::AxisMismatch(_)
                | QuasarError::Shape(_)
                | QuasarError::Chunking { .. }
                | QuasarError::Config(_)
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            QuasarError::NoRemoteArgument
            | QuasarError::TopologyMismatch { .. }
            | QuasarError::KeyNotFound(_)
            | QuasarError::IndexOutOfRange { .. }
            | QuasarError::NotImplemented(_) => ErrorCategory::Validation,
            QuasarError::Topology(_) => ErrorCategory::Topology,
            QuasarError::AxisMismatch(_)
            | QuasarError::Shape(_)
            | QuasarError::Chunking { .. }
            | QuasarError::DTypeMismatch { .. } => ErrorCategory::Placement,
            QuasarError::InconsistentResult { .. } => ErrorCategory::Aggregation,
            QuasarError::Remote(_) => ErrorCategory::Remote,
            QuasarError::PoolAssembly { .. } | QuasarError::Config(_) => {
                ErrorCategory::Configuration
            }
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad call shape: missing or mismatched remote arguments, bad keys
    Validation,
    /// Grid discovery errors
    Topology,
    /// Chunk placement errors
    Placement,
    /// Slots disagree on a global value
    Aggregation,
    /// Failures reported by workers
    Remote,
    /// Configuration and pool assembly errors
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Topology => write!(f, "topology"),
            ErrorCategory::Placement => write!(f, "placement"),
            ErrorCategory::Aggregation => write!(f, "aggregation"),
            ErrorCategory::Remote => write!(f, "remote"),
            ErrorCategory::Configuration => write!(f, "configuration"),
        }
    }
}

impl From<ExecutorError> for QuasarError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::PoolAssembly {
                expected,
                connected,
            } => QuasarError::PoolAssembly {
                expected,
                connected,
            },
            other => QuasarError::Remote(other),
        }
    }
}

impl From<LocalError> for QuasarError {
    fn from(err: LocalError) -> Self {
        match err {
            LocalError::InvalidConfig(msg) => QuasarError::Config(msg),
            other => ExecutorError::from(other).into(),
        }
    }
}

impl From<GridError> for QuasarError {
    fn from(err: GridError) -> Self {
        match err {
            GridError::Topology(msg) => QuasarError::Topology(msg),
            GridError::KeyNotFound { key, dims } => {
                QuasarError::KeyNotFound(format!("{:?} in grid with dims {:?}", key, dims))
            }
            GridError::IndexOutOfRange { index, len } => {
                QuasarError::IndexOutOfRange { index, len }
            }
            GridError::AxisMismatch(msg) => QuasarError::AxisMismatch(msg),
            GridError::Shape(msg) => QuasarError::Shape(msg),
            GridError::Chunking { axis, size, extent } => {
                QuasarError::Chunking { axis, size, extent }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quasar_core_interface::{RemoteError, WorkerId};

    #[test]
    fn test_inconsistent_result_lists_values() {
        let err = QuasarError::InconsistentResult {
            values: vec![Value::Int(5), Value::Int(5), Value::Int(6)],
        };
        assert_eq!(
            err.to_string(),
            "Inconsistent results across slots: (5, 5, 6)"
        );
        assert_eq!(err.category(), ErrorCategory::Aggregation);
        assert!(!err.is_validation());
    }

    #[test]
    fn test_grid_errors_map_to_taxonomy() {
        let err: QuasarError = GridError::AxisMismatch("bad".to_string()).into();
        assert_eq!(err, QuasarError::AxisMismatch("bad".to_string()));

        let err: QuasarError = GridError::Chunking {
            axis: 0,
            size: 1,
            extent: 2,
        }
        .into();
        assert!(err.is_validation());
        assert_eq!(err.category(), ErrorCategory::Placement);

        let err: QuasarError = GridError::KeyNotFound {
            key: vec![1, 0, 1],
            dims: vec![2],
        }
        .into();
        assert!(err.to_string().contains("[1, 0, 1]"));
    }

    #[test]
    fn test_remote_failure_keeps_source() {
        let err: QuasarError = ExecutorError::TaskFailed {
            task: "call:explode".to_string(),
            worker: WorkerId::new("local-0"),
            source: RemoteError::Failed("boom".to_string()),
        }
        .into();
        assert_eq!(err.category(), ErrorCategory::Remote);
        assert_eq!(err.exit_code(), EXIT_REMOTE);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_pool_assembly_is_configuration() {
        let err: QuasarError = ExecutorError::PoolAssembly {
            expected: 4,
            connected: 2,
        }
        .into();
        assert!(matches!(err, QuasarError::PoolAssembly { .. }));
        assert_eq!(err.exit_code(), EXIT_FATAL);
    }

    #[test]
    fn test_dtype_mismatch_lists_dtypes() {
        let err = QuasarError::DTypeMismatch {
            dtypes: vec![DType::Float64, DType::Int64],
        };
        assert!(err.to_string().contains("(float64, int64)"));
    }
}
