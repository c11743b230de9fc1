//! Local pool errors

use quasar_core_interface::ExecutorError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LocalError {
    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error("Only {connected} of {expected} workers registered within {timeout_ms}ms")]
    AssemblyTimeout {
        expected: usize,
        connected: usize,
        timeout_ms: u64,
    },

    #[error("Worker {0} stopped unexpectedly")]
    WorkerLost(String),
}

impl From<LocalError> for ExecutorError {
    fn from(err: LocalError) -> Self {
        match err {
            LocalError::AssemblyTimeout {
                expected,
                connected,
                ..
            } => ExecutorError::PoolAssembly {
                expected,
                connected,
            },
            other => ExecutorError::System(other.to_string()),
        }
    }
}
