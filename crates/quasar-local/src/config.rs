//! Local pool configuration

use serde::{Deserialize, Serialize};

use crate::error::LocalError;

/// Configuration of an in-process worker pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Number of workers to spawn
    pub num_workers: usize,

    /// Number of workers that must register before the pool is usable.
    /// Defaults to `num_workers`.
    pub expected_workers: Option<usize>,

    /// How long to wait for workers to register (milliseconds)
    pub assembly_timeout_ms: u64,

    /// Worker names are `<prefix>-<index>`
    pub worker_prefix: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            expected_workers: None,
            assembly_timeout_ms: 5000,
            worker_prefix: "local".to_string(),
        }
    }
}

impl ClusterConfig {
    pub fn with_workers(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Self::default()
        }
    }

    pub fn expected(&self) -> usize {
        self.expected_workers.unwrap_or(self.num_workers)
    }

    pub fn worker_name(&self, index: usize) -> String {
        format!("{}-{}", self.worker_prefix, index)
    }

    pub fn validate(&self) -> Result<(), LocalError> {
        if self.num_workers == 0 {
            return Err(LocalError::InvalidConfig(
                "num_workers must be at least 1".to_string(),
            ));
        }
        if self.worker_prefix.is_empty() {
            return Err(LocalError::InvalidConfig(
                "worker_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClusterConfig::default();
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.expected(), 4);
        assert_eq!(config.worker_name(2), "local-2");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_workers_invalid() {
        let config = ClusterConfig::with_workers(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ClusterConfig = toml::from_str("num_workers = 6").unwrap();
        assert_eq!(config.num_workers, 6);
        assert_eq!(config.assembly_timeout_ms, 5000);
        assert_eq!(config.worker_prefix, "local");
    }
}
