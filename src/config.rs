/*!
 * Configuration for a distributed session
 */

use quasar_local::ClusterConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings read once at session start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Number of local workers to spawn
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Workers that must register before the session starts (default: all)
    #[serde(default)]
    pub expected_workers: Option<usize>,

    /// Pool assembly timeout in milliseconds
    #[serde(default = "default_assembly_timeout")]
    pub assembly_timeout_ms: u64,

    /// Prefix of local worker names
    #[serde(default = "default_worker_prefix")]
    pub worker_prefix: String,

    /// Periodicity used by `create_cart` when none is given
    #[serde(default)]
    pub periodic: bool,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            expected_workers: None,
            assembly_timeout_ms: default_assembly_timeout(),
            worker_prefix: default_worker_prefix(),
            periodic: false,
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_assembly_timeout() -> u64 {
    5000
}

fn default_worker_prefix() -> String {
    "local".to_string()
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Default::default()
        }
    }

    /// Settings for the in-process worker pool
    pub fn cluster_config(&self) -> ClusterConfig {
        ClusterConfig {
            num_workers: self.workers,
            expected_workers: self.expected_workers,
            assembly_timeout_ms: self.assembly_timeout_ms,
            worker_prefix: self.worker_prefix.clone(),
        }
    }
}
