//! Error types for grid and placement validation

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    #[error("Invalid topology: {0}")]
    Topology(String),

    #[error("Key {key:?} not found in grid with dims {dims:?}")]
    KeyNotFound { key: Vec<usize>, dims: Vec<usize> },

    #[error("Index {index} out of range for {len} slots")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Axis mismatch: {0}")]
    AxisMismatch(String),

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("Cannot chunk axis {axis} of size {size} into {extent} pieces")]
    Chunking {
        axis: usize,
        size: usize,
        extent: usize,
    },
}

pub type Result<T> = std::result::Result<T, GridError>;
