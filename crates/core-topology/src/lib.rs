//! Quasar Core Topology
//!
//! Pure logic for Cartesian process grids and for laying chunked arrays out on
//! them. No I/O and no async: every function here is deterministic and can be
//! used to validate a request before a single task is submitted.
//!
//! # Example
//!
//! ```
//! use quasar_core_topology::{ArrayLayout, CartesianGrid};
//!
//! let grid = CartesianGrid::row_major(vec![2], vec![false]).unwrap();
//! let layout = ArrayLayout::for_builder(grid.dims(), &[4, 2], Some(&[2, 2]), None).unwrap();
//!
//! // slot 0 owns block (0, 0), slot 1 owns block (1, 0)
//! assert_eq!(layout.block_keys(&grid), vec![vec![0, 0], vec![1, 0]]);
//! ```

pub mod error;
pub mod grid;
pub mod placement;

pub use error::{GridError, Result};
pub use grid::{coords_of_rank, grid_size, rank_of_coords, CartesianGrid};
pub use placement::{
    block_offset, block_shape, derive_shape, local_chunk_shape, normalize_chunks, ArrayLayout,
    AxisMatch, AxisPair,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{GridError, Result};
    pub use crate::grid::CartesianGrid;
    pub use crate::placement::{ArrayLayout, AxisMatch};
}
