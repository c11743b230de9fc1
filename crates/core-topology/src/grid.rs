//! Cartesian process grids
//!
//! A grid assigns one coordinate tuple to every slot of a handle set. Coordinates
//! follow the row-major convention of MPI Cartesian communicators: the last axis
//! varies fastest.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{GridError, Result};

/// Dimensions, periodicity and per-slot coordinates of an N-dimensional grid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartesianGrid {
    dims: Vec<usize>,
    periods: Vec<bool>,
    coords: Vec<Vec<usize>>,
}

impl CartesianGrid {
    /// Build a grid from reported coordinates, one entry per slot.
    ///
    /// # Errors
    ///
    /// Returns `GridError::Topology` if a dimension is zero, the periodicity or a
    /// coordinate has the wrong arity, a coordinate lies outside the grid, or two
    /// slots report the same coordinate.
    pub fn new(dims: Vec<usize>, periods: Vec<bool>, coords: Vec<Vec<usize>>) -> Result<Self> {
        if dims.is_empty() {
            return Err(GridError::Topology(
                "a grid needs at least one dimension".to_string(),
            ));
        }
        if dims.contains(&0) {
            return Err(GridError::Topology(format!(
                "grid dimensions must be positive, got {:?}",
                dims
            )));
        }
        if periods.len() != dims.len() {
            return Err(GridError::Topology(format!(
                "periods {:?} do not match dims {:?}",
                periods, dims
            )));
        }

        let mut seen: HashMap<&[usize], usize> = HashMap::with_capacity(coords.len());
        for (slot, coord) in coords.iter().enumerate() {
            if coord.len() != dims.len() {
                return Err(GridError::Topology(format!(
                    "slot {} reported coordinate {:?} of arity {}, but dims {:?} have arity {}",
                    slot,
                    coord,
                    coord.len(),
                    dims,
                    dims.len()
                )));
            }
            if coord.iter().zip(&dims).any(|(c, d)| c >= d) {
                return Err(GridError::Topology(format!(
                    "slot {} reported coordinate {:?} outside dims {:?}",
                    slot, coord, dims
                )));
            }
            if let Some(other) = seen.insert(coord.as_slice(), slot) {
                return Err(GridError::Topology(format!(
                    "slots {} and {} both reported coordinate {:?}",
                    other, slot, coord
                )));
            }
        }

        Ok(Self {
            dims,
            periods,
            coords,
        })
    }

    /// Grid where slot *r* sits at the row-major coordinate of rank *r*
    pub fn row_major(dims: Vec<usize>, periods: Vec<bool>) -> Result<Self> {
        let size = grid_size(&dims);
        let coords = (0..size).map(|rank| coords_of_rank(&dims, rank)).collect();
        Self::new(dims, periods, coords)
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn periods(&self) -> &[bool] {
        &self.periods
    }

    pub fn coords(&self) -> &[Vec<usize>] {
        &self.coords
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn coords_of(&self, slot: usize) -> Result<&[usize]> {
        self.coords
            .get(slot)
            .map(Vec::as_slice)
            .ok_or(GridError::IndexOutOfRange {
                index: slot,
                len: self.coords.len(),
            })
    }

    /// Grid axes with extent > 1, as `(axis, extent)` pairs
    pub fn distributed_axes(&self) -> Vec<(usize, usize)> {
        self.dims
            .iter()
            .enumerate()
            .filter(|(_, extent)| **extent > 1)
            .map(|(axis, extent)| (axis, *extent))
            .collect()
    }

    /// Reconcile a lookup key with the grid arity.
    ///
    /// Shorter keys are padded with zeros. Longer keys are accepted only if every
    /// component beyond the grid arity is zero.
    pub fn normalize_key(&self, key: &[usize]) -> Result<Vec<usize>> {
        let ndim = self.dims.len();
        if key.len() <= ndim {
            let mut padded = key.to_vec();
            padded.resize(ndim, 0);
            return Ok(padded);
        }
        if key[ndim..].iter().all(|c| *c == 0) {
            return Ok(key[..ndim].to_vec());
        }
        Err(GridError::KeyNotFound {
            key: key.to_vec(),
            dims: self.dims.clone(),
        })
    }

    /// Slot index holding coordinate `key`
    pub fn index_of(&self, key: &[usize]) -> Result<usize> {
        let normalized = self.normalize_key(key)?;
        self.coords
            .iter()
            .position(|coord| *coord == normalized)
            .ok_or_else(|| GridError::KeyNotFound {
                key: key.to_vec(),
                dims: self.dims.clone(),
            })
    }

    /// Neighbor of `slot` displaced by `disp` along `axis`.
    ///
    /// Periodic axes wrap around; on a non-periodic axis a displacement past the
    /// edge yields `None`.
    pub fn shift(&self, slot: usize, axis: usize, disp: isize) -> Result<Option<usize>> {
        let coord = self.coords_of(slot)?;
        let extent = *self.dims.get(axis).ok_or(GridError::IndexOutOfRange {
            index: axis,
            len: self.dims.len(),
        })? as isize;

        let moved = coord[axis] as isize + disp;
        let target = if self.periods[axis] {
            moved.rem_euclid(extent)
        } else if (0..extent).contains(&moved) {
            moved
        } else {
            return Ok(None);
        };

        let mut neighbor = coord.to_vec();
        neighbor[axis] = target as usize;
        self.index_of(&neighbor).map(Some)
    }
}

/// Number of grid points
pub fn grid_size(dims: &[usize]) -> usize {
    dims.iter().product()
}

/// Row-major coordinate of `rank`
pub fn coords_of_rank(dims: &[usize], rank: usize) -> Vec<usize> {
    let mut coords = vec![0; dims.len()];
    let mut rest = rank;
    for (axis, extent) in dims.iter().enumerate().rev() {
        if *extent == 0 {
            continue;
        }
        coords[axis] = rest % extent;
        rest /= extent;
    }
    coords
}

/// Row-major rank of `coords`
pub fn rank_of_coords(dims: &[usize], coords: &[usize]) -> usize {
    dims.iter()
        .zip(coords)
        .fold(0, |rank, (extent, coord)| rank * extent + coord)
}
