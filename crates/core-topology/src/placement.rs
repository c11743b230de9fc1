//! Placement math: matching grid axes to array axes
//!
//! A chunked array is laid out on a grid when every grid axis with extent > 1
//! (a *distributed axis*) is paired with exactly one array axis that is split into
//! as many blocks as the grid extent, and every other array axis is a single block.
//! The grid point at coordinate `c` then owns the block whose index along each
//! paired array axis is `c[grid_axis]` and zero elsewhere.
//!
//! # Axis matching rules
//!
//! - With an explicit `dims_axes`, it must have one entry per grid axis. Entries on
//!   grid axes of extent 1 are ignored (negative placeholders allowed there); on
//!   distributed axes each entry must name a distinct array axis in range.
//! - Without it, when the chunk counts are known, distributed grid axes in ascending
//!   order are paired with the split array axes in ascending order.
//! - Without either, grid axis *g* is paired with array axis *g*.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GridError, Result};
use crate::grid::CartesianGrid;

/// One distributed grid axis and the array axis it splits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisPair {
    pub grid_axis: usize,
    pub array_axis: usize,
    pub extent: usize,
}

/// Resolved pairing between the distributed axes of a grid and an array's axes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisMatch {
    dims: Vec<usize>,
    ndim: usize,
    pairs: Vec<AxisPair>,
}

impl AxisMatch {
    /// Pair the distributed axes of `dims` with the axes of an `ndim`-dimensional array.
    ///
    /// When `nchunks` is given the block counts are validated against the pairing.
    ///
    /// # Errors
    ///
    /// - `GridError::AxisMismatch` for a malformed `dims_axes`, or when the number of
    ///   split array axes differs from the number of distributed grid axes
    /// - `GridError::Shape` when the block counts do not match the grid extents
    pub fn resolve(
        dims: &[usize],
        ndim: usize,
        dims_axes: Option<&[isize]>,
        nchunks: Option<&[usize]>,
    ) -> Result<Self> {
        if let Some(counts) = nchunks {
            if counts.len() != ndim {
                return Err(GridError::Shape(format!(
                    "got {} chunk counts {:?} for an array of rank {}",
                    counts.len(),
                    counts,
                    ndim
                )));
            }
        }

        let distributed: Vec<(usize, usize)> = dims
            .iter()
            .enumerate()
            .filter(|(_, extent)| **extent > 1)
            .map(|(axis, extent)| (axis, *extent))
            .collect();

        let pairs = match (dims_axes, nchunks) {
            (Some(axes), _) => explicit_pairs(dims, ndim, &distributed, axes)?,
            (None, Some(counts)) => {
                let split: Vec<usize> = counts
                    .iter()
                    .enumerate()
                    .filter(|(_, count)| **count > 1)
                    .map(|(axis, _)| axis)
                    .collect();
                if split.len() != distributed.len() {
                    return Err(GridError::AxisMismatch(format!(
                        "array is split along {} axes {:?} (chunk counts {:?}) but grid {:?} distributes {} axes",
                        split.len(),
                        split,
                        counts,
                        dims,
                        distributed.len()
                    )));
                }
                distributed
                    .iter()
                    .zip(split)
                    .map(|((grid_axis, extent), array_axis)| AxisPair {
                        grid_axis: *grid_axis,
                        array_axis,
                        extent: *extent,
                    })
                    .collect()
            }
            (None, None) => {
                let mut pairs = Vec::with_capacity(distributed.len());
                for (grid_axis, extent) in &distributed {
                    if *grid_axis >= ndim {
                        return Err(GridError::AxisMismatch(format!(
                            "array of rank {} is smaller than distributed grid axis {} of dims {:?}",
                            ndim, grid_axis, dims
                        )));
                    }
                    pairs.push(AxisPair {
                        grid_axis: *grid_axis,
                        array_axis: *grid_axis,
                        extent: *extent,
                    });
                }
                pairs
            }
        };

        let matched = Self {
            dims: dims.to_vec(),
            ndim,
            pairs,
        };
        if let Some(counts) = nchunks {
            matched.check_nchunks(counts)?;
        }
        debug!(dims = ?dims, ndim, pairs = ?matched.pairs, "Resolved axis match");
        Ok(matched)
    }

    pub fn pairs(&self) -> &[AxisPair] {
        &self.pairs
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    /// Grid extent splitting `array_axis`, if it is distributed
    pub fn extent_on(&self, array_axis: usize) -> Option<usize> {
        self.pairs
            .iter()
            .find(|pair| pair.array_axis == array_axis)
            .map(|pair| pair.extent)
    }

    /// Block counts an array must have to sit on this grid
    pub fn expected_nchunks(&self) -> Vec<usize> {
        let mut counts = vec![1; self.ndim];
        for pair in &self.pairs {
            counts[pair.array_axis] = pair.extent;
        }
        counts
    }

    pub fn check_nchunks(&self, nchunks: &[usize]) -> Result<()> {
        let expected = self.expected_nchunks();
        if nchunks != expected.as_slice() {
            return Err(GridError::Shape(format!(
                "number of chunks {:?} not compatible with grid dims {:?}, expected {:?}",
                nchunks, self.dims, expected
            )));
        }
        Ok(())
    }

    /// Block index owned by the grid point at `coords`
    pub fn block_key(&self, coords: &[usize]) -> Vec<usize> {
        let mut key = vec![0; self.ndim];
        for pair in &self.pairs {
            key[pair.array_axis] = coords[pair.grid_axis];
        }
        key
    }
}

fn explicit_pairs(
    dims: &[usize],
    ndim: usize,
    distributed: &[(usize, usize)],
    axes: &[isize],
) -> Result<Vec<AxisPair>> {
    if axes.len() != dims.len() {
        return Err(GridError::AxisMismatch(format!(
            "dims_axes {:?} has {} entries but grid dims {:?} have {}",
            axes,
            axes.len(),
            dims,
            dims.len()
        )));
    }

    let mut pairs: Vec<AxisPair> = Vec::with_capacity(distributed.len());
    for (grid_axis, extent) in distributed {
        let requested = axes[*grid_axis];
        if requested < 0 {
            return Err(GridError::AxisMismatch(format!(
                "dims_axes {:?} leaves distributed grid axis {} (extent {}) unassigned",
                axes, grid_axis, extent
            )));
        }
        let array_axis = requested as usize;
        if array_axis >= ndim {
            return Err(GridError::AxisMismatch(format!(
                "dims_axes {:?} assigns grid axis {} to array axis {}, but the array has rank {}",
                axes, grid_axis, array_axis, ndim
            )));
        }
        if pairs.iter().any(|pair| pair.array_axis == array_axis) {
            return Err(GridError::AxisMismatch(format!(
                "dims_axes {:?} assigns array axis {} more than once",
                axes, array_axis
            )));
        }
        pairs.push(AxisPair {
            grid_axis: *grid_axis,
            array_axis,
            extent: *extent,
        });
    }
    Ok(pairs)
}

/// Split every axis of `shape` into blocks of `chunk`, the last block taking the remainder
pub fn normalize_chunks(shape: &[usize], chunk: &[usize]) -> Result<Vec<Vec<usize>>> {
    if shape.len() != chunk.len() {
        return Err(GridError::Shape(format!(
            "chunks {:?} do not match the rank of shape {:?}",
            chunk, shape
        )));
    }
    shape
        .iter()
        .zip(chunk)
        .map(|(size, block)| {
            if *size == 0 {
                return Ok(vec![0]);
            }
            if *block == 0 {
                return Err(GridError::Shape(format!(
                    "chunks {:?} contain an empty block for shape {:?}",
                    chunk, shape
                )));
            }
            let mut blocks = vec![*block; size / block];
            if size % block != 0 {
                blocks.push(size % block);
            }
            Ok(blocks)
        })
        .collect()
}

/// Local block shape of a builder: `ceil(size / extent)` along every distributed axis.
///
/// Fails with `GridError::Chunking` when a grid extent exceeds the axis size.
pub fn local_chunk_shape(shape: &[usize], axes: &AxisMatch) -> Result<Vec<usize>> {
    let mut chunk = shape.to_vec();
    for pair in axes.pairs() {
        let size = shape[pair.array_axis];
        if pair.extent > size {
            return Err(GridError::Chunking {
                axis: pair.array_axis,
                size,
                extent: pair.extent,
            });
        }
        chunk[pair.array_axis] = size.div_ceil(pair.extent);
    }
    Ok(chunk)
}

/// Whole-array shape from a uniform block shape
pub fn derive_shape(chunk: &[usize], axes: &AxisMatch) -> Vec<usize> {
    let mut shape = chunk.to_vec();
    for pair in axes.pairs() {
        shape[pair.array_axis] *= pair.extent;
    }
    shape
}

/// Element offset of block `key`, `None` when the key is not a block of `chunks`
pub fn block_offset(chunks: &[Vec<usize>], key: &[usize]) -> Option<Vec<usize>> {
    if key.len() != chunks.len() {
        return None;
    }
    chunks
        .iter()
        .zip(key)
        .map(|(blocks, index)| blocks.get(..*index).map(|before| before.iter().sum()))
        .collect()
}

/// Shape of block `key`, `None` when the key is not a block of `chunks`
pub fn block_shape(chunks: &[Vec<usize>], key: &[usize]) -> Option<Vec<usize>> {
    if key.len() != chunks.len() {
        return None;
    }
    chunks
        .iter()
        .zip(key)
        .map(|(blocks, index)| blocks.get(*index).copied())
        .collect()
}

/// Shape, block structure and axis pairing of an array placed on a grid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayLayout {
    shape: Vec<usize>,
    chunks: Vec<Vec<usize>>,
    axes: AxisMatch,
}

impl ArrayLayout {
    /// Layout of a pinned builder (`zeros`, `ones`, ...).
    ///
    /// Without `chunk`, the block shape is derived from the grid extents.
    pub fn for_builder(
        dims: &[usize],
        shape: &[usize],
        chunk: Option<&[usize]>,
        dims_axes: Option<&[isize]>,
    ) -> Result<Self> {
        let (chunks, axes) = match chunk {
            Some(chunk) => {
                let chunks = normalize_chunks(shape, chunk)?;
                let axes = AxisMatch::resolve(dims, shape.len(), dims_axes, Some(&counts(&chunks)))?;
                (chunks, axes)
            }
            None => {
                let axes = AxisMatch::resolve(dims, shape.len(), dims_axes, None)?;
                let chunk = local_chunk_shape(shape, &axes)?;
                let chunks = normalize_chunks(shape, &chunk)?;
                axes.check_nchunks(&counts(&chunks))?;
                (chunks, axes)
            }
        };
        Ok(Self {
            shape: shape.to_vec(),
            chunks,
            axes,
        })
    }

    /// Layout of per-slot blocks of uniform shape `chunk`.
    ///
    /// Without `shape`, the whole shape is `chunk` scaled by the grid extents.
    pub fn for_assembly(
        dims: &[usize],
        chunk: &[usize],
        shape: Option<&[usize]>,
        dims_axes: Option<&[isize]>,
    ) -> Result<Self> {
        let shape = match shape {
            Some(shape) => shape.to_vec(),
            None => {
                let axes = AxisMatch::resolve(dims, chunk.len(), dims_axes, None)?;
                derive_shape(chunk, &axes)
            }
        };
        let chunks = normalize_chunks(&shape, chunk)?;
        let axes = AxisMatch::resolve(dims, shape.len(), dims_axes, Some(&counts(&chunks)))?;
        Ok(Self {
            shape,
            chunks,
            axes,
        })
    }

    /// Layout of an existing chunked array
    pub fn from_chunks(
        dims: &[usize],
        chunks: Vec<Vec<usize>>,
        dims_axes: Option<&[isize]>,
    ) -> Result<Self> {
        let shape: Vec<usize> = chunks.iter().map(|blocks| blocks.iter().sum()).collect();
        let axes = AxisMatch::resolve(dims, shape.len(), dims_axes, Some(&counts(&chunks)))?;
        Ok(Self {
            shape,
            chunks,
            axes,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn chunks(&self) -> &[Vec<usize>] {
        &self.chunks
    }

    pub fn axes(&self) -> &AxisMatch {
        &self.axes
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn nchunks(&self) -> Vec<usize> {
        counts(&self.chunks)
    }

    pub fn block_key(&self, coords: &[usize]) -> Vec<usize> {
        self.axes.block_key(coords)
    }

    /// Block index owned by every slot of `grid`, in slot order
    pub fn block_keys(&self, grid: &CartesianGrid) -> Vec<Vec<usize>> {
        grid.coords()
            .iter()
            .map(|coords| self.axes.block_key(coords))
            .collect()
    }

    pub fn block_offset(&self, key: &[usize]) -> Option<Vec<usize>> {
        block_offset(&self.chunks, key)
    }

    pub fn block_shape(&self, key: &[usize]) -> Option<Vec<usize>> {
        block_shape(&self.chunks, key)
    }
}

fn counts(chunks: &[Vec<usize>]) -> Vec<usize> {
    chunks.iter().map(Vec::len).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total(layout: &ArrayLayout) -> usize {
        layout.shape().iter().product()
    }

    #[test]
    fn test_builder_square_grid() {
        let layout = ArrayLayout::for_builder(&[2, 2], &[4, 4, 2], None, None).unwrap();
        assert_eq!(layout.chunks(), &[vec![2, 2], vec![2, 2], vec![2]]);
        assert_eq!(layout.nchunks(), vec![2, 2, 1]);
        assert_eq!(total(&layout), 32);
    }

    #[test]
    fn test_builder_with_dims_axes() {
        let layout =
            ArrayLayout::for_builder(&[2, 2], &[2, 4, 4], Some(&[2, 2, 2]), Some(&[1, 2])).unwrap();
        assert_eq!(layout.nchunks(), vec![1, 2, 2]);
        assert_eq!(layout.block_key(&[1, 0]), vec![0, 1, 0]);

        let layout = ArrayLayout::for_builder(&[2, 2], &[4, 2, 4], None, Some(&[2, 0])).unwrap();
        assert_eq!(layout.chunks(), &[vec![2, 2], vec![2], vec![2, 2]]);
        // grid axis 0 splits array axis 2, grid axis 1 splits array axis 0
        assert_eq!(layout.block_key(&[1, 0]), vec![0, 0, 1]);
        assert_eq!(layout.block_key(&[0, 1]), vec![1, 0, 0]);
    }

    #[test]
    fn test_builder_rejections() {
        let grid = [2, 2];
        assert!(matches!(
            ArrayLayout::for_builder(&grid, &[6, 4], Some(&[2, 2]), None),
            Err(GridError::Shape(_))
        ));
        assert!(matches!(
            ArrayLayout::for_builder(&grid, &[4, 4, 4], Some(&[2, 2, 2]), None),
            Err(GridError::AxisMismatch(_))
        ));
        assert!(matches!(
            ArrayLayout::for_builder(&grid, &[4, 4], Some(&[2, 2]), Some(&[0, 1, 2])),
            Err(GridError::AxisMismatch(_))
        ));
        assert!(matches!(
            ArrayLayout::for_builder(&grid, &[2, 4, 4], Some(&[2, 2, 2]), Some(&[0, 1])),
            Err(GridError::Shape(_))
        ));
        assert!(matches!(
            ArrayLayout::for_builder(&grid, &[1, 1], None, None),
            Err(GridError::Chunking { axis: 0, size: 1, extent: 2 })
        ));
        assert!(matches!(
            ArrayLayout::for_builder(&grid, &[4, 4], None, Some(&[0, 0])),
            Err(GridError::AxisMismatch(_))
        ));
        assert!(matches!(
            ArrayLayout::for_builder(&grid, &[4, 4], None, Some(&[3, 4])),
            Err(GridError::AxisMismatch(_))
        ));
    }

    #[test]
    fn test_unit_extent_axes_are_skipped() {
        let layout = ArrayLayout::for_builder(&[2, 1, 2], &[4, 2, 4], Some(&[2, 2, 2]), None).unwrap();
        assert_eq!(layout.nchunks(), vec![2, 1, 2]);
        assert_eq!(layout.block_key(&[1, 0, 1]), vec![1, 0, 1]);

        let layout = ArrayLayout::for_builder(
            &[1, 2, 1, 1, 2, 1],
            &[1, 4, 2, 4, 1],
            Some(&[1, 2, 2, 2, 1]),
            Some(&[-1, 3, -1, -1, 1, -1]),
        )
        .unwrap();
        assert_eq!(layout.block_key(&[0, 1, 0, 0, 0, 0]), vec![0, 0, 0, 1, 0]);
        assert_eq!(layout.block_key(&[0, 0, 0, 0, 1, 0]), vec![0, 1, 0, 0, 0]);
        assert_eq!(total(&layout), 32);
    }

    #[test]
    fn test_negative_placeholder_on_distributed_axis() {
        let err = AxisMatch::resolve(&[2, 2], 2, Some(&[-1, 0]), None).unwrap_err();
        assert!(matches!(err, GridError::AxisMismatch(_)));
    }

    #[test]
    fn test_rectangular_grid() {
        assert!(ArrayLayout::for_builder(&[3, 2], &[6, 4], Some(&[2, 2]), None).is_ok());
        let layout =
            ArrayLayout::for_builder(&[3, 2], &[4, 6], Some(&[2, 2]), Some(&[1, 0])).unwrap();
        assert_eq!(layout.block_key(&[2, 1]), vec![1, 2]);
        assert!(ArrayLayout::for_builder(&[3, 2], &[4, 6], Some(&[2, 2]), None).is_err());
    }

    #[test]
    fn test_one_dimensional_grid_places_rows() {
        let grid = CartesianGrid::row_major(vec![2], vec![false]).unwrap();
        let layout = ArrayLayout::for_builder(grid.dims(), &[4, 2], Some(&[2, 2]), None).unwrap();
        assert_eq!(layout.block_keys(&grid), vec![vec![0, 0], vec![1, 0]]);
        assert_eq!(layout.block_offset(&[1, 0]), Some(vec![2, 0]));
        assert_eq!(layout.block_shape(&[1, 0]), Some(vec![2, 2]));
    }

    #[test]
    fn test_block_lookup_outside_the_layout() {
        let chunks = vec![vec![2, 2], vec![3]];
        assert_eq!(block_shape(&chunks, &[1, 0]), Some(vec![2, 3]));
        assert_eq!(block_offset(&chunks, &[2, 0]), Some(vec![4, 0]));
        assert_eq!(block_shape(&chunks, &[2, 0]), None);
        assert_eq!(block_offset(&chunks, &[3, 0]), None);
        assert_eq!(block_shape(&chunks, &[0]), None);
        assert_eq!(block_offset(&chunks, &[0, 0, 0]), None);
    }

    #[test]
    fn test_assembly_derives_shape() {
        let layout = ArrayLayout::for_assembly(&[2, 2], &[2, 2, 2], None, None).unwrap();
        assert_eq!(layout.shape(), &[4, 4, 2]);

        let layout = ArrayLayout::for_assembly(&[3, 2], &[2, 2], None, Some(&[1, 0])).unwrap();
        assert_eq!(layout.shape(), &[4, 6]);
    }

    #[test]
    fn test_from_chunks_roundtrip_keys() {
        let layout = ArrayLayout::from_chunks(&[2, 2], vec![vec![2, 2], vec![2, 2]], None).unwrap();
        assert_eq!(layout.shape(), &[4, 4]);
        let grid = CartesianGrid::row_major(vec![2, 2], vec![true, true]).unwrap();
        assert_eq!(
            layout.block_keys(&grid),
            vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]
        );
    }

    #[test]
    fn test_normalize_chunks_remainder() {
        assert_eq!(normalize_chunks(&[5], &[2]).unwrap(), vec![vec![2, 2, 1]]);
        assert!(normalize_chunks(&[5], &[0]).is_err());
        assert!(normalize_chunks(&[5, 1], &[2]).is_err());
    }

    #[test]
    fn test_ceil_chunking_mismatch_is_shape_error() {
        // 5 / 4 rounds up to blocks of 2, giving three blocks for four grid points
        assert!(matches!(
            ArrayLayout::for_builder(&[4], &[5], None, None),
            Err(GridError::Shape(_))
        ));
    }
}
