/*!
 * Placement engine: chunked arrays on a process grid
 *
 * `assemble` turns one block per grid point into a chunked array, `disassemble`
 * goes the other way, and the builders create arrays whose blocks are computed
 * directly on the worker owning them. The layout math lives in
 * `quasar_core_topology::placement`; everything that can be checked locally is
 * checked before the first task is submitted.
 */

use quasar_core_interface::{Block, DType, RemoteError, Task, Value};
use quasar_core_topology::ArrayLayout;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::array::{BlockRef, ChunkedArray};
use crate::error::{QuasarError, Result};
use crate::handles::HandleSet;
use crate::topology::GridTopology;

/// Optional description of the array a dispatch returns
///
/// Missing `chunks` or `dtype` are probed from the slots; a missing `shape` is
/// derived from the block shape and the grid extents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArraySpec {
    pub shape: Option<Vec<usize>>,
    pub chunks: Option<Vec<usize>>,
    pub dtype: Option<DType>,
    pub dims_axes: Option<Vec<isize>>,
}

impl ArraySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shape(mut self, shape: &[usize]) -> Self {
        self.shape = Some(shape.to_vec());
        self
    }

    pub fn chunks(mut self, chunks: &[usize]) -> Self {
        self.chunks = Some(chunks.to_vec());
        self
    }

    pub fn dtype(mut self, dtype: DType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    pub fn dims_axes(mut self, dims_axes: &[isize]) -> Self {
        self.dims_axes = Some(dims_axes.to_vec());
        self
    }
}

/// Options of the pinned builders
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildOptions {
    /// Block shape; defaults to `ceil(size / extent)` on distributed axes
    pub chunks: Option<Vec<usize>>,
    pub dtype: DType,
    pub dims_axes: Option<Vec<isize>>,
}

impl BuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(mut self, chunks: &[usize]) -> Self {
        self.chunks = Some(chunks.to_vec());
        self
    }

    pub fn dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    pub fn dims_axes(mut self, dims_axes: &[isize]) -> Self {
        self.dims_axes = Some(dims_axes.to_vec());
        self
    }
}

impl GridTopology {
    /// Turn one block per grid point into a chunked array.
    ///
    /// Slot *i* holds the block of grid point `coords[i]`; blocks are left on
    /// the worker that holds them.
    pub async fn assemble(&self, slots: &HandleSet, spec: &ArraySpec) -> Result<ChunkedArray> {
        if slots.len() != self.len() {
            return Err(QuasarError::Shape(format!(
                "{} blocks given for a grid of {} points",
                slots.len(),
                self.len()
            )));
        }

        let (dtype, chunk) = match (spec.dtype, spec.chunks.clone()) {
            (Some(dtype), Some(chunk)) => (dtype, chunk),
            (dtype, chunk) => {
                let (probed_dtype, probed_chunk) = probe(slots).await?;
                (dtype.unwrap_or(probed_dtype), chunk.unwrap_or(probed_chunk))
            }
        };

        let layout = ArrayLayout::for_assembly(
            self.dims(),
            &chunk,
            spec.shape.as_deref(),
            spec.dims_axes.as_deref(),
        )?;

        let mut blocks = BTreeMap::new();
        for (index, coords) in self.coords().iter().enumerate() {
            let key = layout.block_key(coords);
            let block = BlockRef {
                handle: slots.handle(index)?,
                worker: slots.owner(index).await?,
            };
            if blocks.insert(key.clone(), block).is_some() {
                return Err(QuasarError::Shape(format!(
                    "two grid points map onto block {:?}",
                    key
                )));
            }
        }

        debug!(shape = ?layout.shape(), chunks = ?layout.chunks(), "Assembled chunked array");
        ChunkedArray::new(
            self.executor().clone(),
            layout.shape().to_vec(),
            layout.chunks().to_vec(),
            dtype,
            blocks,
        )
    }

    /// Extract the block owned by every grid point, in slot order.
    ///
    /// Blocks already on the right worker are reused as they are; others are
    /// copied there.
    pub async fn disassemble(
        &self,
        array: &ChunkedArray,
        dims_axes: Option<&[isize]>,
    ) -> Result<HandleSet> {
        let layout = ArrayLayout::from_chunks(self.dims(), array.chunks().to_vec(), dims_axes)?;

        let mut sources = Vec::with_capacity(self.len());
        for coords in self.coords() {
            let key = layout.block_key(coords);
            let block = array.block(&key).ok_or_else(|| {
                QuasarError::Shape(format!("array has no block {:?}", key))
            })?;
            sources.push(block);
        }

        let mut handles = Vec::with_capacity(sources.len());
        let mut moved = 0;
        for (block, worker) in sources.into_iter().zip(self.workers()) {
            if &block.worker == worker {
                handles.push(block.handle);
            } else {
                moved += 1;
                handles.push(
                    self.executor()
                        .submit(Task::identity(), &[block.handle], Some(worker))
                        .await?,
                );
            }
        }
        if moved > 0 {
            debug!(moved, "Relocated blocks onto their grid points");
        }
        Ok(HandleSet::dispatched(
            self.executor().clone(),
            handles,
            self.workers().to_vec(),
        ))
    }

    pub async fn zeros(&self, shape: &[usize], options: &BuildOptions) -> Result<ChunkedArray> {
        self.build("zeros", shape, options, 0.0).await
    }

    pub async fn ones(&self, shape: &[usize], options: &BuildOptions) -> Result<ChunkedArray> {
        self.build("ones", shape, options, 1.0).await
    }

    /// Same as [`GridTopology::zeros`]; blocks are always initialised
    pub async fn empty(&self, shape: &[usize], options: &BuildOptions) -> Result<ChunkedArray> {
        self.build("empty", shape, options, 0.0).await
    }

    pub async fn full(
        &self,
        shape: &[usize],
        fill: f64,
        options: &BuildOptions,
    ) -> Result<ChunkedArray> {
        self.build("full", shape, options, fill).await
    }

    async fn build(
        &self,
        name: &str,
        shape: &[usize],
        options: &BuildOptions,
        fill: f64,
    ) -> Result<ChunkedArray> {
        let layout = ArrayLayout::for_builder(
            self.dims(),
            shape,
            options.chunks.as_deref(),
            options.dims_axes.as_deref(),
        )?;

        let dtype = options.dtype;
        if dtype == DType::Int64 && (!fill.is_finite() || fill.fract() != 0.0) {
            return Err(QuasarError::Shape(format!(
                "fill value {} is not an integer, but the array dtype is {}",
                fill, dtype
            )));
        }

        let mut plan = Vec::with_capacity(self.len());
        for (coords, worker) in self.coords().iter().zip(self.workers()) {
            let key = layout.block_key(coords);
            let block_shape = layout.block_shape(&key).ok_or_else(|| {
                QuasarError::AxisMismatch(format!("grid point {:?} maps to no block", coords))
            })?;
            plan.push((key, block_shape, worker));
        }

        let mut blocks = BTreeMap::new();
        for (key, block_shape, worker) in plan {
            let handle = self
                .executor()
                .submit(
                    Task::new(format!("array:{}", name), move |_| {
                        Ok(Value::Block(Block::full(dtype, &block_shape, fill)))
                    }),
                    &[],
                    Some(worker),
                )
                .await?;
            blocks.insert(
                key,
                BlockRef {
                    handle,
                    worker: worker.clone(),
                },
            );
        }

        info!(
            shape = ?layout.shape(),
            chunks = ?layout.chunks(),
            "Built {} array on {} workers",
            name,
            self.len()
        );
        ChunkedArray::new(
            self.executor().clone(),
            layout.shape().to_vec(),
            layout.chunks().to_vec(),
            dtype,
            blocks,
        )
    }
}

/// Ask every slot for its dtype and block shape and require them to agree
async fn probe(slots: &HandleSet) -> Result<(DType, Vec<usize>)> {
    let reports = slots
        .map(Task::new("array:describe", |values| match values[0].as_block() {
            Some(block) => Ok(Value::Tuple(vec![
                Value::Str(block.dtype().to_string()),
                Value::from_usizes(&block.shape()),
            ])),
            None => Err(RemoteError::type_mismatch("an array block", &values[0])),
        }))
        .await?
        .results()
        .await?;

    let mut dtypes = Vec::with_capacity(reports.len());
    let mut shapes = Vec::with_capacity(reports.len());
    for report in &reports {
        let invalid = || QuasarError::Shape(format!("invalid block description {}", report));
        match report.as_tuple() {
            Some([dtype, shape]) => {
                let dtype: DType = dtype
                    .as_str()
                    .ok_or_else(invalid)?
                    .parse()
                    .map_err(|_| invalid())?;
                dtypes.push(dtype);
                shapes.push(shape.to_usizes().map_err(|_| invalid())?);
            }
            _ => return Err(invalid()),
        }
    }

    let (Some(dtype), Some(shape)) = (dtypes.first().copied(), shapes.first().cloned()) else {
        return Err(QuasarError::Shape("no blocks to describe".to_string()));
    };
    if dtypes.iter().any(|d| *d != dtype) {
        return Err(QuasarError::DTypeMismatch { dtypes });
    }
    if shapes.iter().any(|s| *s != shape) {
        return Err(QuasarError::NotImplemented(format!(
            "blocks with non-uniform shapes {:?}",
            shapes
        )));
    }
    Ok((dtype, shape))
}
