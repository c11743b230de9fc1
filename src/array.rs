/*!
 * Chunked arrays whose blocks live on workers
 */

use futures::future::join_all;
use quasar_core_interface::{
    Block, DType, HandleId, RemoteError, Task, TaskExecutor, Value, WorkerId,
};
use quasar_core_topology::{block_offset, block_shape};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::{QuasarError, Result};

/// Where one block of a chunked array lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRef {
    pub handle: HandleId,
    pub worker: WorkerId,
}

/// Shape, block structure, element type and block placement of an array
#[derive(Clone)]
pub struct ChunkedArray {
    shape: Vec<usize>,
    chunks: Vec<Vec<usize>>,
    dtype: DType,
    blocks: BTreeMap<Vec<usize>, BlockRef>,
    executor: Arc<dyn TaskExecutor>,
}

impl ChunkedArray {
    /// Build a descriptor from a complete block map.
    ///
    /// Every block index implied by `chunks` must be present.
    pub fn new(
        executor: Arc<dyn TaskExecutor>,
        shape: Vec<usize>,
        chunks: Vec<Vec<usize>>,
        dtype: DType,
        blocks: BTreeMap<Vec<usize>, BlockRef>,
    ) -> Result<Self> {
        if chunks.len() != shape.len() {
            return Err(QuasarError::Shape(format!(
                "chunks {:?} do not match shape {:?}",
                chunks, shape
            )));
        }
        for (axis, (blocks, size)) in chunks.iter().zip(&shape).enumerate() {
            if blocks.iter().sum::<usize>() != *size {
                return Err(QuasarError::Shape(format!(
                    "chunks {:?} on axis {} do not add up to {}",
                    blocks, axis, size
                )));
            }
        }
        let expected: usize = chunks.iter().map(Vec::len).product();
        if blocks.len() != expected {
            return Err(QuasarError::Shape(format!(
                "array with chunks {:?} needs {} blocks, got {}",
                chunks,
                expected,
                blocks.len()
            )));
        }
        if let Some(key) = blocks
            .keys()
            .find(|key| key.len() != chunks.len() || key.iter().zip(&chunks).any(|(k, c)| *k >= c.len()))
        {
            return Err(QuasarError::Shape(format!(
                "block {:?} is outside chunk grid {:?}",
                key,
                chunks.iter().map(Vec::len).collect::<Vec<_>>()
            )));
        }
        Ok(Self {
            shape,
            chunks,
            dtype,
            blocks,
            executor,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn chunks(&self) -> &[Vec<usize>] {
        &self.chunks
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn nchunks(&self) -> Vec<usize> {
        self.chunks.iter().map(Vec::len).collect()
    }

    pub fn blocks(&self) -> &BTreeMap<Vec<usize>, BlockRef> {
        &self.blocks
    }

    pub fn block(&self, key: &[usize]) -> Option<&BlockRef> {
        self.blocks.get(key)
    }

    pub fn executor(&self) -> &Arc<dyn TaskExecutor> {
        &self.executor
    }

    /// Block key to owning worker
    pub fn placement(&self) -> Vec<(Vec<usize>, WorkerId)> {
        self.blocks
            .iter()
            .map(|(key, block)| (key.clone(), block.worker.clone()))
            .collect()
    }

    /// Shape of block `key`, `None` for a key outside the block grid
    pub fn block_shape(&self, key: &[usize]) -> Option<Vec<usize>> {
        block_shape(&self.chunks, key)
    }

    /// Sum of all elements; each block is reduced on its own worker
    pub async fn sum(&self) -> Result<Value> {
        let mut partials = Vec::with_capacity(self.blocks.len());
        for block in self.blocks.values() {
            let handle = self
                .executor
                .submit(
                    Task::new("array:sum", |values| match values[0].as_block() {
                        Some(block) => block.sum(),
                        None => Err(RemoteError::type_mismatch("an array block", &values[0])),
                    }),
                    &[block.handle],
                    Some(&block.worker),
                )
                .await?;
            partials.push(handle);
        }

        let mut total = match self.dtype {
            DType::Int64 => Value::Int(0),
            DType::Float64 => Value::Float(0.0),
        };
        for partial in join_all(partials.into_iter().map(|h| self.executor.resolve(h))).await {
            total = match (total, partial?) {
                (Value::Int(a), Value::Int(b)) => match a.checked_add(b) {
                    Some(total) => Value::Int(total),
                    None => {
                        return Err(QuasarError::Shape(format!(
                            "integer overflow adding partial sum {} to {}",
                            b, a
                        )))
                    }
                },
                (a, b) => match (a.as_float(), b.as_float()) {
                    (Some(a), Some(b)) => Value::Float(a + b),
                    _ => {
                        return Err(QuasarError::Shape(format!(
                            "cannot add partial sum {}",
                            b
                        )))
                    }
                },
            };
        }
        debug!(blocks = self.blocks.len(), "Reduced chunked array");
        Ok(total)
    }

    /// Fetch every block and stitch them into one local block
    pub async fn gather(&self) -> Result<Block> {
        let keys: Vec<&Vec<usize>> = self.blocks.keys().collect();
        let fetched = join_all(
            self.blocks
                .values()
                .map(|block| self.executor.resolve(block.handle)),
        )
        .await;

        let mut parts = Vec::with_capacity(fetched.len());
        for (key, value) in keys.into_iter().zip(fetched) {
            let value = value?;
            let block = value.as_block().ok_or_else(|| {
                QuasarError::Shape(format!("block {:?} holds {}, not an array", key, value.type_name()))
            })?;
            let offset = block_offset(&self.chunks, key)
                .ok_or_else(|| QuasarError::Shape(format!("block {:?} is outside {:?}", key, self.chunks)))?;
            parts.push((offset, block.clone()));
        }
        Block::stitch(self.dtype, &self.shape, &parts).map_err(|e| QuasarError::Shape(e.to_string()))
    }
}

impl fmt::Debug for ChunkedArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedArray")
            .field("shape", &self.shape)
            .field("chunks", &self.chunks)
            .field("dtype", &self.dtype)
            .field("blocks", &self.blocks)
            .finish()
    }
}
