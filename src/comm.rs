/*!
 * Communicators
 *
 * A communicator is a handle set whose slots hold rank-aware communicator
 * objects, one per selected worker. `create_cart` attaches a Cartesian topology
 * to it; the resulting objects answer `get_topo` and `get_coords`, which is all
 * grid discovery needs.
 */

use quasar_core_interface::{
    Args, ObjectRef, RemoteError, RemoteObject, Task, TaskExecutor, Value, WorkerId,
};
use quasar_core_topology::{coords_of_rank, grid_size, rank_of_coords};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{QuasarError, Result};
use crate::handles::HandleSet;
use crate::topology::GridTopology;

/// Worker-side world communicator
#[derive(Debug)]
pub struct WorldComm {
    rank: usize,
    size: usize,
}

impl WorldComm {
    pub fn new(rank: usize, size: usize) -> Self {
        Self { rank, size }
    }
}

impl RemoteObject for WorldComm {
    fn type_name(&self) -> &'static str {
        "Comm"
    }

    fn get_attr(&self, name: &str) -> std::result::Result<Value, RemoteError> {
        match name {
            "rank" => Ok(self.rank.into()),
            "size" => Ok(self.size.into()),
            _ => Err(RemoteError::AttributeNotFound {
                type_name: self.type_name().to_string(),
                name: name.to_string(),
            }),
        }
    }

    fn set_attr(&mut self, name: &str, _value: Value) -> std::result::Result<(), RemoteError> {
        Err(RemoteError::Failed(format!(
            "attribute '{}' of Comm is read-only",
            name
        )))
    }

    fn call(&mut self, method: &str, args: Args) -> std::result::Result<Value, RemoteError> {
        match method {
            "create_cart" => {
                let dims = args.require(0, "dims")?.to_usizes()?;
                let periods = match args.lookup(1, "periods") {
                    Some(value) => value.to_bools()?,
                    None => vec![true; dims.len()],
                };
                let cart = CartCommObject::new(self.rank, dims, periods, self.size)?;
                Ok(ObjectRef::new(Box::new(cart)).into())
            }
            "get_rank" => Ok(self.rank.into()),
            "get_size" => Ok(self.size.into()),
            _ => Err(RemoteError::MethodNotFound {
                type_name: self.type_name().to_string(),
                name: method.to_string(),
            }),
        }
    }
}

/// Worker-side Cartesian communicator; ranks map to row-major coordinates
#[derive(Debug)]
pub struct CartCommObject {
    rank: usize,
    dims: Vec<usize>,
    periods: Vec<bool>,
    coords: Vec<usize>,
}

impl CartCommObject {
    pub fn new(
        rank: usize,
        dims: Vec<usize>,
        periods: Vec<bool>,
        size: usize,
    ) -> std::result::Result<Self, RemoteError> {
        if grid_size(&dims) != size {
            return Err(RemoteError::Failed(format!(
                "dims {:?} hold {} processes but the communicator has {}",
                dims,
                grid_size(&dims),
                size
            )));
        }
        if periods.len() != dims.len() {
            return Err(RemoteError::Failed(format!(
                "periods {:?} do not match dims {:?}",
                periods, dims
            )));
        }
        let coords = coords_of_rank(&dims, rank);
        Ok(Self {
            rank,
            dims,
            periods,
            coords,
        })
    }
}

impl RemoteObject for CartCommObject {
    fn type_name(&self) -> &'static str {
        "CartComm"
    }

    fn get_attr(&self, name: &str) -> std::result::Result<Value, RemoteError> {
        match name {
            "rank" => Ok(self.rank.into()),
            "dims" => Ok(Value::from_usizes(&self.dims)),
            "periods" => Ok(Value::from_bools(&self.periods)),
            "coords" => Ok(Value::from_usizes(&self.coords)),
            "ndim" => Ok(self.dims.len().into()),
            _ => Err(RemoteError::AttributeNotFound {
                type_name: self.type_name().to_string(),
                name: name.to_string(),
            }),
        }
    }

    fn set_attr(&mut self, name: &str, _value: Value) -> std::result::Result<(), RemoteError> {
        Err(RemoteError::Failed(format!(
            "attribute '{}' of CartComm is read-only",
            name
        )))
    }

    fn call(&mut self, method: &str, args: Args) -> std::result::Result<Value, RemoteError> {
        match method {
            "get_topo" => Ok(Value::Tuple(vec![
                Value::from_usizes(&self.dims),
                Value::from_bools(&self.periods),
                Value::from_usizes(&self.coords),
            ])),
            "get_coords" => Ok(Value::from_usizes(&self.coords)),
            "get_cart_rank" => {
                let coords = args.require(0, "coords")?.to_usizes()?;
                Ok(rank_of_coords(&self.dims, &coords).into())
            }
            _ => Err(RemoteError::MethodNotFound {
                type_name: self.type_name().to_string(),
                name: method.to_string(),
            }),
        }
    }
}

/// Key accepted by [`Comm::index`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommKey {
    Rank(usize),
    Worker(WorkerId),
}

/// A communicator spanning a set of workers
pub struct Comm {
    handles: HandleSet,
    ranks: Vec<usize>,
    workers: Vec<WorkerId>,
}

impl Comm {
    /// Build a communicator over `workers`, one rank per worker in order.
    pub async fn create(executor: Arc<dyn TaskExecutor>, workers: &[WorkerId]) -> Result<Self> {
        if workers.is_empty() {
            return Err(QuasarError::Config(
                "a communicator needs at least one worker".to_string(),
            ));
        }
        let size = workers.len();
        let ranks: Vec<Value> = (0..size).map(Value::from).collect();
        let scattered = HandleSet::new(executor.clone(), executor.scatter(ranks, workers, false).await?);

        // every worker must have received exactly one rank
        let holders = scattered.workers().await?;
        if holders != workers {
            return Err(QuasarError::Topology(format!(
                "ranks landed on {:?}, expected {:?}",
                holders, workers
            )));
        }

        let comms = scattered
            .map(Task::new("comm:create", move |values| {
                let rank = values[0]
                    .as_int()
                    .ok_or_else(|| RemoteError::type_mismatch("a rank", &values[0]))?;
                Ok(ObjectRef::new(Box::new(WorldComm::new(rank as usize, size))).into())
            }))
            .await?;

        let ranks = comms
            .map(Task::new("comm:rank", |values| match values[0].as_object() {
                Some(comm) => comm.get_attr("rank"),
                None => Err(RemoteError::type_mismatch("a communicator", &values[0])),
            }))
            .await?
            .results()
            .await?
            .iter()
            .map(|rank| {
                rank.as_int()
                    .map(|r| r as usize)
                    .ok_or_else(|| QuasarError::Topology(format!("invalid rank {}", rank)))
            })
            .collect::<Result<Vec<_>>>()?;

        let workers = comms.workers().await?;
        info!("Created communicator of size {} over {:?}", size, workers);
        Ok(Self {
            handles: comms,
            ranks,
            workers,
        })
    }

    pub fn handles(&self) -> &HandleSet {
        &self.handles
    }

    pub fn executor(&self) -> &Arc<dyn TaskExecutor> {
        self.handles.executor()
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    pub fn ranks(&self) -> &[usize] {
        &self.ranks
    }

    pub fn workers(&self) -> &[WorkerId] {
        &self.workers
    }

    pub fn ranks_workers(&self) -> Vec<(usize, WorkerId)> {
        self.ranks
            .iter()
            .copied()
            .zip(self.workers.iter().cloned())
            .collect()
    }

    /// Slot index of a rank or worker
    pub fn index(&self, key: &CommKey) -> Result<usize> {
        let found = match key {
            CommKey::Rank(rank) => self.ranks.iter().position(|r| r == rank),
            CommKey::Worker(worker) => self.workers.iter().position(|w| w == worker),
        };
        found.ok_or_else(|| {
            QuasarError::KeyNotFound(format!("{:?} is neither a rank nor a worker of the communicator", key))
        })
    }

    /// Attach a Cartesian topology with the given extents.
    ///
    /// The product of `dims` must equal the communicator size; this is checked
    /// before anything is submitted.
    pub async fn create_cart(&self, dims: &[usize], periods: &[bool]) -> Result<Arc<GridTopology>> {
        if dims.is_empty() || dims.contains(&0) {
            return Err(QuasarError::Topology(format!(
                "invalid grid dims {:?}",
                dims
            )));
        }
        if grid_size(dims) != self.size() {
            return Err(QuasarError::Topology(format!(
                "dims {:?} hold {} processes but the communicator has {}",
                dims,
                grid_size(dims),
                self.size()
            )));
        }
        if periods.len() != dims.len() {
            return Err(QuasarError::Topology(format!(
                "periods {:?} do not match dims {:?}",
                periods, dims
            )));
        }

        debug!(dims = ?dims, periods = ?periods, "Creating Cartesian communicator");
        let args = Args::positional(vec![Value::from_usizes(dims), Value::from_bools(periods)]);
        let carts = self
            .handles
            .map(Task::new("comm:create_cart", move |values| {
                match values[0].as_object() {
                    Some(comm) => comm.call("create_cart", args.clone()),
                    None => Err(RemoteError::type_mismatch("a communicator", &values[0])),
                }
            }))
            .await?;
        GridTopology::discover(carts).await
    }
}

impl std::fmt::Debug for Comm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Comm")
            .field("ranks", &self.ranks)
            .field("workers", &self.workers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quasar_local::{ClusterConfig, LocalCluster};

    async fn world(n: usize) -> (Arc<LocalCluster>, Comm) {
        let cluster = Arc::new(LocalCluster::start(ClusterConfig::with_workers(n)).await.unwrap());
        let executor: Arc<dyn TaskExecutor> = cluster.clone();
        let comm = Comm::create(executor.clone(), &executor.workers()).await.unwrap();
        (cluster, comm)
    }

    #[test]
    fn test_cart_object_row_major() {
        let mut cart = CartCommObject::new(3, vec![2, 2], vec![true, false], 4).unwrap();
        assert_eq!(cart.get_attr("coords").unwrap(), Value::from_usizes(&[1, 1]));
        let rank = cart
            .call("get_cart_rank", Args::new().with(Value::from_usizes(&[1, 0])))
            .unwrap();
        assert_eq!(rank, Value::Int(2));
        assert!(CartCommObject::new(0, vec![3], vec![true], 4).is_err());
    }

    #[tokio::test]
    async fn test_world_ranks_and_workers() {
        let (cluster, comm) = world(3).await;
        assert_eq!(comm.size(), 3);
        assert_eq!(comm.ranks(), &[0, 1, 2]);
        assert_eq!(comm.workers(), cluster.workers().as_slice());
        assert_eq!(comm.index(&CommKey::Rank(2)).unwrap(), 2);
        assert_eq!(
            comm.index(&CommKey::Worker(WorkerId::new("local-1"))).unwrap(),
            1
        );
        assert!(matches!(
            comm.index(&CommKey::Rank(7)),
            Err(QuasarError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_cart_checks_size_before_submitting() {
        let (cluster, comm) = world(4).await;
        let before = cluster.submitted_tasks();
        let err = comm.create_cart(&[3, 2], &[true, true]).await.unwrap_err();
        assert!(matches!(err, QuasarError::Topology(_)));
        assert_eq!(cluster.submitted_tasks(), before);
    }
}
