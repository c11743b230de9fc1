/*!
 * Grid topology discovery and lookup
 *
 * A `GridTopology` is built from a handle set of Cartesian communicator objects.
 * One representative slot reports the grid extents and periodicity; every slot
 * reports its own rank and coordinate. The assembled grid is immutable and is
 * shared by every proxy created on it.
 */

use quasar_core_interface::{RemoteError, Task, TaskExecutor, Value, WorkerId};
use quasar_core_topology::CartesianGrid;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{QuasarError, Result};
use crate::handles::HandleSet;

static NEXT_GRID_ID: AtomicU64 = AtomicU64::new(1);

/// Key accepted by [`GridTopology::index`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridKey {
    Rank(usize),
    Worker(WorkerId),
    Coords(Vec<usize>),
}

impl From<usize> for GridKey {
    fn from(rank: usize) -> Self {
        GridKey::Rank(rank)
    }
}

impl From<WorkerId> for GridKey {
    fn from(worker: WorkerId) -> Self {
        GridKey::Worker(worker)
    }
}

impl From<&str> for GridKey {
    fn from(worker: &str) -> Self {
        GridKey::Worker(WorkerId::new(worker))
    }
}

impl From<Vec<usize>> for GridKey {
    fn from(coords: Vec<usize>) -> Self {
        GridKey::Coords(coords)
    }
}

impl From<&[usize]> for GridKey {
    fn from(coords: &[usize]) -> Self {
        GridKey::Coords(coords.to_vec())
    }
}

/// An N-dimensional process grid over a handle set of communicators
pub struct GridTopology {
    id: u64,
    handles: HandleSet,
    grid: CartesianGrid,
    workers: Vec<WorkerId>,
    ranks: Vec<usize>,
}

impl GridTopology {
    /// Discover the grid held by `handles`.
    ///
    /// # Errors
    ///
    /// `QuasarError::Topology` when two slots share a worker, when the reported
    /// coordinates disagree with the extents, or when two slots report the same
    /// coordinate.
    pub async fn discover(handles: HandleSet) -> Result<Arc<Self>> {
        if handles.is_empty() {
            return Err(QuasarError::Topology(
                "cannot build a grid from an empty handle set".to_string(),
            ));
        }
        let workers = handles.workers().await?;
        let executor = handles.executor().clone();

        let topo = executor
            .submit(
                Task::new("topology:get_topo", |values| call_cart(&values[0], "get_topo")),
                &[handles.handle(0)?],
                Some(&workers[0]),
            )
            .await?;
        let (dims, periods) = parse_topo(&executor.resolve(topo).await?)?;

        let reports = handles
            .map(Task::new("topology:locate", |values| {
                let cart = values[0]
                    .as_object()
                    .ok_or_else(|| RemoteError::type_mismatch("a Cartesian communicator", &values[0]))?;
                let rank = cart.get_attr("rank")?;
                let coords = cart.call("get_coords", Default::default())?;
                Ok(Value::Tuple(vec![rank, coords]))
            }))
            .await?
            .results()
            .await?;

        let mut ranks = Vec::with_capacity(reports.len());
        let mut coords = Vec::with_capacity(reports.len());
        for (slot, report) in reports.iter().enumerate() {
            let (rank, coord) = parse_location(report).ok_or_else(|| {
                QuasarError::Topology(format!("slot {} reported an invalid location {}", slot, report))
            })?;
            ranks.push(rank);
            coords.push(coord);
        }

        let grid = CartesianGrid::new(dims, periods, coords)?;
        let id = NEXT_GRID_ID.fetch_add(1, Ordering::Relaxed);
        info!(
            grid = id,
            dims = ?grid.dims(),
            periods = ?grid.periods(),
            "Discovered grid topology over {} workers",
            workers.len()
        );
        debug!(grid = id, coords = ?grid.coords(), "Grid coordinates");

        Ok(Arc::new(Self {
            id,
            handles,
            grid,
            workers,
            ranks,
        }))
    }

    /// Process-unique identity; two grids are the same grid iff ids match
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.grid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }

    pub fn dims(&self) -> &[usize] {
        self.grid.dims()
    }

    pub fn periods(&self) -> &[bool] {
        self.grid.periods()
    }

    pub fn ndim(&self) -> usize {
        self.grid.ndim()
    }

    pub fn coords(&self) -> &[Vec<usize>] {
        self.grid.coords()
    }

    pub fn ranks(&self) -> &[usize] {
        &self.ranks
    }

    pub fn workers(&self) -> &[WorkerId] {
        &self.workers
    }

    pub fn grid(&self) -> &CartesianGrid {
        &self.grid
    }

    /// The communicator handles the grid was discovered from
    pub fn handles(&self) -> &HandleSet {
        &self.handles
    }

    pub fn executor(&self) -> &Arc<dyn TaskExecutor> {
        self.handles.executor()
    }

    pub fn ranks_coords(&self) -> Vec<(usize, Vec<usize>)> {
        self.ranks
            .iter()
            .copied()
            .zip(self.grid.coords().iter().cloned())
            .collect()
    }

    pub fn ranks_workers(&self) -> Vec<(usize, WorkerId)> {
        self.ranks
            .iter()
            .copied()
            .zip(self.workers.iter().cloned())
            .collect()
    }

    /// Slot index of a rank, a worker or a coordinate.
    ///
    /// Coordinate keys are reconciled with the grid arity: missing trailing
    /// components are zero, extra ones must be zero.
    pub fn index(&self, key: &GridKey) -> Result<usize> {
        match key {
            GridKey::Rank(rank) => self
                .ranks
                .iter()
                .position(|r| r == rank)
                .ok_or_else(|| QuasarError::KeyNotFound(format!("rank {}", rank))),
            GridKey::Worker(worker) => self
                .workers
                .iter()
                .position(|w| w == worker)
                .ok_or_else(|| QuasarError::KeyNotFound(format!("worker {}", worker))),
            GridKey::Coords(coords) => Ok(self.grid.index_of(coords)?),
        }
    }

    /// Worker owning grid point `key`
    pub fn worker_of(&self, key: &GridKey) -> Result<&WorkerId> {
        let index = self.index(key)?;
        Ok(&self.workers[index])
    }

    /// Neighbor of slot `index` displaced by `disp` along `axis`
    pub fn shift(&self, index: usize, axis: usize, disp: isize) -> Result<Option<usize>> {
        Ok(self.grid.shift(index, axis, disp)?)
    }

    /// Whether `other` is this very grid
    pub fn same_grid(&self, other: &GridTopology) -> bool {
        self.id == other.id
    }
}

impl std::fmt::Debug for GridTopology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridTopology")
            .field("id", &self.id)
            .field("dims", &self.grid.dims())
            .field("periods", &self.grid.periods())
            .field("workers", &self.workers)
            .finish()
    }
}

fn call_cart(value: &Value, method: &str) -> std::result::Result<Value, RemoteError> {
    match value.as_object() {
        Some(cart) => cart.call(method, Default::default()),
        None => Err(RemoteError::type_mismatch("a Cartesian communicator", value)),
    }
}

fn parse_topo(topo: &Value) -> Result<(Vec<usize>, Vec<bool>)> {
    let invalid = || QuasarError::Topology(format!("invalid topology report {}", topo));
    match topo.as_tuple() {
        Some([dims, periods, ..]) => {
            let dims = dims.to_usizes().map_err(|_| invalid())?;
            let periods = periods.to_bools().map_err(|_| invalid())?;
            Ok((dims, periods))
        }
        _ => Err(invalid()),
    }
}

fn parse_location(report: &Value) -> Option<(usize, Vec<usize>)> {
    match report.as_tuple()? {
        [rank, coords] => {
            let rank = usize::try_from(rank.as_int()?).ok()?;
            Some((rank, coords.to_usizes().ok()?))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::Comm;
    use quasar_local::{ClusterConfig, LocalCluster};

    async fn cart(n: usize, dims: &[usize], periods: &[bool]) -> Arc<GridTopology> {
        let cluster = LocalCluster::start(ClusterConfig::with_workers(n)).await.unwrap();
        let executor: Arc<dyn TaskExecutor> = Arc::new(cluster);
        let comm = Comm::create(executor.clone(), &executor.workers()).await.unwrap();
        comm.create_cart(dims, periods).await.unwrap()
    }

    #[tokio::test]
    async fn test_discovery_is_bijective() {
        let grid = cart(4, &[2, 2], &[false, false]).await;
        assert_eq!(grid.len(), 4);
        assert_eq!(grid.dims(), &[2, 2]);
        assert_eq!(
            grid.coords(),
            &[vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]
        );
        assert_eq!(grid.ranks(), &[0, 1, 2, 3]);
        assert_eq!(grid.ranks_coords()[3], (3, vec![1, 1]));
    }

    #[tokio::test]
    async fn test_index_by_rank_worker_and_coords() {
        let grid = cart(2, &[2], &[false]).await;
        assert_eq!(grid.index(&GridKey::from(1usize)).unwrap(), 1);
        assert_eq!(grid.index(&GridKey::from("local-0")).unwrap(), 0);
        assert_eq!(grid.index(&GridKey::from(vec![1, 0, 0])).unwrap(), 1);
        assert!(matches!(
            grid.index(&GridKey::from(vec![1, 0, 1])),
            Err(QuasarError::KeyNotFound(_))
        ));
        assert!(matches!(
            grid.index(&GridKey::from("elsewhere")),
            Err(QuasarError::KeyNotFound(_))
        ));
        assert_eq!(grid.worker_of(&GridKey::Rank(1)).unwrap().as_str(), "local-1");
    }

    #[tokio::test]
    async fn test_shift_wraps_on_periodic_axes() {
        let grid = cart(4, &[4], &[true]).await;
        assert_eq!(grid.shift(3, 0, 1).unwrap(), Some(0));
        assert_eq!(grid.shift(0, 0, -1).unwrap(), Some(3));

        let open = cart(4, &[4], &[false]).await;
        assert_eq!(open.shift(3, 0, 1).unwrap(), None);
        assert!(!grid.same_grid(&open));
    }

    #[test]
    fn test_parse_location_rejects_garbage() {
        assert!(parse_location(&Value::Int(3)).is_none());
        let report = Value::Tuple(vec![Value::Int(2), Value::from_usizes(&[1, 0])]);
        assert_eq!(parse_location(&report), Some((2, vec![1, 0])));
    }
}
