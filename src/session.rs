/*!
 * Distributed session context
 *
 * A `Session` is created once with an explicit configuration and owns the world
 * communicator. Every grid, communicator and handle set of the session is
 * derived from it; nothing is stored in a global default.
 */

use quasar_core_interface::{TaskExecutor, Value, WorkerId};
use quasar_core_topology::grid_size;
use quasar_local::LocalCluster;
use std::sync::Arc;
use tracing::{debug, info};

use crate::comm::Comm;
use crate::config::SessionConfig;
use crate::error::{QuasarError, Result};
use crate::handles::HandleSet;
use crate::topology::GridTopology;

/// Which workers a new communicator should span
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSelection {
    /// How many to take (default: all remaining)
    pub num_workers: Option<usize>,
    /// Candidates (default: the whole pool)
    pub workers: Vec<WorkerId>,
    pub exclude: Vec<WorkerId>,
}

impl WorkerSelection {
    pub fn count(num_workers: usize) -> Self {
        Self {
            num_workers: Some(num_workers),
            ..Default::default()
        }
    }

    pub fn among(mut self, workers: impl IntoIterator<Item = WorkerId>) -> Self {
        self.workers.extend(workers);
        self
    }

    pub fn excluding(mut self, workers: impl IntoIterator<Item = WorkerId>) -> Self {
        self.exclude.extend(workers);
        self
    }
}

pub struct Session {
    config: SessionConfig,
    executor: Arc<dyn TaskExecutor>,
    cluster: Option<Arc<LocalCluster>>,
    world: Comm,
}

impl Session {
    /// Start an in-process pool and build the world communicator on it
    pub async fn local(config: SessionConfig) -> Result<Self> {
        let cluster = Arc::new(LocalCluster::start(config.cluster_config()).await?);
        let executor: Arc<dyn TaskExecutor> = cluster.clone();
        let mut session = Self::connect(executor, config).await?;
        session.cluster = Some(cluster);
        Ok(session)
    }

    /// Use an existing executor
    pub async fn connect(executor: Arc<dyn TaskExecutor>, config: SessionConfig) -> Result<Self> {
        let workers = executor.workers();
        let world = Comm::create(executor.clone(), &workers).await?;
        info!("Session started with {} workers", workers.len());
        Ok(Self {
            config,
            executor,
            cluster: None,
            world,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn executor(&self) -> &Arc<dyn TaskExecutor> {
        &self.executor
    }

    /// The in-process pool, when the session started one
    pub fn cluster(&self) -> Option<&Arc<LocalCluster>> {
        self.cluster.as_ref()
    }

    pub fn world(&self) -> &Comm {
        &self.world
    }

    pub fn workers(&self) -> Vec<WorkerId> {
        self.executor.workers()
    }

    /// Pick workers in pool order.
    ///
    /// # Errors
    ///
    /// `QuasarError::PoolAssembly` when fewer workers remain than requested.
    pub fn select_workers(&self, selection: &WorkerSelection) -> Result<Vec<WorkerId>> {
        let available: Vec<WorkerId> = self
            .executor
            .workers()
            .into_iter()
            .filter(|w| selection.workers.is_empty() || selection.workers.contains(w))
            .filter(|w| !selection.exclude.contains(w))
            .collect();

        let wanted = selection.num_workers.unwrap_or(available.len());
        if wanted > available.len() {
            return Err(QuasarError::PoolAssembly {
                expected: wanted,
                connected: available.len(),
            });
        }
        let selected: Vec<WorkerId> = available.into_iter().take(wanted).collect();
        debug!(selected = ?selected, "Selected workers");
        Ok(selected)
    }

    pub async fn create_comm(&self, selection: &WorkerSelection) -> Result<Comm> {
        let workers = self.select_workers(selection)?;
        Comm::create(self.executor.clone(), &workers).await
    }

    /// A grid over the first `product(dims)` workers.
    ///
    /// Without `periods`, every axis takes the configured default periodicity.
    pub async fn create_cart(
        &self,
        dims: &[usize],
        periods: Option<&[bool]>,
    ) -> Result<Arc<GridTopology>> {
        let periods = match periods {
            Some(periods) => periods.to_vec(),
            None => vec![self.config.periodic; dims.len()],
        };
        if dims.is_empty() || dims.contains(&0) {
            return Err(QuasarError::Topology(format!("invalid grid dims {:?}", dims)));
        }
        let comm = self
            .create_comm(&WorkerSelection::count(grid_size(dims)))
            .await?;
        comm.create_cart(dims, &periods).await
    }

    /// Place one value per world worker
    pub async fn scatter(&self, values: Vec<Value>) -> Result<HandleSet> {
        let handles = self
            .executor
            .scatter(values, self.world.workers(), false)
            .await?;
        Ok(HandleSet::new(self.executor.clone(), handles))
    }

    /// Stop the in-process pool, if any
    pub async fn shutdown(&self) {
        if let Some(cluster) = &self.cluster {
            cluster.shutdown().await;
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("world", &self.world)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_select_workers_filters_in_pool_order() {
        let session = Session::local(SessionConfig::with_workers(4)).await.unwrap();
        let selection = WorkerSelection::count(2).excluding([WorkerId::new("local-0")]);
        assert_eq!(
            session.select_workers(&selection).unwrap(),
            vec![WorkerId::new("local-1"), WorkerId::new("local-2")]
        );

        let among = WorkerSelection::default()
            .among([WorkerId::new("local-3"), WorkerId::new("elsewhere")]);
        assert_eq!(
            session.select_workers(&among).unwrap(),
            vec![WorkerId::new("local-3")]
        );
    }

    #[tokio::test]
    async fn test_too_many_workers_is_pool_assembly_error() {
        let session = Session::local(SessionConfig::with_workers(2)).await.unwrap();
        let err = session
            .select_workers(&WorkerSelection::count(3))
            .unwrap_err();
        assert_eq!(
            err,
            QuasarError::PoolAssembly {
                expected: 3,
                connected: 2
            }
        );
    }

    #[tokio::test]
    async fn test_create_cart_uses_default_periodicity() {
        let config = SessionConfig {
            periodic: true,
            ..SessionConfig::with_workers(4)
        };
        let session = Session::local(config).await.unwrap();
        let grid = session.create_cart(&[3], None).await.unwrap();
        assert_eq!(grid.periods(), &[true]);
        assert_eq!(grid.len(), 3);
        session.shutdown().await;
    }
}
