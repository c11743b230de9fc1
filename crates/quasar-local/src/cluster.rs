//! LocalCluster: tokio tasks standing in for remote workers
//!
//! Every worker owns a FIFO queue of jobs. A job waits for its input handles,
//! runs its task and publishes the outcome on a `watch` channel, so any number
//! of callers can block on the same handle.

use async_trait::async_trait;
use futures::future::join_all;
use quasar_core_interface::{
    ExecutorError, HandleId, Result, SlotStatus, Task, TaskExecutor, Value, WorkerId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClusterConfig;
use crate::error::LocalError;
use crate::lifecycle::{WorkerLifecycle, WorkerState};

#[derive(Debug, Clone)]
enum SlotState {
    Pending,
    Ready(Value),
    Failed(ExecutorError),
}

impl SlotState {
    fn status(&self) -> SlotStatus {
        match self {
            SlotState::Pending => SlotStatus::Pending,
            SlotState::Ready(_) => SlotStatus::Ready,
            SlotState::Failed(_) => SlotStatus::Failed,
        }
    }
}

struct HandleRecord {
    holders: Vec<WorkerId>,
    state: watch::Receiver<SlotState>,
}

struct Job {
    handle: HandleId,
    task: Task,
    inputs: Vec<watch::Receiver<SlotState>>,
    output: watch::Sender<SlotState>,
}

struct WorkerSlot {
    id: WorkerId,
    queue: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    lifecycle: Arc<Mutex<WorkerLifecycle>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerSlot {
    fn sender(&self) -> Result<mpsc::UnboundedSender<Job>> {
        let draining = self
            .lifecycle
            .lock()
            .map(|lc| matches!(lc.state(), WorkerState::Draining | WorkerState::Stopped))
            .unwrap_or(true);
        if draining {
            return Err(ExecutorError::Shutdown);
        }
        self.queue
            .lock()
            .ok()
            .and_then(|queue| queue.clone())
            .ok_or(ExecutorError::Shutdown)
    }
}

/// In-process worker pool
///
/// # Example
///
/// ```rust,no_run
/// use quasar_core_interface::{Task, TaskExecutor, Value};
/// use quasar_local::{ClusterConfig, LocalCluster};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let cluster = LocalCluster::start(ClusterConfig::with_workers(2)).await?;
/// let worker = cluster.workers()[1].clone();
///
/// let handle = cluster
///     .submit(Task::new("answer", |_| Ok(Value::Int(42))), &[], Some(&worker))
///     .await?;
/// assert_eq!(cluster.owner_of(handle).await?, worker);
/// assert_eq!(cluster.resolve(handle).await?, Value::Int(42));
/// # Ok(())
/// # }
/// ```
pub struct LocalCluster {
    config: ClusterConfig,
    workers: Vec<WorkerSlot>,
    handles: RwLock<HashMap<HandleId, HandleRecord>>,
    next_id: AtomicU64,
    submitted: AtomicU64,
    cursor: AtomicUsize,
}

impl LocalCluster {
    /// Spawn the workers and wait until the expected number has registered.
    ///
    /// # Errors
    ///
    /// Returns `LocalError::AssemblyTimeout` when fewer workers than expected
    /// register within `assembly_timeout_ms`.
    pub async fn start(config: ClusterConfig) -> std::result::Result<Self, LocalError> {
        config.validate()?;

        let (register_tx, mut register_rx) = mpsc::unbounded_channel::<WorkerId>();
        let mut workers = Vec::with_capacity(config.num_workers);
        for index in 0..config.num_workers {
            let id = WorkerId::new(config.worker_name(index));
            let (queue_tx, queue_rx) = mpsc::unbounded_channel();
            let lifecycle = Arc::new(Mutex::new(WorkerLifecycle::new()));
            let join = tokio::spawn(worker_loop(
                id.clone(),
                queue_rx,
                lifecycle.clone(),
                register_tx.clone(),
            ));
            workers.push(WorkerSlot {
                id,
                queue: Mutex::new(Some(queue_tx)),
                lifecycle,
                join: Mutex::new(Some(join)),
            });
        }
        drop(register_tx);

        let expected = config.expected();
        let mut connected = 0usize;
        let waited = tokio::time::timeout(Duration::from_millis(config.assembly_timeout_ms), async {
            while connected < expected {
                match register_rx.recv().await {
                    Some(worker) => {
                        debug!(worker = %worker, "Worker registered");
                        connected += 1;
                    }
                    None => break,
                }
            }
        })
        .await;

        let cluster = Self {
            config,
            workers,
            handles: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
            cursor: AtomicUsize::new(0),
        };

        if waited.is_err() || connected < expected {
            warn!(
                "Couldn't assemble the pool: {} of {} workers registered",
                connected, expected
            );
            cluster.shutdown().await;
            return Err(LocalError::AssemblyTimeout {
                expected,
                connected,
                timeout_ms: cluster.config.assembly_timeout_ms,
            });
        }

        info!("Local pool ready with {} workers", cluster.workers.len());
        Ok(cluster)
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Number of tasks accepted by `submit` so far
    pub fn submitted_tasks(&self) -> u64 {
        self.submitted.load(Ordering::SeqCst)
    }

    pub fn worker_states(&self) -> Vec<(WorkerId, WorkerState)> {
        self.workers
            .iter()
            .map(|slot| {
                let state = slot
                    .lifecycle
                    .lock()
                    .map(|lc| lc.state())
                    .unwrap_or(WorkerState::Stopped);
                (slot.id.clone(), state)
            })
            .collect()
    }

    /// Tasks finished per worker
    pub fn completed_tasks(&self) -> Vec<(WorkerId, u64)> {
        self.workers
            .iter()
            .map(|slot| {
                let done = slot
                    .lifecycle
                    .lock()
                    .map(|lc| lc.completed_tasks())
                    .unwrap_or_default();
                (slot.id.clone(), done)
            })
            .collect()
    }

    /// Stop accepting work, let queued tasks finish and wait for every worker to exit
    pub async fn shutdown(&self) {
        info!("Shutting down local pool");
        let mut joins = Vec::new();
        for slot in &self.workers {
            if let Ok(mut lc) = slot.lifecycle.lock() {
                lc.on_draining();
            }
            if let Ok(mut queue) = slot.queue.lock() {
                queue.take();
            }
            if let Ok(mut join) = slot.join.lock() {
                if let Some(handle) = join.take() {
                    joins.push(handle);
                }
            }
        }
        for result in join_all(joins).await {
            if let Err(e) = result {
                warn!("Worker task ended abnormally: {}", e);
            }
        }
    }

    fn worker(&self, id: &WorkerId) -> Result<&WorkerSlot> {
        self.workers
            .iter()
            .find(|slot| &slot.id == id)
            .ok_or_else(|| ExecutorError::UnknownWorker(id.clone()))
    }

    fn next_worker(&self) -> WorkerId {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst) % self.workers.len();
        self.workers[index].id.clone()
    }

    async fn state_of(&self, handle: HandleId) -> Result<watch::Receiver<SlotState>> {
        let handles = self.handles.read().await;
        handles
            .get(&handle)
            .map(|record| record.state.clone())
            .ok_or(ExecutorError::UnknownHandle(handle))
    }
}

#[async_trait]
impl TaskExecutor for LocalCluster {
    fn workers(&self) -> Vec<WorkerId> {
        self.workers.iter().map(|slot| slot.id.clone()).collect()
    }

    async fn submit(
        &self,
        task: Task,
        inputs: &[HandleId],
        pin: Option<&WorkerId>,
    ) -> Result<HandleId> {
        let (input_states, input_owner) = {
            let handles = self.handles.read().await;
            let mut states = Vec::with_capacity(inputs.len());
            let mut owner = None;
            for id in inputs {
                let record = handles.get(id).ok_or(ExecutorError::UnknownHandle(*id))?;
                if owner.is_none() {
                    owner = record.holders.first().cloned();
                }
                states.push(record.state.clone());
            }
            (states, owner)
        };

        let target = match pin {
            Some(worker) => worker.clone(),
            None => input_owner.unwrap_or_else(|| self.next_worker()),
        };
        let queue = self.worker(&target)?.sender()?;

        let handle = HandleId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (output, state) = watch::channel(SlotState::Pending);
        self.handles.write().await.insert(
            handle,
            HandleRecord {
                holders: vec![target.clone()],
                state,
            },
        );

        let task_name = task.name().to_string();
        let job = Job {
            handle,
            task,
            inputs: input_states,
            output,
        };
        if queue.send(job).is_err() {
            self.handles.write().await.remove(&handle);
            return Err(ExecutorError::Shutdown);
        }

        self.submitted.fetch_add(1, Ordering::SeqCst);
        debug!(task = %task_name, handle = %handle, worker = %target, "Submitted task");
        Ok(handle)
    }

    async fn owner_of(&self, handle: HandleId) -> Result<WorkerId> {
        let handles = self.handles.read().await;
        let record = handles
            .get(&handle)
            .ok_or(ExecutorError::UnknownHandle(handle))?;
        match record.holders.as_slice() {
            [owner] => Ok(owner.clone()),
            holders => Err(ExecutorError::AmbiguousOwner {
                handle,
                holders: holders.len(),
            }),
        }
    }

    async fn resolve(&self, handle: HandleId) -> Result<Value> {
        let mut state = self.state_of(handle).await?;
        let outcome = match state.wait_for(|s| !matches!(s, SlotState::Pending)).await {
            Ok(current) => current.clone(),
            Err(_) => return Err(ExecutorError::Shutdown),
        };
        match outcome {
            SlotState::Ready(value) => Ok(value),
            SlotState::Failed(err) => Err(err),
            SlotState::Pending => Err(ExecutorError::System(format!(
                "handle {} still pending after completion",
                handle
            ))),
        }
    }

    async fn status(&self, handle: HandleId) -> Result<SlotStatus> {
        let state = self.state_of(handle).await?;
        let status = state.borrow().status();
        Ok(status)
    }

    async fn scatter(
        &self,
        values: Vec<Value>,
        workers: &[WorkerId],
        broadcast: bool,
    ) -> Result<Vec<HandleId>> {
        let targets = if workers.is_empty() {
            self.workers()
        } else {
            workers.to_vec()
        };
        if targets.is_empty() {
            return Err(ExecutorError::System("no workers to scatter to".to_string()));
        }
        for worker in &targets {
            self.worker(worker)?.sender()?;
        }

        let mut handles = self.handles.write().await;
        let mut ids = Vec::with_capacity(values.len());
        for (index, value) in values.into_iter().enumerate() {
            let holders = if broadcast {
                targets.clone()
            } else {
                vec![targets[index % targets.len()].clone()]
            };
            let handle = HandleId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
            let (_, state) = watch::channel(SlotState::Ready(value));
            handles.insert(handle, HandleRecord { holders, state });
            ids.push(handle);
        }
        debug!(count = ids.len(), broadcast, "Scattered values");
        Ok(ids)
    }
}

async fn worker_loop(
    id: WorkerId,
    mut queue: mpsc::UnboundedReceiver<Job>,
    lifecycle: Arc<Mutex<WorkerLifecycle>>,
    register: mpsc::UnboundedSender<WorkerId>,
) {
    if let Ok(mut lc) = lifecycle.lock() {
        lc.on_serving();
    }
    if register.send(id.clone()).is_err() {
        debug!(worker = %id, "Pool stopped waiting for registrations");
    }
    drop(register);

    while let Some(job) = queue.recv().await {
        if let Ok(mut lc) = lifecycle.lock() {
            lc.task_started();
        }
        let Job {
            handle,
            task,
            inputs,
            output,
        } = job;
        let outcome = run_job(&id, &task, inputs).await;
        if let SlotState::Failed(err) = &outcome {
            debug!(worker = %id, handle = %handle, "Task failed: {}", err);
        }
        if let Ok(mut lc) = lifecycle.lock() {
            lc.task_completed();
        }
        output.send_replace(outcome);
    }

    if let Ok(mut lc) = lifecycle.lock() {
        lc.on_stopped();
    }
    debug!(worker = %id, "Worker stopped");
}

async fn run_job(worker: &WorkerId, task: &Task, inputs: Vec<watch::Receiver<SlotState>>) -> SlotState {
    let mut values = Vec::with_capacity(inputs.len());
    for mut input in inputs {
        let state = match input.wait_for(|s| !matches!(s, SlotState::Pending)).await {
            Ok(current) => current.clone(),
            Err(_) => SlotState::Failed(ExecutorError::Shutdown),
        };
        match state {
            SlotState::Ready(value) => values.push(value),
            failed @ SlotState::Failed(_) => return failed,
            SlotState::Pending => {
                return SlotState::Failed(ExecutorError::System(
                    "input still pending after completion".to_string(),
                ))
            }
        }
    }

    match task.run(values) {
        Ok(value) => SlotState::Ready(value),
        Err(source) => SlotState::Failed(ExecutorError::TaskFailed {
            task: task.name().to_string(),
            worker: worker.clone(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quasar_core_interface::RemoteError;

    async fn cluster(n: usize) -> LocalCluster {
        LocalCluster::start(ClusterConfig::with_workers(n)).await.unwrap()
    }

    #[tokio::test]
    async fn test_pinned_submit_runs_on_worker() {
        let cluster = cluster(3).await;
        let worker = WorkerId::new("local-2");
        let handle = cluster
            .submit(Task::new("seven", |_| Ok(Value::Int(7))), &[], Some(&worker))
            .await
            .unwrap();
        assert_eq!(cluster.owner_of(handle).await.unwrap(), worker);
        assert_eq!(cluster.resolve(handle).await.unwrap(), Value::Int(7));
        assert_eq!(cluster.status(handle).await.unwrap(), SlotStatus::Ready);
        assert_eq!(cluster.submitted_tasks(), 1);
    }

    #[tokio::test]
    async fn test_unpinned_submit_follows_first_input() {
        let cluster = cluster(2).await;
        let workers = cluster.workers();
        let inputs = cluster
            .scatter(vec![Value::Int(1), Value::Int(2)], &workers, false)
            .await
            .unwrap();
        let sum = Task::new("add", |values| {
            let total: i64 = values.iter().filter_map(Value::as_int).sum();
            Ok(Value::Int(total))
        });
        let handle = cluster.submit(sum, &[inputs[1], inputs[0]], None).await.unwrap();
        assert_eq!(cluster.owner_of(handle).await.unwrap(), workers[1]);
        assert_eq!(cluster.resolve(handle).await.unwrap(), Value::Int(3));
    }

    #[tokio::test]
    async fn test_failure_is_captured_and_propagated() {
        let cluster = cluster(1).await;
        let failing = Task::new("explode", |_| Err(RemoteError::Failed("boom".to_string())));
        let first = cluster.submit(failing, &[], None).await.unwrap();
        let second = cluster.submit(Task::identity(), &[first], None).await.unwrap();

        match cluster.resolve(second).await {
            Err(ExecutorError::TaskFailed { task, worker, .. }) => {
                assert_eq!(task, "explode");
                assert_eq!(worker.as_str(), "local-0");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(cluster.status(first).await.unwrap(), SlotStatus::Failed);
    }

    #[tokio::test]
    async fn test_broadcast_is_ambiguous() {
        let cluster = cluster(2).await;
        let handles = cluster.scatter(vec![Value::Int(5)], &[], true).await.unwrap();
        assert!(matches!(
            cluster.owner_of(handles[0]).await,
            Err(ExecutorError::AmbiguousOwner { holders: 2, .. })
        ));
        assert_eq!(cluster.resolve(handles[0]).await.unwrap(), Value::Int(5));
    }

    #[tokio::test]
    async fn test_unknown_worker_and_handle() {
        let cluster = cluster(1).await;
        let ghost = WorkerId::new("ghost");
        assert!(matches!(
            cluster.submit(Task::identity(), &[], Some(&ghost)).await,
            Err(ExecutorError::UnknownWorker(_))
        ));
        assert!(matches!(
            cluster.resolve(HandleId::new(99)).await,
            Err(ExecutorError::UnknownHandle(_))
        ));
        assert_eq!(cluster.submitted_tasks(), 0);
    }

    #[tokio::test]
    async fn test_assembly_timeout() {
        let config = ClusterConfig {
            num_workers: 2,
            expected_workers: Some(3),
            assembly_timeout_ms: 50,
            ..ClusterConfig::default()
        };
        match LocalCluster::start(config).await {
            Err(LocalError::AssemblyTimeout {
                expected,
                connected,
                ..
            }) => {
                assert_eq!(expected, 3);
                assert_eq!(connected, 2);
            }
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("pool should not assemble"),
        }
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let cluster = cluster(2).await;
        let handle = cluster
            .submit(Task::new("one", |_| Ok(Value::Int(1))), &[], None)
            .await
            .unwrap();
        cluster.shutdown().await;

        assert_eq!(cluster.resolve(handle).await.unwrap(), Value::Int(1));
        assert!(matches!(
            cluster.submit(Task::identity(), &[handle], None).await,
            Err(ExecutorError::Shutdown)
        ));
        assert!(cluster
            .worker_states()
            .iter()
            .all(|(_, state)| *state == WorkerState::Stopped));
    }
}
