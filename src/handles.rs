/*!
 * Handle sets: ordered, fixed-length groups of remote references
 *
 * Every slot of a handle set is bound to exactly one worker. The owner is asked
 * from the executor the first time it is needed and cached afterwards; slots
 * whose task was pinned at submission know their owner from the start.
 *
 * A handle set moves through `Created -> Dispatching -> {Ready, Failed}`.
 * `Failed` is terminal: once a drain observed a failure, every later
 * resolution re-raises it without touching the executor again.
 */

use futures::future::join_all;
use quasar_core_interface::{
    ExecutorError, HandleId, SlotStatus, Task, TaskExecutor, Value, WorkerId,
};
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::debug;

use crate::error::{QuasarError, Result};

/// One remote reference of a handle set
#[derive(Debug)]
pub struct Slot {
    handle: HandleId,
    owner: OnceLock<WorkerId>,
}

impl Slot {
    fn new(handle: HandleId, owner: Option<WorkerId>) -> Self {
        let cell = OnceLock::new();
        if let Some(worker) = owner {
            let _ = cell.set(worker);
        }
        Self {
            handle,
            owner: cell,
        }
    }

    pub fn handle(&self) -> HandleId {
        self.handle
    }

    /// Owner, if it has been resolved already
    pub fn cached_owner(&self) -> Option<&WorkerId> {
        self.owner.get()
    }
}

/// Lifecycle of a handle set
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchState {
    /// Wraps handles that were not produced by a dispatch (scattered values)
    Created,
    /// Tasks submitted, not drained yet
    Dispatching,
    /// Every slot resolved successfully
    Ready,
    /// A slot failed; terminal
    Failed(ExecutorError),
}

pub struct HandleSet {
    executor: Arc<dyn TaskExecutor>,
    slots: Vec<Slot>,
    state: Mutex<DispatchState>,
}

impl HandleSet {
    /// Wrap existing handles
    pub fn new(executor: Arc<dyn TaskExecutor>, handles: Vec<HandleId>) -> Self {
        Self {
            executor,
            slots: handles.into_iter().map(|h| Slot::new(h, None)).collect(),
            state: Mutex::new(DispatchState::Created),
        }
    }

    /// Handles just submitted, pinned to `owners`
    pub fn dispatched(
        executor: Arc<dyn TaskExecutor>,
        handles: Vec<HandleId>,
        owners: Vec<WorkerId>,
    ) -> Self {
        let slots = handles
            .into_iter()
            .zip(owners.into_iter().map(Some).chain(std::iter::repeat(None)))
            .map(|(handle, owner)| Slot::new(handle, owner))
            .collect();
        Self {
            executor,
            slots,
            state: Mutex::new(DispatchState::Dispatching),
        }
    }

    pub fn executor(&self) -> &Arc<dyn TaskExecutor> {
        &self.executor
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn handles(&self) -> Vec<HandleId> {
        self.slots.iter().map(Slot::handle).collect()
    }

    pub fn handle(&self, index: usize) -> Result<HandleId> {
        self.slot(index).map(Slot::handle)
    }

    fn slot(&self, index: usize) -> Result<&Slot> {
        self.slots.get(index).ok_or(QuasarError::IndexOutOfRange {
            index,
            len: self.slots.len(),
        })
    }

    pub fn state(&self) -> DispatchState {
        self.state
            .lock()
            .map(|state| state.clone())
            .unwrap_or(DispatchState::Dispatching)
    }

    fn set_state(&self, next: DispatchState) {
        if let Ok(mut state) = self.state.lock() {
            if !matches!(*state, DispatchState::Failed(_)) {
                *state = next;
            }
        }
    }

    fn failure(&self) -> Option<ExecutorError> {
        match self.state() {
            DispatchState::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Worker holding slot `index`
    pub async fn owner(&self, index: usize) -> Result<WorkerId> {
        let slot = self.slot(index)?;
        if let Some(owner) = slot.cached_owner() {
            return Ok(owner.clone());
        }
        let owner = self
            .executor
            .owner_of(slot.handle)
            .await
            .map_err(|e| match e {
                ExecutorError::AmbiguousOwner { handle, holders } => QuasarError::Topology(
                    format!("slot {} ({}) is held by {} workers", index, handle, holders),
                ),
                other => other.into(),
            })?;
        Ok(slot.owner.get_or_init(|| owner).clone())
    }

    /// Owning worker of every slot.
    ///
    /// # Errors
    ///
    /// `QuasarError::Topology` when two slots report the same worker.
    pub async fn workers(&self) -> Result<Vec<WorkerId>> {
        let mut workers = Vec::with_capacity(self.slots.len());
        for index in 0..self.slots.len() {
            let owner = self.owner(index).await?;
            if let Some(other) = workers.iter().position(|w| *w == owner) {
                return Err(QuasarError::Topology(format!(
                    "slots {} and {} are both held by {}",
                    other, index, owner
                )));
            }
            workers.push(owner);
        }
        Ok(workers)
    }

    /// Slot index held by `worker`
    pub async fn index_of_worker(&self, worker: &WorkerId) -> Result<usize> {
        self.workers()
            .await?
            .iter()
            .position(|w| w == worker)
            .ok_or_else(|| QuasarError::KeyNotFound(format!("worker {}", worker)))
    }

    pub async fn status(&self) -> Result<Vec<SlotStatus>> {
        let mut statuses = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            statuses.push(self.executor.status(slot.handle).await?);
        }
        Ok(statuses)
    }

    /// Drain every slot and return the values in slot order.
    ///
    /// All slots are awaited before an error is surfaced; the error reported
    /// is the one of the lowest failing slot.
    pub async fn results(&self) -> Result<Vec<Value>> {
        if let Some(err) = self.failure() {
            return Err(err.into());
        }

        let outcomes = join_all(
            self.slots
                .iter()
                .map(|slot| self.executor.resolve(slot.handle)),
        )
        .await;

        let mut values = Vec::with_capacity(outcomes.len());
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(value) => values.push(value),
                Err(err) => {
                    debug!(slot = index, "Dispatch round failed: {}", err);
                    self.set_state(DispatchState::Failed(err.clone()));
                    return Err(err.into());
                }
            }
        }
        self.set_state(DispatchState::Ready);
        Ok(values)
    }

    /// Block until every slot is terminal
    pub async fn wait(&self) -> Result<()> {
        self.results().await.map(|_| ())
    }

    /// Resolve a single slot
    pub async fn get(&self, index: usize) -> Result<Value> {
        if let Some(err) = self.failure() {
            return Err(err.into());
        }
        let slot = self.slot(index)?;
        Ok(self.executor.resolve(slot.handle).await?)
    }

    /// Run `task` on every slot's value, on the worker holding it
    pub async fn map(&self, task: Task) -> Result<HandleSet> {
        let owners = self.workers().await?;
        let mut handles = Vec::with_capacity(self.slots.len());
        for (slot, owner) in self.slots.iter().zip(&owners) {
            handles.push(
                self.executor
                    .submit(task.clone(), &[slot.handle], Some(owner))
                    .await?,
            );
        }
        debug!(task = task.name(), slots = handles.len(), "Mapped task over handle set");
        Ok(HandleSet::dispatched(self.executor.clone(), handles, owners))
    }
}

impl PartialEq for HandleSet {
    fn eq(&self, other: &Self) -> bool {
        self.handles() == other.handles()
    }
}

impl fmt::Debug for HandleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleSet")
            .field("handles", &self.handles())
            .field("state", &self.state())
            .finish()
    }
}
