//! Worker lifecycle
//!
//! ```text
//!   spawn ──> Registered ──ready──> Serving ──drain──> Draining ──stop──> Stopped
//! ```
//!
//! Only a `Serving` worker accepts new tasks. `Draining` workers finish what is
//! already queued.

use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Spawned, not yet registered with the pool
    Registered,
    /// Accepting and running tasks
    Serving,
    /// Finishing queued tasks, refusing new ones
    Draining,
    /// Queue closed
    Stopped,
}

impl WorkerState {
    pub fn as_str(&self) -> &str {
        match self {
            WorkerState::Registered => "registered",
            WorkerState::Serving => "serving",
            WorkerState::Draining => "draining",
            WorkerState::Stopped => "stopped",
        }
    }
}

/// One recorded state change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: WorkerState,
    pub to: WorkerState,
}

#[derive(Debug)]
pub struct WorkerLifecycle {
    state: WorkerState,
    entered_at: Instant,
    history: Vec<Transition>,
    active_tasks: u32,
    completed_tasks: u64,
}

impl Default for WorkerLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerLifecycle {
    pub fn new() -> Self {
        Self {
            state: WorkerState::Registered,
            entered_at: Instant::now(),
            history: Vec::new(),
            active_tasks: 0,
            completed_tasks: 0,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn accepts_work(&self) -> bool {
        self.state == WorkerState::Serving
    }

    pub fn is_drained(&self) -> bool {
        self.state == WorkerState::Draining && self.active_tasks == 0
    }

    pub fn time_in_state(&self) -> std::time::Duration {
        self.entered_at.elapsed()
    }

    pub fn active_tasks(&self) -> u32 {
        self.active_tasks
    }

    pub fn completed_tasks(&self) -> u64 {
        self.completed_tasks
    }

    pub fn task_started(&mut self) {
        self.active_tasks += 1;
    }

    pub fn task_completed(&mut self) {
        self.active_tasks = self.active_tasks.saturating_sub(1);
        self.completed_tasks += 1;
    }

    pub fn on_serving(&mut self) -> Option<Transition> {
        if self.state != WorkerState::Registered {
            return None;
        }
        self.transition(WorkerState::Serving)
    }

    pub fn on_draining(&mut self) -> Option<Transition> {
        if self.state != WorkerState::Serving {
            return None;
        }
        self.transition(WorkerState::Draining)
    }

    /// Any state but `Stopped` may stop; a worker that never served stops directly.
    pub fn on_stopped(&mut self) -> Option<Transition> {
        if self.state == WorkerState::Stopped {
            return None;
        }
        self.transition(WorkerState::Stopped)
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    fn transition(&mut self, to: WorkerState) -> Option<Transition> {
        let event = Transition {
            from: self.state,
            to,
        };
        self.state = to;
        self.entered_at = Instant::now();
        self.history.push(event.clone());
        Some(event)
    }
}
