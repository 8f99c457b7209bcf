//! Structured events emitted by the scheduler on every state transition it
//! makes.
//!
//! Each tick returns the events it produced in a [`TickReport`]. The loop
//! logs them and feeds the metric counters; tests assert on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Priority, TaskId, WorkerId};

/// A structured event emitted by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl Event {
    pub fn new(timestamp: DateTime<Utc>, kind: EventKind) -> Self {
        Self { timestamp, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A new worker was created to take a task.
    WorkerSpawned {
        worker_id: WorkerId,
        task_id: TaskId,
        priority: Priority,
    },
    /// A task was assigned to an existing ready worker.
    TaskAssigned {
        worker_id: WorkerId,
        task_id: TaskId,
        priority: Priority,
    },
    /// A running task was evicted in favor of a more urgent one.
    TaskPreempted {
        worker_id: WorkerId,
        evicted_task_id: TaskId,
        evicted_priority: Priority,
        task_id: TaskId,
        priority: Priority,
    },
    /// The candidate could not be placed this tick.
    DispatchDeferred {
        task_id: TaskId,
        priority: Priority,
        reason: String,
    },
    TaskCompleted {
        worker_id: WorkerId,
        task_id: TaskId,
    },
    /// A busy worker missed its liveness deadline.
    WorkerTimedOut {
        worker_id: WorkerId,
        task_id: Option<TaskId>,
    },
    /// A busy worker pointed at a task it no longer holds.
    WorkerReleased {
        worker_id: WorkerId,
        stale_task_id: Option<TaskId>,
    },
    TaskRequeued {
        task_id: TaskId,
        retry_count: u32,
    },
}

/// What one scheduler tick did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// True when the tick was skipped because another was still running.
    pub skipped: bool,
    pub events: Vec<Event>,
    /// Entities whose processing failed; siblings were still processed.
    pub errors: usize,
}

impl TickReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn count(&self, pred: impl Fn(&EventKind) -> bool) -> usize {
        self.events.iter().filter(|e| pred(&e.kind)).count()
    }
}
