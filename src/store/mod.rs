//! Store contract consumed by the scheduler and the farm.
//!
//! The stores are the only source of truth: nothing is cached between
//! ticks. Every write is conditional on the entity's stored status so that
//! the push path (scheduler) and the pull path (workers asking for work)
//! can never both win the same task or the same worker.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::model::{Priority, Task, TaskId, TaskStatus, Worker, WorkerId, WorkerStatus};

pub use memory::MemoryStore;

/// Task persistence.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert_task(&self, task: &Task) -> Result<()>;

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>>;

    /// All tasks in store iteration order (insertion order).
    async fn list_tasks(&self) -> Result<Vec<Task>>;

    async fn tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>>;

    async fn tasks_by_status_and_priority(
        &self,
        status: TaskStatus,
        priority: Priority,
    ) -> Result<Vec<Task>>;

    /// Overwrite a task if its stored status is still `expected`.
    ///
    /// Returns [`Error::Conflict`] when the status moved, and
    /// [`Error::NotFound`] when the task does not exist.
    async fn update_task(&self, task: &Task, expected: TaskStatus) -> Result<()>;

    /// Replace only the error message, leaving status and assignment as
    /// they are stored now.
    async fn set_task_error(&self, id: TaskId, message: &str) -> Result<Task>;
}

/// Worker persistence.
#[async_trait]
pub trait WorkerStore: Send + Sync {
    async fn insert_worker(&self, worker: &Worker) -> Result<()>;

    async fn get_worker(&self, id: WorkerId) -> Result<Option<Worker>>;

    async fn list_workers(&self) -> Result<Vec<Worker>>;

    async fn workers_by_status(&self, status: WorkerStatus) -> Result<Vec<Worker>>;

    /// Overwrite a worker if its stored status is still `expected`.
    async fn update_worker(&self, worker: &Worker, expected: WorkerStatus) -> Result<()>;

    /// Refresh `last_heartbeat` only. Status and current task are untouched.
    async fn touch_worker(&self, id: WorkerId, at: DateTime<Utc>) -> Result<Worker>;
}

/// Both stores plus an atomic multi-entity write.
#[async_trait]
pub trait Store: TaskStore + WorkerStore {
    /// Apply every write in the batch, or none of them.
    ///
    /// All preconditions are checked before anything is written; the first
    /// failing one is returned as the error.
    async fn commit(&self, batch: Batch) -> Result<()>;
}

/// One entry of a [`Batch`].
#[derive(Debug, Clone)]
pub enum Write {
    InsertWorker(Worker),
    UpdateTask { task: Task, expected: TaskStatus },
    UpdateWorker { worker: Worker, expected: WorkerStatus },
}

/// An all-or-nothing group of conditional writes.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    writes: Vec<Write>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_worker(mut self, worker: Worker) -> Self {
        self.writes.push(Write::InsertWorker(worker));
        self
    }

    pub fn update_task(mut self, task: Task, expected: TaskStatus) -> Self {
        self.writes.push(Write::UpdateTask { task, expected });
        self
    }

    pub fn update_worker(mut self, worker: Worker, expected: WorkerStatus) -> Self {
        self.writes.push(Write::UpdateWorker { worker, expected });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }
}

/// Load a task or fail with [`Error::NotFound`].
pub async fn require_task<S: TaskStore + ?Sized>(store: &S, id: TaskId) -> Result<Task> {
    store
        .get_task(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("task {id}")))
}

/// Load a worker or fail with [`Error::NotFound`].
pub async fn require_worker<S: WorkerStore + ?Sized>(store: &S, id: WorkerId) -> Result<Worker> {
    store
        .get_worker(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("worker {id}")))
}

pub(crate) fn task_conflict(id: TaskId, expected: TaskStatus, actual: TaskStatus) -> Error {
    Error::Conflict(format!("task {id} is {actual}, expected {expected}"))
}

pub(crate) fn worker_conflict(id: WorkerId, expected: WorkerStatus, actual: WorkerStatus) -> Error {
    Error::Conflict(format!("worker {id} is {actual}, expected {expected}"))
}
