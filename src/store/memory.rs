//! In-process store.
//!
//! Vectors behind a single `RwLock`, so iteration order is insertion order
//! and a batch is atomic with respect to every other reader and writer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{Batch, Store, TaskStore, WorkerStore, Write, task_conflict, worker_conflict};
use crate::error::{Error, Result};
use crate::model::{Priority, Task, TaskId, TaskStatus, Worker, WorkerId, WorkerStatus};

#[derive(Debug, Default)]
struct State {
    tasks: Vec<Task>,
    workers: Vec<Worker>,
}

impl State {
    fn task_index(&self, id: TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    fn worker_index(&self, id: WorkerId) -> Option<usize> {
        self.workers.iter().position(|w| w.id == id)
    }

    fn check(&self, write: &Write) -> Result<()> {
        match write {
            Write::InsertWorker(worker) => {
                if self.worker_index(worker.id).is_some() {
                    return Err(Error::Conflict(format!("worker {} already exists", worker.id)));
                }
            }
            Write::UpdateTask { task, expected } => {
                let idx = self
                    .task_index(task.id)
                    .ok_or_else(|| Error::NotFound(format!("task {}", task.id)))?;
                let actual = self.tasks[idx].status;
                if actual != *expected {
                    return Err(task_conflict(task.id, *expected, actual));
                }
            }
            Write::UpdateWorker { worker, expected } => {
                let idx = self
                    .worker_index(worker.id)
                    .ok_or_else(|| Error::NotFound(format!("worker {}", worker.id)))?;
                let actual = self.workers[idx].status;
                if actual != *expected {
                    return Err(worker_conflict(worker.id, *expected, actual));
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, write: Write) {
        match write {
            Write::InsertWorker(worker) => self.workers.push(worker),
            Write::UpdateTask { task, .. } => {
                if let Some(idx) = self.task_index(task.id) {
                    self.tasks[idx] = task;
                }
            }
            Write::UpdateWorker { worker, .. } => {
                if let Some(idx) = self.worker_index(worker.id) {
                    self.workers[idx] = worker;
                }
            }
        }
    }
}

/// Store kept entirely in memory. Used by tests and single-process runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert_task(&self, task: &Task) -> Result<()> {
        let mut state = self.state.write().await;
        if state.task_index(task.id).is_some() {
            return Err(Error::Conflict(format!("task {} already exists", task.id)));
        }
        state.tasks.push(task.clone());
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        let state = self.state.read().await;
        Ok(state.tasks.iter().find(|t| t.id == id).cloned())
    }

    async fn list_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.state.read().await.tasks.clone())
    }

    async fn tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        let state = self.state.read().await;
        Ok(state
            .tasks
            .iter()
            .filter(|t| t.status == status)
            .cloned()
            .collect())
    }

    async fn tasks_by_status_and_priority(
        &self,
        status: TaskStatus,
        priority: Priority,
    ) -> Result<Vec<Task>> {
        let state = self.state.read().await;
        Ok(state
            .tasks
            .iter()
            .filter(|t| t.status == status && t.priority == priority)
            .cloned()
            .collect())
    }

    async fn update_task(&self, task: &Task, expected: TaskStatus) -> Result<()> {
        self.commit(Batch::new().update_task(task.clone(), expected))
            .await
    }

    async fn set_task_error(&self, id: TaskId, message: &str) -> Result<Task> {
        let mut state = self.state.write().await;
        let idx = state
            .task_index(id)
            .ok_or_else(|| Error::NotFound(format!("task {id}")))?;
        state.tasks[idx].error_message = Some(message.to_string());
        Ok(state.tasks[idx].clone())
    }
}

#[async_trait]
impl WorkerStore for MemoryStore {
    async fn insert_worker(&self, worker: &Worker) -> Result<()> {
        self.commit(Batch::new().insert_worker(worker.clone())).await
    }

    async fn get_worker(&self, id: WorkerId) -> Result<Option<Worker>> {
        let state = self.state.read().await;
        Ok(state.workers.iter().find(|w| w.id == id).cloned())
    }

    async fn list_workers(&self) -> Result<Vec<Worker>> {
        Ok(self.state.read().await.workers.clone())
    }

    async fn workers_by_status(&self, status: WorkerStatus) -> Result<Vec<Worker>> {
        let state = self.state.read().await;
        Ok(state
            .workers
            .iter()
            .filter(|w| w.status == status)
            .cloned()
            .collect())
    }

    async fn update_worker(&self, worker: &Worker, expected: WorkerStatus) -> Result<()> {
        self.commit(Batch::new().update_worker(worker.clone(), expected))
            .await
    }

    async fn touch_worker(&self, id: WorkerId, at: DateTime<Utc>) -> Result<Worker> {
        let mut state = self.state.write().await;
        let idx = state
            .worker_index(id)
            .ok_or_else(|| Error::NotFound(format!("worker {id}")))?;
        state.workers[idx].last_heartbeat = at;
        Ok(state.workers[idx].clone())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn commit(&self, batch: Batch) -> Result<()> {
        let mut state = self.state.write().await;
        for write in batch.writes() {
            state.check(write)?;
        }
        for write in batch.into_writes() {
            state.apply(write);
        }
        Ok(())
    }
}
