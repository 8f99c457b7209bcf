//! Boundary operations of the farm: task submission and status changes,
//! worker registration and heartbeats, and the pull path.
//!
//! These run outside the scheduler tick and race with it; every write that
//! touches a task and a worker together goes through one [`Batch`].

use std::cmp::Reverse;
use std::sync::Arc;

use chrono::Utc;
use opentelemetry::KeyValue;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{RankOrder, SchedulerConfig};
use crate::error::{Error, Result};
use crate::model::{NewTask, Task, TaskId, TaskStatus, Worker, WorkerId, WorkerStatus};
use crate::store::{Batch, Store, require_task, require_worker};
use crate::telemetry::metrics;

/// Requested status change for a task.
#[derive(Debug, Clone)]
pub struct TaskStatusUpdate {
    pub status: TaskStatus,
    /// Required when moving to `rendering`.
    pub worker_id: Option<WorkerId>,
    /// Kept from the task when omitted.
    pub error_message: Option<String>,
}

impl TaskStatusUpdate {
    pub fn to(status: TaskStatus) -> Self {
        Self {
            status,
            worker_id: None,
            error_message: None,
        }
    }

    pub fn worker(mut self, id: WorkerId) -> Self {
        self.worker_id = Some(id);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// Result of [`Farm::complete_task`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionReport {
    pub status: TaskStatus,
    pub output_path: String,
    /// Simulated output size in megabytes.
    pub output_size: f64,
    /// Seconds from submission to completion.
    pub final_render_time: i64,
}

pub struct Farm<S: ?Sized> {
    store: Arc<S>,
    config: SchedulerConfig,
}

impl<S: ?Sized> Clone for Farm<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S: Store + ?Sized> Farm<S> {
    pub fn new(store: Arc<S>, config: SchedulerConfig) -> Self {
        Self { store, config }
    }

    // -- tasks ---------------------------------------------------------------

    /// Submit a task. It starts `pending` with its rank derived from priority.
    pub async fn create_task(&self, new: NewTask) -> Result<Task> {
        let task = new.build(Utc::now())?;
        self.store.insert_task(&task).await?;
        metrics::tasks_submitted().add(1, &[KeyValue::new("priority", task.priority.to_string())]);
        info!(
            task_id = %task.id,
            priority = %task.priority,
            estimated_render_seconds = task.estimated_render_seconds,
            "task submitted"
        );
        Ok(task)
    }

    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        self.store.list_tasks().await
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Task> {
        require_task(&*self.store, id).await
    }

    /// Move a task to a new status.
    ///
    /// Entering `rendering` needs a ready worker, which becomes busy in the
    /// same write. Leaving `rendering` releases the worker that held it.
    /// Setting the current status again only updates the error message.
    pub async fn update_task_status(&self, id: TaskId, update: TaskStatusUpdate) -> Result<Task> {
        let task = require_task(&*self.store, id).await?;
        if update.status == task.status {
            return match update.error_message {
                Some(message) => self.store.set_task_error(id, &message).await,
                None => Ok(task),
            };
        }

        let now = Utc::now();
        let mut next = task.clone();
        if let Some(message) = update.error_message {
            next.error_message = Some(message);
        }
        if !task.status.can_transition_to(update.status) {
            return Err(Error::InvalidTransition {
                from: task.status.to_string(),
                to: update.status.to_string(),
            });
        }

        let batch = match update.status {
            TaskStatus::Rendering => {
                let worker_id = update.worker_id.ok_or_else(|| {
                    Error::Validation("worker_id is required to start rendering".to_string())
                })?;
                let worker = require_worker(&*self.store, worker_id).await?;
                if worker.status != WorkerStatus::Ready {
                    return Err(Error::WorkerNotReady(worker_id.to_string()));
                }
                let mut busy = worker.clone();
                busy.occupy(task.id, now);
                next.assign_to(worker_id, now);
                Batch::new()
                    .update_worker(busy, WorkerStatus::Ready)
                    .update_task(next.clone(), task.status)
            }
            status => {
                next.status = status;
                if status == TaskStatus::Completed {
                    next.completed_at = Some(now);
                }
                if let Some(worker_id) = update.worker_id.or(task.assigned_worker_id) {
                    next.last_worker_id = Some(worker_id);
                }
                next.assigned_worker_id = None;
                let batch = self.release_holder(&task, Batch::new()).await?;
                batch.update_task(next.clone(), task.status)
            }
        };

        self.store.commit(batch).await?;
        info!(task_id = %id, from = %task.status, to = %next.status, "task status updated");
        Ok(next)
    }

    /// Mark a task completed and describe its output.
    ///
    /// Completing an already completed task reports again without writing.
    pub async fn complete_task(&self, id: TaskId) -> Result<CompletionReport> {
        let task = require_task(&*self.store, id).await?;
        let now = Utc::now();

        let done = if task.status == TaskStatus::Completed {
            task
        } else {
            if !task.status.can_transition_to(TaskStatus::Completed) {
                return Err(Error::InvalidTransition {
                    from: task.status.to_string(),
                    to: TaskStatus::Completed.to_string(),
                });
            }
            let mut done = task.clone();
            done.complete(now);
            let batch = self.release_holder(&task, Batch::new()).await?;
            self.store
                .commit(batch.update_task(done.clone(), task.status))
                .await?;
            metrics::tasks_completed().add(1, &[]);
            info!(task_id = %id, "task completed");
            done
        };

        let output_dir = done.file_path.clone().unwrap_or_else(|| done.id.to_string());
        Ok(CompletionReport {
            status: done.status,
            output_path: format!("/renders/{output_dir}/final.png"),
            output_size: rand::rng().random_range(0.0..1000.0),
            final_render_time: done.render_age(now).num_seconds(),
        })
    }

    /// Add a write that frees the worker holding `task`, if one does.
    async fn release_holder(&self, task: &Task, batch: Batch) -> Result<Batch> {
        let Some(worker_id) = task.assigned_worker_id else {
            return Ok(batch);
        };
        let Some(worker) = self.store.get_worker(worker_id).await? else {
            return Ok(batch);
        };
        if worker.status != WorkerStatus::Busy || worker.current_task_id != Some(task.id) {
            return Ok(batch);
        }
        let mut freed = worker;
        freed.release(Utc::now());
        Ok(batch.update_worker(freed, WorkerStatus::Busy))
    }

    // -- workers -------------------------------------------------------------

    pub async fn list_workers(&self) -> Result<Vec<Worker>> {
        self.store.list_workers().await
    }

    /// Register a new idle worker.
    pub async fn register_worker(&self) -> Result<Worker> {
        let worker = Worker::ready(Utc::now());
        self.store.insert_worker(&worker).await?;
        info!(worker_id = %worker.id, "worker registered");
        Ok(worker)
    }

    /// Pull path: a ready worker claims the best pending task.
    ///
    /// Pending tasks are ranked by `priority_rank` in the configured order,
    /// ties in insertion order. A claim that loses a race moves on to the
    /// next task.
    pub async fn request_task(&self, worker_id: WorkerId) -> Result<Task> {
        let worker = self
            .store
            .get_worker(worker_id)
            .await?
            .filter(|w| w.status == WorkerStatus::Ready)
            .ok_or_else(|| Error::WorkerNotReady(worker_id.to_string()))?;

        let mut pending = self.store.tasks_by_status(TaskStatus::Pending).await?;
        match self.config.pull_order {
            RankOrder::Ascending => pending.sort_by_key(|t| t.priority_rank),
            RankOrder::Descending => pending.sort_by_key(|t| Reverse(t.priority_rank)),
        }

        for candidate in pending {
            let now = Utc::now();
            let mut task = candidate;
            task.assign_to(worker_id, now);
            let mut busy = worker.clone();
            busy.occupy(task.id, now);

            let claim = Batch::new()
                .update_worker(busy, WorkerStatus::Ready)
                .update_task(task.clone(), TaskStatus::Pending);
            match self.store.commit(claim).await {
                Ok(()) => {
                    metrics::tasks_assigned().add(
                        1,
                        &[
                            KeyValue::new("path", "pull"),
                            KeyValue::new("priority", task.priority.to_string()),
                        ],
                    );
                    info!(
                        %worker_id,
                        task_id = %task.id,
                        priority = %task.priority,
                        "task claimed"
                    );
                    return Ok(task);
                }
                Err(e) if e.is_conflict() => {
                    let current = require_worker(&*self.store, worker_id).await?;
                    if current.status != WorkerStatus::Ready {
                        return Err(Error::WorkerNotReady(worker_id.to_string()));
                    }
                    debug!(%worker_id, task_id = %task.id, "task claimed elsewhere, trying next");
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::NoPendingTasks)
    }

    /// Record a worker heartbeat, optionally with a new status.
    ///
    /// Reporting the current status only refreshes the heartbeat. Workers
    /// never declare themselves busy; that only happens through an
    /// assignment. A worker still holding a rendering task cannot leave busy.
    pub async fn update_worker_status(&self, id: WorkerId, status: WorkerStatus) -> Result<Worker> {
        let worker = require_worker(&*self.store, id).await?;
        let now = Utc::now();
        if status == worker.status {
            let touched = self.store.touch_worker(id, now).await?;
            debug!(worker_id = %id, status = %touched.status, "worker heartbeat");
            return Ok(touched);
        }

        let rejected = || Error::InvalidTransition {
            from: worker.status.to_string(),
            to: status.to_string(),
        };
        if status == WorkerStatus::Busy {
            return Err(rejected());
        }
        if let Some(task_id) = worker.current_task_id {
            let holds_render = self
                .store
                .get_task(task_id)
                .await?
                .is_some_and(|t| t.is_rendering_on(id));
            if holds_render {
                return Err(rejected());
            }
        }

        let mut next = worker.clone();
        next.last_heartbeat = now;
        next.status = status;
        next.current_task_id = None;
        self.store.update_worker(&next, worker.status).await?;
        info!(worker_id = %id, from = %worker.status, to = %status, "worker status changed");
        Ok(next)
    }
}
