//! Placement of one pending candidate: spawn a worker, reuse an idle one,
//! evict a render of another tier, or defer.

use chrono::{DateTime, Utc};
use tracing::{Span, debug, info};

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::event::EventKind;
use crate::model::{Task, TaskStatus, Worker, WorkerStatus};
use crate::store::{Batch, Store};
use crate::telemetry::tick::record_state_transition;

/// Decide what happens to `candidate` this tick and perform it.
///
/// When something is rendering, the first rendering task is the one the
/// candidate contends with. Once that task has rendered past the
/// candidate's gate, a task of the same tier gets a new worker and a task
/// of any other tier is evicted. Otherwise a worker is spawned only if the farm
/// has no ready or busy worker at all; idle workers are left to pull work
/// unless `assign_idle_workers` is set.
///
/// Every multi-entity change is committed as one batch, so a concurrent
/// pull-path claim surfaces here as [`crate::Error::Conflict`].
pub async fn place<S: Store + ?Sized>(
    store: &S,
    candidate: &Task,
    now: DateTime<Utc>,
    config: &SchedulerConfig,
) -> Result<EventKind> {
    let busy = store.workers_by_status(WorkerStatus::Busy).await?;
    let rendering = store.tasks_by_status(TaskStatus::Rendering).await?;

    if let Some(running) = rendering.first().filter(|_| !busy.is_empty()) {
        return contend(store, candidate, running, &busy, now).await;
    }

    let ready = store.workers_by_status(WorkerStatus::Ready).await?;
    if busy.is_empty() && ready.is_empty() {
        return spawn(store, candidate, now).await;
    }
    match ready.first() {
        Some(idle) if config.assign_idle_workers => assign(store, candidate, idle, now).await,
        _ => Ok(defer(candidate, "workers available, waiting for pull")),
    }
}

async fn contend<S: Store + ?Sized>(
    store: &S,
    candidate: &Task,
    running: &Task,
    busy: &[Worker],
    now: DateTime<Utc>,
) -> Result<EventKind> {
    let Some(gate) = candidate.priority.preemption_gate() else {
        return Ok(defer(candidate, "tier does not preempt"));
    };

    let age = running.render_age(now);
    if age < gate {
        debug!(
            task_id = %candidate.id,
            running_task_id = %running.id,
            age_secs = age.num_seconds(),
            gate_secs = gate.num_seconds(),
            "running task below preemption gate"
        );
        return Ok(defer(candidate, "running task below preemption gate"));
    }

    if running.priority == candidate.priority {
        return spawn(store, candidate, now).await;
    }

    let holder = busy
        .iter()
        .find(|w| w.current_task_id == Some(running.id) && running.is_rendering_on(w.id));
    match holder {
        Some(worker) => evict(store, candidate, running, worker, now).await,
        None => Ok(defer(candidate, "no busy worker holds the running task")),
    }
}

/// Create a new busy worker already holding `candidate`.
async fn spawn<S: Store + ?Sized>(
    store: &S,
    candidate: &Task,
    now: DateTime<Utc>,
) -> Result<EventKind> {
    let worker = Worker::spawn_for(candidate.id, now);
    let mut task = candidate.clone();
    task.assign_to(worker.id, now);

    store
        .commit(
            Batch::new()
                .insert_worker(worker.clone())
                .update_task(task, TaskStatus::Pending),
        )
        .await?;

    record_state_transition(&Span::current(), "task", candidate.id, "pending", "rendering");
    info!(
        worker_id = %worker.id,
        task_id = %candidate.id,
        priority = %candidate.priority,
        "spawned worker"
    );
    Ok(EventKind::WorkerSpawned {
        worker_id: worker.id,
        task_id: candidate.id,
        priority: candidate.priority,
    })
}

/// Hand `candidate` to an idle worker.
async fn assign<S: Store + ?Sized>(
    store: &S,
    candidate: &Task,
    idle: &Worker,
    now: DateTime<Utc>,
) -> Result<EventKind> {
    let mut worker = idle.clone();
    worker.occupy(candidate.id, now);
    let mut task = candidate.clone();
    task.assign_to(worker.id, now);

    store
        .commit(
            Batch::new()
                .update_worker(worker, WorkerStatus::Ready)
                .update_task(task, TaskStatus::Pending),
        )
        .await?;

    record_state_transition(&Span::current(), "task", candidate.id, "pending", "rendering");
    info!(
        worker_id = %idle.id,
        task_id = %candidate.id,
        priority = %candidate.priority,
        "assigned task to idle worker"
    );
    Ok(EventKind::TaskAssigned {
        worker_id: idle.id,
        task_id: candidate.id,
        priority: candidate.priority,
    })
}

/// Put `running` back to pending and give its worker to `candidate`.
async fn evict<S: Store + ?Sized>(
    store: &S,
    candidate: &Task,
    running: &Task,
    holder: &Worker,
    now: DateTime<Utc>,
) -> Result<EventKind> {
    let mut evicted = running.clone();
    evicted.preempt(holder.id);
    let mut worker = holder.clone();
    worker.occupy(candidate.id, now);
    let mut task = candidate.clone();
    task.assign_to(holder.id, now);

    store
        .commit(
            Batch::new()
                .update_task(evicted, TaskStatus::Rendering)
                .update_worker(worker, WorkerStatus::Busy)
                .update_task(task, TaskStatus::Pending),
        )
        .await?;

    let span = Span::current();
    record_state_transition(&span, "task", running.id, "rendering", "pending");
    record_state_transition(&span, "task", candidate.id, "pending", "rendering");
    info!(
        worker_id = %holder.id,
        evicted_task_id = %running.id,
        evicted_priority = %running.priority,
        task_id = %candidate.id,
        priority = %candidate.priority,
        "preempted running task"
    );
    Ok(EventKind::TaskPreempted {
        worker_id: holder.id,
        evicted_task_id: running.id,
        evicted_priority: running.priority,
        task_id: candidate.id,
        priority: candidate.priority,
    })
}

fn defer(candidate: &Task, reason: &str) -> EventKind {
    debug!(task_id = %candidate.id, priority = %candidate.priority, reason, "dispatch deferred");
    EventKind::DispatchDeferred {
        task_id: candidate.id,
        priority: candidate.priority,
        reason: reason.to_string(),
    }
}
