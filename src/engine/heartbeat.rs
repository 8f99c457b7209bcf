//! Worker health: render completion and liveness timeout for busy workers.

use chrono::{DateTime, Utc};
use tracing::{Span, debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::event::{Event, EventKind, TickReport};
use crate::model::{TaskStatus, Worker, WorkerStatus};
use crate::store::{Batch, Store};
use crate::telemetry::tick::record_state_transition;

/// Check every busy worker once.
///
/// A worker whose task has outlived its estimate is finished first, so a
/// render that completed is never reported as a timeout. Failures on one
/// worker are counted in the report and do not stop the scan.
pub async fn check_busy_workers<S: Store + ?Sized>(
    store: &S,
    now: DateTime<Utc>,
    config: &SchedulerConfig,
    report: &mut TickReport,
) -> Result<()> {
    let busy = store.workers_by_status(WorkerStatus::Busy).await?;
    debug!(busy = busy.len(), "checking busy workers");

    for worker in busy {
        let worker_id = worker.id;
        match check_worker(store, worker, now, config).await {
            Ok(Some(kind)) => report.events.push(Event::new(now, kind)),
            Ok(None) => {}
            Err(e) => {
                report.errors += 1;
                warn!(%worker_id, error = %e, "heartbeat check failed");
            }
        }
    }
    Ok(())
}

async fn check_worker<S: Store + ?Sized>(
    store: &S,
    worker: Worker,
    now: DateTime<Utc>,
    config: &SchedulerConfig,
) -> Result<Option<EventKind>> {
    let held = match worker.current_task_id {
        Some(task_id) => store
            .get_task(task_id)
            .await?
            .filter(|t| t.is_rendering_on(worker.id)),
        None => None,
    };

    if let Some(task) = held.as_ref().filter(|t| t.is_render_complete(now)) {
        let mut done = task.clone();
        done.complete(now);
        let mut freed = worker.clone();
        freed.release(now);
        store
            .commit(
                Batch::new()
                    .update_task(done, TaskStatus::Rendering)
                    .update_worker(freed, WorkerStatus::Busy),
            )
            .await?;
        record_state_transition(&Span::current(), "task", task.id, "rendering", "completed");
        info!(worker_id = %worker.id, task_id = %task.id, "render complete");
        return Ok(Some(EventKind::TaskCompleted {
            worker_id: worker.id,
            task_id: task.id,
        }));
    }

    let silent_for = worker.heartbeat_age(now).to_std().unwrap_or_default();
    if silent_for > config.liveness_timeout {
        let mut batch = Batch::new();
        if let Some(task) = held.as_ref() {
            let mut failed = task.clone();
            failed.fail_by_timeout(worker.id);
            batch = batch.update_task(failed, TaskStatus::Rendering);
        }
        let mut dead = worker.clone();
        dead.mark_failed();
        store
            .commit(batch.update_worker(dead, WorkerStatus::Busy))
            .await?;
        let span = Span::current();
        record_state_transition(&span, "worker", worker.id, "busy", "failed");
        if let Some(task) = held.as_ref() {
            record_state_transition(&span, "task", task.id, "rendering", "failed");
        }
        warn!(
            worker_id = %worker.id,
            task_id = ?held.as_ref().map(|t| t.id),
            silent_secs = silent_for.as_secs(),
            "worker timed out"
        );
        return Ok(Some(EventKind::WorkerTimedOut {
            worker_id: worker.id,
            task_id: held.map(|t| t.id),
        }));
    }

    if held.is_none() {
        // Busy on a task that is gone or no longer rendering here.
        let mut freed = worker.clone();
        freed.release(now);
        store.update_worker(&freed, WorkerStatus::Busy).await?;
        warn!(
            worker_id = %worker.id,
            stale_task_id = ?worker.current_task_id,
            "released worker with stale assignment"
        );
        return Ok(Some(EventKind::WorkerReleased {
            worker_id: worker.id,
            stale_task_id: worker.current_task_id,
        }));
    }

    Ok(None)
}
