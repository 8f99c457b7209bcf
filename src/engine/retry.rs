//! Bounded retry of failed tasks.

use chrono::{DateTime, Utc};
use tracing::{Span, debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::event::{Event, EventKind, TickReport};
use crate::model::TaskStatus;
use crate::store::Store;
use crate::telemetry::tick::record_state_transition;

/// Requeue failed tasks that still have retry budget. Tasks without budget
/// stay `failed`; only `failed` tasks are ever looked at.
pub async fn retry_failed_tasks<S: Store + ?Sized>(
    store: &S,
    now: DateTime<Utc>,
    config: &SchedulerConfig,
    report: &mut TickReport,
) -> Result<()> {
    let failed = store.tasks_by_status(TaskStatus::Failed).await?;

    for task in failed {
        if task.retry_count >= config.retry_budget {
            debug!(task_id = %task.id, retry_count = task.retry_count, "retry budget exhausted");
            continue;
        }

        let mut requeued = task.clone();
        requeued.requeue();
        match store.update_task(&requeued, TaskStatus::Failed).await {
            Ok(()) => {
                record_state_transition(&Span::current(), "task", task.id, "failed", "pending");
                info!(
                    task_id = %task.id,
                    retry_count = requeued.retry_count,
                    error = task.error_message.as_deref().unwrap_or("-"),
                    "requeued failed task"
                );
                report.events.push(Event::new(
                    now,
                    EventKind::TaskRequeued {
                        task_id: task.id,
                        retry_count: requeued.retry_count,
                    },
                ));
            }
            Err(e) => {
                report.errors += 1;
                warn!(task_id = %task.id, error = %e, "retry failed");
            }
        }
    }
    Ok(())
}
