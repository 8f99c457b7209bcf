//! Strict-tier dispatch: at most one candidate per tick.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::event::{Event, EventKind, TickReport};
use crate::model::{Priority, TaskStatus};
use crate::store::Store;

use super::preempt;

/// Pick the first pending task of the most urgent non-empty tier and try to
/// place it. Lower tiers are not looked at once a tier has a candidate, even
/// if placement defers.
pub async fn dispatch_next<S: Store + ?Sized>(
    store: &S,
    now: DateTime<Utc>,
    config: &SchedulerConfig,
    report: &mut TickReport,
) -> Result<()> {
    for priority in Priority::ALL {
        let pending = store
            .tasks_by_status_and_priority(TaskStatus::Pending, priority)
            .await?;
        let Some(candidate) = pending.first() else {
            continue;
        };

        let kind = match preempt::place(store, candidate, now, config).await {
            Ok(kind) => kind,
            Err(e) if e.is_conflict() => {
                debug!(task_id = %candidate.id, error = %e, "lost placement race");
                EventKind::DispatchDeferred {
                    task_id: candidate.id,
                    priority,
                    reason: "claimed concurrently".to_string(),
                }
            }
            Err(e) => return Err(e),
        };
        report.events.push(Event::new(now, kind));
        return Ok(());
    }

    debug!("no pending tasks");
    Ok(())
}
