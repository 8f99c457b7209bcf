//! Metric instrument factories for renderq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"renderq"` meter.

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};

use crate::event::EventKind;

/// Returns the shared meter for renderq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("renderq")
}

/// Counter: tasks submitted.
/// Labels: `priority`.
pub fn tasks_submitted() -> Counter<u64> {
    meter()
        .u64_counter("renderq.tasks.submitted")
        .with_description("Number of render tasks submitted")
        .build()
}

/// Counter: tasks handed to a worker.
/// Labels: `path` ("push" | "pull"), `priority`.
pub fn tasks_assigned() -> Counter<u64> {
    meter()
        .u64_counter("renderq.tasks.assigned")
        .with_description("Number of task assignments")
        .build()
}

/// Counter: running tasks evicted for a more urgent one.
/// Labels: `priority`, `evicted_priority`.
pub fn preemptions() -> Counter<u64> {
    meter()
        .u64_counter("renderq.scheduler.preemptions")
        .with_description("Number of preemptions")
        .build()
}

/// Counter: workers created on demand by the dispatcher.
pub fn workers_spawned() -> Counter<u64> {
    meter()
        .u64_counter("renderq.workers.spawned")
        .with_description("Number of workers spawned on demand")
        .build()
}

/// Counter: busy workers declared dead by the heartbeat monitor.
pub fn worker_timeouts() -> Counter<u64> {
    meter()
        .u64_counter("renderq.workers.timeouts")
        .with_description("Number of worker liveness timeouts")
        .build()
}

/// Counter: tasks reaching `completed`.
pub fn tasks_completed() -> Counter<u64> {
    meter()
        .u64_counter("renderq.tasks.completed")
        .with_description("Number of completed tasks")
        .build()
}

/// Counter: failed tasks put back to pending.
pub fn tasks_requeued() -> Counter<u64> {
    meter()
        .u64_counter("renderq.tasks.requeued")
        .with_description("Number of failed tasks requeued for retry")
        .build()
}

/// Histogram: scheduler tick duration in milliseconds.
pub fn tick_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("renderq.scheduler.tick_duration_ms")
        .with_description("Scheduler tick duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Feed one scheduler event into the matching instrument.
pub fn record_event(kind: &EventKind) {
    match kind {
        EventKind::WorkerSpawned { priority, .. } => {
            workers_spawned().add(1, &[]);
            tasks_assigned().add(
                1,
                &[
                    KeyValue::new("path", "push"),
                    KeyValue::new("priority", priority.to_string()),
                ],
            );
        }
        EventKind::TaskAssigned { priority, .. } => {
            tasks_assigned().add(
                1,
                &[
                    KeyValue::new("path", "push"),
                    KeyValue::new("priority", priority.to_string()),
                ],
            );
        }
        EventKind::TaskPreempted {
            priority,
            evicted_priority,
            ..
        } => {
            preemptions().add(
                1,
                &[
                    KeyValue::new("priority", priority.to_string()),
                    KeyValue::new("evicted_priority", evicted_priority.to_string()),
                ],
            );
        }
        EventKind::TaskCompleted { .. } => tasks_completed().add(1, &[]),
        EventKind::WorkerTimedOut { .. } => worker_timeouts().add(1, &[]),
        EventKind::TaskRequeued { .. } => tasks_requeued().add(1, &[]),
        EventKind::DispatchDeferred { .. } | EventKind::WorkerReleased { .. } => {}
    }
}
