//! Scheduler span helpers.
//!
//! One span per tick; stage spans nest inside it so a slow tick shows which
//! stage took the time.

use tracing::Span;

/// Start the span for one scheduler tick.
///
/// `tick.events` is declared empty and filled in when the tick finishes.
pub fn start_tick_span(tick: u64) -> Span {
    tracing::info_span!(
        "scheduler.tick",
        "tick.seq" = tick,
        "tick.events" = tracing::field::Empty,
    )
}

/// Start the span for one stage of a tick ("heartbeat", "retry", "dispatch").
pub fn start_stage_span(stage: &'static str) -> Span {
    tracing::debug_span!("scheduler.stage", "stage.name" = stage)
}

/// Record a task or worker state transition on the given span.
pub fn record_state_transition(
    span: &Span,
    entity: &str,
    id: impl std::fmt::Display,
    from: &str,
    to: &str,
) {
    span.in_scope(|| {
        tracing::info!(entity, %id, from, to, "state_transition");
    });
}
