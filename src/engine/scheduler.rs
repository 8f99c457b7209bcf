//! The periodic scheduler loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::event::TickReport;
use crate::store::Store;
use crate::telemetry::metrics;
use crate::telemetry::tick::{start_stage_span, start_tick_span};

use super::{dispatch, heartbeat, retry};

/// Runs heartbeat, retry and dispatch once per tick, in that order.
///
/// Ticks never overlap: a tick that fires while the previous one is still
/// running is skipped.
pub struct Scheduler<S: ?Sized> {
    store: Arc<S>,
    config: SchedulerConfig,
    shutdown: Arc<Notify>,
    in_tick: Arc<Mutex<()>>,
    ticks: Arc<AtomicU64>,
}

impl<S: ?Sized> Clone for Scheduler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            shutdown: Arc::clone(&self.shutdown),
            in_tick: Arc::clone(&self.in_tick),
            ticks: Arc::clone(&self.ticks),
        }
    }
}

impl<S: Store + ?Sized> Scheduler<S> {
    /// Fails if the configuration is invalid (tick interval under one second,
    /// zero liveness timeout).
    pub fn new(store: Arc<S>, config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            shutdown: Arc::new(Notify::new()),
            in_tick: Arc::new(Mutex::new(())),
            ticks: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Number of ticks that ran (skipped ticks are not counted).
    pub fn ticks_run(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Signal the loop to stop after the current tick.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Tick on the configured interval until [`Scheduler::shutdown`] is called.
    ///
    /// A failing tick is logged and the loop keeps going.
    pub async fn run(&self) -> Result<()> {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_secs = self.config.tick_interval.as_secs(),
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!(ticks = self.ticks_run(), "scheduler shutting down");
                    return Ok(());
                }
                _ = interval.tick() => {}
            }

            match self.tick().await {
                Ok(report) if report.errors > 0 => {
                    warn!(
                        events = report.events.len(),
                        errors = report.errors,
                        "tick finished with errors"
                    );
                }
                Ok(report) => debug!(events = report.events.len(), "tick finished"),
                Err(e) => error!("scheduler tick failed: {e}"),
            }
        }
    }

    /// Run one tick at the current time.
    pub async fn tick(&self) -> Result<TickReport> {
        self.tick_at(Utc::now()).await
    }

    /// Run one tick as if the clock read `now`.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let Ok(_running) = self.in_tick.try_lock() else {
            debug!("previous tick still running, skipping");
            return Ok(TickReport::skipped());
        };

        let seq = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let span = start_tick_span(seq);
        let started = Instant::now();
        let store = &*self.store;
        let config = &self.config;
        let mut report = TickReport::default();

        async {
            heartbeat::check_busy_workers(store, now, config, &mut report)
                .instrument(start_stage_span("heartbeat"))
                .await?;
            retry::retry_failed_tasks(store, now, config, &mut report)
                .instrument(start_stage_span("retry"))
                .await?;
            dispatch::dispatch_next(store, now, config, &mut report)
                .instrument(start_stage_span("dispatch"))
                .await
        }
        .instrument(span.clone())
        .await?;

        span.record("tick.events", report.events.len());
        metrics::tick_duration_ms().record(started.elapsed().as_secs_f64() * 1000.0, &[]);
        for event in &report.events {
            metrics::record_event(&event.kind);
        }
        Ok(report)
    }
}
