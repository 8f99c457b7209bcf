//! Integration tests for the scheduler tick: heartbeat, retry, dispatch and
//! preemption, driven against the in-memory store with an explicit clock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use renderq::config::SchedulerConfig;
use renderq::engine::retry;
use renderq::event::{EventKind, TickReport};
use renderq::model::*;
use renderq::store::{Batch, MemoryStore, Store, TaskStore, WorkerStore, Write};
use renderq::{Error, Result, Scheduler};

fn scheduler(store: &Arc<MemoryStore>) -> Scheduler<MemoryStore> {
    Scheduler::new(Arc::clone(store), SchedulerConfig::default()).unwrap()
}

async fn pending(
    store: &MemoryStore,
    priority: Priority,
    secs: u64,
    created: DateTime<Utc>,
) -> Task {
    let task = NewTask::new(priority, secs).build(created).unwrap();
    store.insert_task(&task).await.unwrap();
    task
}

/// A task already rendering on its own busy worker.
async fn rendering(
    store: &MemoryStore,
    priority: Priority,
    secs: u64,
    created: DateTime<Utc>,
    heartbeat: DateTime<Utc>,
) -> (Task, Worker) {
    let mut task = NewTask::new(priority, secs).build(created).unwrap();
    let worker = Worker::spawn_for(task.id, heartbeat);
    task.status = TaskStatus::Rendering;
    task.assigned_worker_id = Some(worker.id);
    task.started_at = Some(created);
    store.insert_task(&task).await.unwrap();
    store.insert_worker(&worker).await.unwrap();
    (task, worker)
}

async fn task(store: &MemoryStore, id: TaskId) -> Task {
    store.get_task(id).await.unwrap().unwrap()
}

async fn worker(store: &MemoryStore, id: WorkerId) -> Worker {
    store.get_worker(id).await.unwrap().unwrap()
}

/// Every rendering task is held by exactly one busy worker and vice versa.
async fn assert_consistent(store: &MemoryStore) {
    let tasks = store.list_tasks().await.unwrap();
    let workers = store.list_workers().await.unwrap();
    for t in tasks.iter().filter(|t| t.status == TaskStatus::Rendering) {
        let holders: Vec<_> = workers
            .iter()
            .filter(|w| w.status == WorkerStatus::Busy && w.current_task_id == Some(t.id))
            .collect();
        assert_eq!(holders.len(), 1, "task {} has {} holders", t.id, holders.len());
        assert_eq!(t.assigned_worker_id, Some(holders[0].id));
    }
    for t in tasks.iter().filter(|t| t.status != TaskStatus::Rendering) {
        assert!(t.assigned_worker_id.is_none(), "task {} is {} but assigned", t.id, t.status);
    }
    for w in workers.iter().filter(|w| w.status == WorkerStatus::Busy) {
        let held = tasks.iter().find(|t| Some(t.id) == w.current_task_id).unwrap();
        assert!(held.is_rendering_on(w.id));
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_farm_spawns_worker_for_pending_task() {
    let store = Arc::new(MemoryStore::new());
    let t0 = Utc::now();
    let t = pending(&store, Priority::Medium, 600, t0).await;

    let report = scheduler(&store).tick_at(t0).await.unwrap();

    assert_eq!(report.events.len(), 1);
    let EventKind::WorkerSpawned { worker_id, task_id, priority } = report.events[0].kind.clone()
    else {
        panic!("expected WorkerSpawned, got {:?}", report.events[0].kind);
    };
    assert_eq!(task_id, t.id);
    assert_eq!(priority, Priority::Medium);

    let stored = task(&store, t.id).await;
    assert_eq!(stored.status, TaskStatus::Rendering);
    assert_eq!(stored.assigned_worker_id, Some(worker_id));
    assert_eq!(stored.started_at, Some(t0));
    let w = worker(&store, worker_id).await;
    assert_eq!(w.status, WorkerStatus::Busy);
    assert_eq!(w.current_task_id, Some(t.id));
    assert_eq!(w.last_heartbeat, t0);
    assert_consistent(&store).await;
}

#[tokio::test]
async fn most_urgent_tier_wins_over_older_tasks() {
    let store = Arc::new(MemoryStore::new());
    let t0 = Utc::now();
    let low = pending(&store, Priority::Low, 600, t0 - TimeDelta::hours(2)).await;
    let high = pending(&store, Priority::High, 600, t0).await;

    scheduler(&store).tick_at(t0).await.unwrap();

    assert_eq!(task(&store, high.id).await.status, TaskStatus::Rendering);
    assert_eq!(task(&store, low.id).await.status, TaskStatus::Pending);
}

#[tokio::test]
async fn first_submitted_wins_within_a_tier() {
    let store = Arc::new(MemoryStore::new());
    let t0 = Utc::now();
    let first = pending(&store, Priority::Rush, 600, t0).await;
    let second = pending(&store, Priority::Rush, 600, t0).await;

    scheduler(&store).tick_at(t0).await.unwrap();

    assert_eq!(task(&store, first.id).await.status, TaskStatus::Rendering);
    assert_eq!(task(&store, second.id).await.status, TaskStatus::Pending);
}

#[tokio::test]
async fn at_most_one_placement_per_tick() {
    let store = Arc::new(MemoryStore::new());
    let t0 = Utc::now();
    for _ in 0..3 {
        pending(&store, Priority::High, 600, t0).await;
    }

    let report = scheduler(&store).tick_at(t0).await.unwrap();

    assert_eq!(report.count(|k| matches!(k, EventKind::WorkerSpawned { .. })), 1);
    assert_eq!(store.tasks_by_status(TaskStatus::Pending).await.unwrap().len(), 2);
    assert_eq!(store.list_workers().await.unwrap().len(), 1);
}

#[tokio::test]
async fn same_priority_past_gate_gets_a_new_worker() {
    let store = Arc::new(MemoryStore::new());
    let t0 = Utc::now();
    let (running, holder) =
        rendering(&store, Priority::Rush, 3600, t0 - TimeDelta::minutes(6), t0).await;
    let next = pending(&store, Priority::Rush, 3600, t0).await;

    let report = scheduler(&store).tick_at(t0).await.unwrap();

    assert_eq!(report.count(|k| matches!(k, EventKind::WorkerSpawned { .. })), 1);
    assert_eq!(task(&store, running.id).await.assigned_worker_id, Some(holder.id));
    let placed = task(&store, next.id).await;
    assert_eq!(placed.status, TaskStatus::Rendering);
    assert_ne!(placed.assigned_worker_id, Some(holder.id));
    assert_eq!(store.workers_by_status(WorkerStatus::Busy).await.unwrap().len(), 2);
    assert_consistent(&store).await;
}

#[tokio::test]
async fn idle_workers_are_left_to_pull_by_default() {
    let store = Arc::new(MemoryStore::new());
    let t0 = Utc::now();
    let idle = Worker::ready(t0);
    store.insert_worker(&idle).await.unwrap();
    let t = pending(&store, Priority::High, 600, t0).await;

    let report = scheduler(&store).tick_at(t0).await.unwrap();

    assert_eq!(report.count(|k| matches!(k, EventKind::DispatchDeferred { .. })), 1);
    assert_eq!(task(&store, t.id).await.status, TaskStatus::Pending);
    assert_eq!(worker(&store, idle.id).await.status, WorkerStatus::Ready);
    assert_eq!(store.list_workers().await.unwrap().len(), 1);
}

#[tokio::test]
async fn idle_worker_is_assigned_when_enabled() {
    let store = Arc::new(MemoryStore::new());
    let t0 = Utc::now();
    let idle = Worker::ready(t0 - TimeDelta::minutes(1));
    store.insert_worker(&idle).await.unwrap();
    let t = pending(&store, Priority::High, 600, t0).await;
    let config = SchedulerConfig {
        assign_idle_workers: true,
        ..SchedulerConfig::default()
    };

    let report = Scheduler::new(Arc::clone(&store), config)
        .unwrap()
        .tick_at(t0)
        .await
        .unwrap();

    assert_eq!(report.count(|k| matches!(k, EventKind::TaskAssigned { .. })), 1);
    assert_eq!(task(&store, t.id).await.assigned_worker_id, Some(idle.id));
    let w = worker(&store, idle.id).await;
    assert_eq!(w.status, WorkerStatus::Busy);
    assert_eq!(w.last_heartbeat, t0);
    assert_consistent(&store).await;
}

// ---------------------------------------------------------------------------
// Preemption
// ---------------------------------------------------------------------------

/// LOW task rendering for `age`; a pending task of `priority` arrives.
async fn contend(priority: Priority, age: TimeDelta) -> (Arc<MemoryStore>, Task, Worker, Task) {
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();
    let (running, holder) =
        rendering(&store, Priority::Low, 7 * 24 * 3600, now - age, now).await;
    let candidate = pending(&store, priority, 600, now).await;
    let _ = scheduler(&store).tick_at(now).await.unwrap();
    (store, running, holder, candidate)
}

async fn assert_deferred(store: &MemoryStore, running: &Task, holder: &Worker, candidate: &Task) {
    assert!(task(store, running.id).await.is_rendering_on(holder.id));
    assert_eq!(worker(store, holder.id).await.current_task_id, Some(running.id));
    assert_eq!(task(store, candidate.id).await.status, TaskStatus::Pending);
    assert_eq!(store.list_workers().await.unwrap().len(), 1);
}

async fn assert_preempted(store: &MemoryStore, running: &Task, holder: &Worker, candidate: &Task) {
    let evicted = task(store, running.id).await;
    assert_eq!(evicted.status, TaskStatus::Pending);
    assert!(evicted.assigned_worker_id.is_none());
    assert_eq!(evicted.last_worker_id, Some(holder.id));

    let placed = task(store, candidate.id).await;
    assert!(placed.is_rendering_on(holder.id));
    assert!(placed.started_at.is_some());

    let w = worker(store, holder.id).await;
    assert_eq!(w.status, WorkerStatus::Busy);
    assert_eq!(w.current_task_id, Some(candidate.id));
    assert_eq!(store.list_workers().await.unwrap().len(), 1);
    assert_consistent(store).await;
}

#[tokio::test]
async fn rush_waits_until_running_task_reaches_five_minutes() {
    let (store, running, holder, rush) =
        contend(Priority::Rush, TimeDelta::minutes(4) + TimeDelta::seconds(59)).await;
    assert_deferred(&store, &running, &holder, &rush).await;

    let (store, running, holder, rush) = contend(Priority::Rush, TimeDelta::minutes(5)).await;
    assert_preempted(&store, &running, &holder, &rush).await;
}

#[tokio::test]
async fn high_waits_until_running_task_reaches_thirty_minutes() {
    let (store, running, holder, high) = contend(Priority::High, TimeDelta::minutes(29)).await;
    assert_deferred(&store, &running, &holder, &high).await;

    let (store, running, holder, high) = contend(Priority::High, TimeDelta::minutes(30)).await;
    assert_preempted(&store, &running, &holder, &high).await;
}

#[tokio::test]
async fn medium_waits_until_running_task_reaches_twelve_hours() {
    let (store, running, holder, medium) = contend(Priority::Medium, TimeDelta::hours(11)).await;
    assert_deferred(&store, &running, &holder, &medium).await;

    let (store, running, holder, medium) = contend(Priority::Medium, TimeDelta::hours(12)).await;
    assert_preempted(&store, &running, &holder, &medium).await;
}

#[tokio::test]
async fn low_never_preempts() {
    let (store, running, holder, low) = contend(Priority::Low, TimeDelta::days(3)).await;
    assert_deferred(&store, &running, &holder, &low).await;
}

#[tokio::test]
async fn any_other_tier_past_the_gate_is_evicted() {
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();
    let (running, holder) = rendering(
        &store,
        Priority::Rush,
        7 * 24 * 3600,
        now - TimeDelta::minutes(31),
        now,
    )
    .await;
    let high = pending(&store, Priority::High, 600, now).await;

    let report = scheduler(&store).tick_at(now).await.unwrap();

    assert_eq!(report.count(|k| matches!(k, EventKind::TaskPreempted { .. })), 1);
    assert_preempted(&store, &running, &holder, &high).await;
}

#[tokio::test]
async fn rush_preempts_after_deferral_once_gate_passes() {
    let store = Arc::new(MemoryStore::new());
    let t0 = Utc::now();
    let sched = scheduler(&store);
    let low = pending(&store, Priority::Low, 3600, t0).await;
    sched.tick_at(t0).await.unwrap();
    let holder = task(&store, low.id).await.assigned_worker_id.unwrap();

    let rush = pending(&store, Priority::Rush, 600, t0 + TimeDelta::minutes(1)).await;
    let report = sched.tick_at(t0 + TimeDelta::minutes(1)).await.unwrap();
    assert_eq!(report.count(|k| matches!(k, EventKind::DispatchDeferred { .. })), 1);
    assert_eq!(task(&store, rush.id).await.status, TaskStatus::Pending);

    let report = sched.tick_at(t0 + TimeDelta::minutes(5)).await.unwrap();
    assert_eq!(report.count(|k| matches!(k, EventKind::TaskPreempted { .. })), 1);
    assert!(task(&store, rush.id).await.is_rendering_on(holder));
    assert_eq!(task(&store, low.id).await.status, TaskStatus::Pending);
    assert_consistent(&store).await;
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

#[tokio::test]
async fn render_completes_strictly_after_estimate() {
    let store = Arc::new(MemoryStore::new());
    let t0 = Utc::now();
    let (t, w) = rendering(&store, Priority::High, 60, t0, t0).await;
    let sched = scheduler(&store);

    sched.tick_at(t0 + TimeDelta::seconds(60)).await.unwrap();
    assert_eq!(task(&store, t.id).await.status, TaskStatus::Rendering);

    let done_at = t0 + TimeDelta::seconds(61);
    let report = sched.tick_at(done_at).await.unwrap();
    assert_eq!(report.count(|k| matches!(k, EventKind::TaskCompleted { .. })), 1);

    let done = task(&store, t.id).await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.completed_at, Some(done_at));
    assert!(done.assigned_worker_id.is_none());
    let freed = worker(&store, w.id).await;
    assert_eq!(freed.status, WorkerStatus::Ready);
    assert!(freed.current_task_id.is_none());
    assert_eq!(freed.last_heartbeat, done_at);
}

#[tokio::test]
async fn finished_render_completes_even_when_heartbeat_is_stale() {
    let store = Arc::new(MemoryStore::new());
    let t0 = Utc::now();
    let (t, w) = rendering(&store, Priority::Medium, 60, t0, t0).await;

    let report = scheduler(&store)
        .tick_at(t0 + TimeDelta::hours(2))
        .await
        .unwrap();

    assert_eq!(report.count(|k| matches!(k, EventKind::WorkerTimedOut { .. })), 0);
    assert_eq!(task(&store, t.id).await.status, TaskStatus::Completed);
    assert_eq!(worker(&store, w.id).await.status, WorkerStatus::Ready);
}

#[tokio::test]
async fn silent_worker_times_out_and_task_is_retried() {
    let store = Arc::new(MemoryStore::new());
    let t0 = Utc::now();
    let (t, w) = rendering(&store, Priority::High, 36_000, t0, t0).await;
    let now = t0 + TimeDelta::minutes(31);

    let report = scheduler(&store).tick_at(now).await.unwrap();

    assert_eq!(report.count(|k| matches!(k, EventKind::WorkerTimedOut { .. })), 1);
    assert_eq!(report.count(|k| matches!(k, EventKind::TaskRequeued { .. })), 1);
    assert_eq!(report.count(|k| matches!(k, EventKind::WorkerSpawned { .. })), 1);

    let dead = worker(&store, w.id).await;
    assert_eq!(dead.status, WorkerStatus::Failed);
    assert!(dead.current_task_id.is_none());

    // Requeued and placed on a fresh worker within the same tick.
    let retried = task(&store, t.id).await;
    assert_eq!(retried.retry_count, 1);
    assert_eq!(retried.status, TaskStatus::Rendering);
    assert_eq!(retried.last_worker_id, Some(w.id));
    assert_ne!(retried.assigned_worker_id, Some(w.id));
    assert!(retried.error_message.is_none());
    assert_consistent(&store).await;
}

#[tokio::test]
async fn heartbeat_exactly_at_timeout_is_still_alive() {
    let store = Arc::new(MemoryStore::new());
    let t0 = Utc::now();
    let (t, w) = rendering(&store, Priority::High, 36_000, t0, t0).await;

    scheduler(&store)
        .tick_at(t0 + TimeDelta::minutes(30))
        .await
        .unwrap();

    assert_eq!(worker(&store, w.id).await.status, WorkerStatus::Busy);
    assert!(task(&store, t.id).await.is_rendering_on(w.id));
}

#[tokio::test]
async fn timeout_opens_a_fresh_retry_budget() {
    let store = Arc::new(MemoryStore::new());
    let t0 = Utc::now();
    let (mut t, w) = rendering(&store, Priority::Low, 36_000, t0, t0).await;
    t.retry_count = 1;
    store.update_task(&t, TaskStatus::Rendering).await.unwrap();

    scheduler(&store)
        .tick_at(t0 + TimeDelta::hours(1))
        .await
        .unwrap();

    let retried = task(&store, t.id).await;
    assert_eq!(retried.retry_count, 1);
    assert_ne!(retried.status, TaskStatus::Failed);
    assert_eq!(retried.last_worker_id, Some(w.id));
}

#[tokio::test]
async fn busy_worker_without_its_task_is_released() {
    let store = Arc::new(MemoryStore::new());
    let t0 = Utc::now();
    let orphan = Worker::spawn_for(TaskId::new(), t0);
    store.insert_worker(&orphan).await.unwrap();

    let report = scheduler(&store).tick_at(t0).await.unwrap();

    assert_eq!(report.count(|k| matches!(k, EventKind::WorkerReleased { .. })), 1);
    let w = worker(&store, orphan.id).await;
    assert_eq!(w.status, WorkerStatus::Ready);
    assert!(w.current_task_id.is_none());
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

async fn failed(store: &MemoryStore, retry_count: u32) -> Task {
    let mut t = NewTask::new(Priority::Low, 600).build(Utc::now()).unwrap();
    t.status = TaskStatus::Failed;
    t.retry_count = retry_count;
    t.error_message = Some("render crashed".to_string());
    store.insert_task(&t).await.unwrap();
    t
}

#[tokio::test]
async fn failed_task_with_budget_is_requeued() {
    let store = Arc::new(MemoryStore::new());
    let idle = Worker::ready(Utc::now());
    store.insert_worker(&idle).await.unwrap();
    let t = failed(&store, 0).await;

    let report = scheduler(&store).tick().await.unwrap();

    assert_eq!(report.count(|k| matches!(k, EventKind::TaskRequeued { .. })), 1);
    let requeued = task(&store, t.id).await;
    assert_eq!(requeued.status, TaskStatus::Pending);
    assert_eq!(requeued.retry_count, 1);
    assert!(requeued.error_message.is_none());
}

#[tokio::test]
async fn exhausted_task_stays_failed() {
    let store = Arc::new(MemoryStore::new());
    let t = failed(&store, 1).await;
    let sched = scheduler(&store);

    for _ in 0..3 {
        let report = sched.tick().await.unwrap();
        assert!(report.events.is_empty());
    }

    let stored = task(&store, t.id).await;
    assert_eq!(stored, t);
}

#[tokio::test]
async fn retry_check_leaves_pending_tasks_alone() {
    let store = MemoryStore::new();
    let t0 = Utc::now();
    let mut t = pending(&store, Priority::Medium, 600, t0).await;
    t.retry_count = 1;
    store.update_task(&t, TaskStatus::Pending).await.unwrap();
    let config = SchedulerConfig::default();

    let mut report = TickReport::default();
    for minutes in [1, 2] {
        let now = t0 + TimeDelta::minutes(minutes);
        retry::retry_failed_tasks(&store, now, &config, &mut report)
            .await
            .unwrap();
    }

    assert!(report.events.is_empty());
    assert_eq!(report.errors, 0);
    assert_eq!(task(&store, t.id).await, t);
}

#[tokio::test]
async fn retry_budget_is_configurable() {
    let store = Arc::new(MemoryStore::new());
    let t = failed(&store, 1).await;
    let config = SchedulerConfig {
        retry_budget: 3,
        ..SchedulerConfig::default()
    };

    Scheduler::new(Arc::clone(&store), config)
        .unwrap()
        .tick()
        .await
        .unwrap();

    assert_eq!(task(&store, t.id).await.retry_count, 2);
}

// ---------------------------------------------------------------------------
// Loop behaviour
// ---------------------------------------------------------------------------

/// Wraps the in-memory store to slow scans down or fail writes that touch
/// one worker.
#[derive(Default)]
struct FaultyStore {
    inner: MemoryStore,
    scan_delay: Option<Duration>,
    poisoned: Option<WorkerId>,
}

#[async_trait]
impl TaskStore for FaultyStore {
    async fn insert_task(&self, task: &Task) -> Result<()> {
        self.inner.insert_task(task).await
    }
    async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        self.inner.get_task(id).await
    }
    async fn list_tasks(&self) -> Result<Vec<Task>> {
        self.inner.list_tasks().await
    }
    async fn tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        self.inner.tasks_by_status(status).await
    }
    async fn tasks_by_status_and_priority(
        &self,
        status: TaskStatus,
        priority: Priority,
    ) -> Result<Vec<Task>> {
        self.inner.tasks_by_status_and_priority(status, priority).await
    }
    async fn update_task(&self, task: &Task, expected: TaskStatus) -> Result<()> {
        self.inner.update_task(task, expected).await
    }
    async fn set_task_error(&self, id: TaskId, message: &str) -> Result<Task> {
        self.inner.set_task_error(id, message).await
    }
}

#[async_trait]
impl WorkerStore for FaultyStore {
    async fn insert_worker(&self, worker: &Worker) -> Result<()> {
        self.inner.insert_worker(worker).await
    }
    async fn get_worker(&self, id: WorkerId) -> Result<Option<Worker>> {
        self.inner.get_worker(id).await
    }
    async fn list_workers(&self) -> Result<Vec<Worker>> {
        self.inner.list_workers().await
    }
    async fn workers_by_status(&self, status: WorkerStatus) -> Result<Vec<Worker>> {
        if let Some(delay) = self.scan_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.workers_by_status(status).await
    }
    async fn update_worker(&self, worker: &Worker, expected: WorkerStatus) -> Result<()> {
        self.commit(Batch::new().update_worker(worker.clone(), expected))
            .await
    }
    async fn touch_worker(&self, id: WorkerId, at: DateTime<Utc>) -> Result<Worker> {
        self.inner.touch_worker(id, at).await
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn commit(&self, batch: Batch) -> Result<()> {
        let touches_poisoned = batch.writes().iter().any(|w| {
            matches!(w, Write::UpdateWorker { worker, .. } if Some(worker.id) == self.poisoned)
        });
        if touches_poisoned {
            return Err(Error::Other("injected write failure".to_string()));
        }
        self.inner.commit(batch).await
    }
}

#[tokio::test]
async fn one_failing_worker_does_not_stop_the_others() {
    let t0 = Utc::now();
    let mut store = FaultyStore::default();
    let (bad_task, bad) = rendering(&store.inner, Priority::High, 60, t0, t0).await;
    let (good_task, good) = rendering(&store.inner, Priority::High, 60, t0, t0).await;
    store.poisoned = Some(bad.id);
    let store = Arc::new(store);

    let report = Scheduler::new(Arc::clone(&store), SchedulerConfig::default())
        .unwrap()
        .tick_at(t0 + TimeDelta::minutes(2))
        .await
        .unwrap();

    assert_eq!(report.errors, 1);
    assert_eq!(report.count(|k| matches!(k, EventKind::TaskCompleted { .. })), 1);
    let done = store.get_task(good_task.id).await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    let ready = store.get_worker(good.id).await.unwrap().unwrap();
    assert_eq!(ready.status, WorkerStatus::Ready);
    // Nothing half-written for the failing pair.
    let stuck = store.get_task(bad_task.id).await.unwrap().unwrap();
    assert!(stuck.is_rendering_on(bad.id));
}

#[tokio::test]
async fn overlapping_tick_is_skipped() {
    let store = Arc::new(FaultyStore {
        scan_delay: Some(Duration::from_millis(200)),
        ..FaultyStore::default()
    });
    let sched = Scheduler::new(Arc::clone(&store), SchedulerConfig::default()).unwrap();

    let first = {
        let sched = sched.clone();
        tokio::spawn(async move { sched.tick().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = sched.tick().await.unwrap();
    assert!(second.skipped);

    let first = first.await.unwrap().unwrap();
    assert!(!first.skipped);
    assert_eq!(sched.ticks_run(), 1);
}

#[tokio::test]
async fn run_ticks_until_shutdown() {
    let store = Arc::new(MemoryStore::new());
    let t = pending(&store, Priority::High, 600, Utc::now()).await;
    let sched = scheduler(&store);

    let handle = {
        let sched = sched.clone();
        tokio::spawn(async move { sched.run().await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    sched.shutdown();
    handle.await.unwrap().unwrap();

    assert!(sched.ticks_run() >= 1);
    assert_eq!(task(&store, t.id).await.status, TaskStatus::Rendering);
}

#[test]
fn sub_second_tick_interval_is_rejected() {
    let config = SchedulerConfig {
        tick_interval: Duration::from_millis(500),
        ..SchedulerConfig::default()
    };
    let result = Scheduler::new(Arc::new(MemoryStore::new()), config);
    assert!(matches!(result, Err(Error::Config(_))));
}
