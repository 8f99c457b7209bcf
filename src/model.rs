//! Core data model.
//!
//! A task is a render job with a priority tier and a duration estimate.
//! A worker is a render process that holds at most one task at a time.
//! State transitions live here as methods so that every path (scheduler
//! tick, pull path, operator updates) mutates entities the same way.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Newtype for task IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype for worker IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Priority tier of a task, most urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Rush,
    High,
    Medium,
    Low,
}

impl Priority {
    /// Tiers in dispatch order.
    pub const ALL: [Priority; 4] = [
        Priority::Rush,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];

    /// Integer encoding where smaller means more urgent.
    pub fn rank(self) -> i32 {
        match self {
            Priority::Rush => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }

    /// Minimum render age a running task must reach before a pending task
    /// of this tier may take its worker. `None` means the tier never
    /// preempts.
    pub fn preemption_gate(self) -> Option<TimeDelta> {
        match self {
            Priority::Rush => Some(TimeDelta::minutes(5)),
            Priority::High => Some(TimeDelta::minutes(30)),
            Priority::Medium => Some(TimeDelta::hours(12)),
            Priority::Low => None,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Rush => "RUSH",
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "RUSH" => Ok(Priority::Rush),
            "HIGH" => Ok(Priority::High),
            "MEDIUM" => Ok(Priority::Medium),
            "LOW" => Ok(Priority::Low),
            _ => Err(Error::Validation(format!("unknown priority: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Task status
// ---------------------------------------------------------------------------

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for a worker.
    Pending,
    /// Held by exactly one busy worker.
    Rendering,
    /// Done. Terminal.
    Completed,
    /// Failed; requeued while the retry budget lasts, terminal after.
    Failed,
}

impl TaskStatus {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Pending, Rendering)
                | (Pending, Completed)
                | (Pending, Failed)     // cancelled by an operator
                | (Rendering, Completed)
                | (Rendering, Failed)
                | (Rendering, Pending)  // preempted
                | (Failed, Pending) // retry
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Rendering => "rendering",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "rendering" => Ok(TaskStatus::Rendering),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(Error::Validation(format!("unknown task status: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A render job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub priority: Priority,
    /// Derived from `priority` at creation and never recomputed.
    pub priority_rank: i32,
    pub estimated_render_seconds: u64,
    /// Scene file the render reads; the output path is derived from it.
    pub file_path: Option<String>,
    pub status: TaskStatus,
    pub retry_count: u32,
    /// Set only while rendering.
    pub assigned_worker_id: Option<WorkerId>,
    /// Worker that vacated the task on preemption or timeout.
    pub last_worker_id: Option<WorkerId>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Time since creation. Render age and completion are both measured
    /// from `created_at`, not from `started_at`.
    pub fn render_age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.created_at
    }

    /// Whole seconds since creation strictly exceed the estimate.
    pub fn is_render_complete(&self, now: DateTime<Utc>) -> bool {
        i64::try_from(self.estimated_render_seconds)
            .is_ok_and(|estimate| self.render_age(now).num_seconds() > estimate)
    }

    pub fn is_rendering_on(&self, worker: WorkerId) -> bool {
        self.status == TaskStatus::Rendering && self.assigned_worker_id == Some(worker)
    }

    pub(crate) fn assign_to(&mut self, worker: WorkerId, now: DateTime<Utc>) {
        self.status = TaskStatus::Rendering;
        self.assigned_worker_id = Some(worker);
        self.started_at = Some(now);
    }

    pub(crate) fn complete(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.assigned_worker_id = None;
        self.completed_at = Some(now);
    }

    pub(crate) fn fail_by_timeout(&mut self, worker: WorkerId) {
        self.status = TaskStatus::Failed;
        self.assigned_worker_id = None;
        self.last_worker_id = Some(worker);
        self.error_message = Some("Worker timeout".to_string());
        // A timeout opens a fresh failure episode.
        self.retry_count = 0;
    }

    pub(crate) fn preempt(&mut self, vacated_by: WorkerId) {
        self.status = TaskStatus::Pending;
        self.assigned_worker_id = None;
        self.last_worker_id = Some(vacated_by);
        self.started_at = None;
    }

    pub(crate) fn requeue(&mut self) {
        self.status = TaskStatus::Pending;
        self.retry_count += 1;
        self.error_message = None;
    }
}

/// Builder for creating new tasks. The submission API of the farm.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub(crate) priority: Priority,
    pub(crate) estimated_render_seconds: u64,
    pub(crate) file_path: Option<String>,
}

impl NewTask {
    pub fn new(priority: Priority, estimated_render_seconds: u64) -> Self {
        Self {
            priority,
            estimated_render_seconds,
            file_path: None,
        }
    }

    pub fn file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Build the pending task. The estimate must be positive and fit a
    /// signed 64-bit column.
    pub fn build(self, now: DateTime<Utc>) -> Result<Task> {
        if self.estimated_render_seconds == 0 {
            return Err(Error::Validation(
                "estimated_render_seconds must be positive".to_string(),
            ));
        }
        if i64::try_from(self.estimated_render_seconds).is_err() {
            return Err(Error::Validation(format!(
                "estimated_render_seconds must be at most {}",
                i64::MAX
            )));
        }
        Ok(Task {
            id: TaskId::new(),
            priority: self.priority,
            priority_rank: self.priority.rank(),
            estimated_render_seconds: self.estimated_render_seconds,
            file_path: self.file_path,
            status: TaskStatus::Pending,
            retry_count: 0,
            assigned_worker_id: None,
            last_worker_id: None,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Ready,
    Busy,
    Offline,
    Failed,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerStatus::Ready => "ready",
            WorkerStatus::Busy => "busy",
            WorkerStatus::Offline => "offline",
            WorkerStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for WorkerStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ready" => Ok(WorkerStatus::Ready),
            "busy" => Ok(WorkerStatus::Busy),
            "offline" => Ok(WorkerStatus::Offline),
            "failed" => Ok(WorkerStatus::Failed),
            _ => Err(Error::Validation(format!("unknown worker status: {s}"))),
        }
    }
}

/// A render process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub status: WorkerStatus,
    pub last_heartbeat: DateTime<Utc>,
    /// Set while busy.
    pub current_task_id: Option<TaskId>,
}

impl Worker {
    /// A fresh idle worker, as registered through the farm.
    pub fn ready(now: DateTime<Utc>) -> Self {
        Self {
            id: WorkerId::new(),
            status: WorkerStatus::Ready,
            last_heartbeat: now,
            current_task_id: None,
        }
    }

    /// A worker spun up on demand, already holding `task`.
    pub fn spawn_for(task: TaskId, now: DateTime<Utc>) -> Self {
        Self {
            id: WorkerId::new(),
            status: WorkerStatus::Busy,
            last_heartbeat: now,
            current_task_id: Some(task),
        }
    }

    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.last_heartbeat
    }

    pub(crate) fn occupy(&mut self, task: TaskId, now: DateTime<Utc>) {
        self.status = WorkerStatus::Busy;
        self.current_task_id = Some(task);
        self.last_heartbeat = now;
    }

    pub(crate) fn release(&mut self, now: DateTime<Utc>) {
        self.status = WorkerStatus::Ready;
        self.current_task_id = None;
        self.last_heartbeat = now;
    }

    pub(crate) fn mark_failed(&mut self) {
        self.status = WorkerStatus::Failed;
        self.current_task_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_rank_mapping_is_fixed() {
        assert_eq!(Priority::Rush.rank(), 0);
        assert_eq!(Priority::High.rank(), 1);
        assert_eq!(Priority::Medium.rank(), 2);
        assert_eq!(Priority::Low.rank(), 3);
    }

    #[test]
    fn only_low_has_no_preemption_gate() {
        assert_eq!(Priority::Rush.preemption_gate(), Some(TimeDelta::seconds(300)));
        assert_eq!(Priority::High.preemption_gate(), Some(TimeDelta::seconds(1800)));
        assert_eq!(Priority::Medium.preemption_gate(), Some(TimeDelta::seconds(43_200)));
        assert_eq!(Priority::Low.preemption_gate(), None);
    }

    #[test]
    fn priority_parses_case_insensitively() {
        assert_eq!("rush".parse::<Priority>().unwrap(), Priority::Rush);
        assert_eq!("MEDIUM".parse::<Priority>().unwrap(), Priority::Medium);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn priority_serializes_upper_case() {
        let json = serde_json::to_string(&Priority::High).unwrap();
        assert_eq!(json, "\"HIGH\"");
    }

    #[test]
    fn new_task_derives_rank_and_starts_pending() {
        let now = Utc::now();
        let task = NewTask::new(Priority::Medium, 600)
            .file_path("scenes/intro.blend")
            .build(now)
            .unwrap();
        assert_eq!(task.priority_rank, 2);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 0);
        assert!(task.assigned_worker_id.is_none());
        assert_eq!(task.file_path.as_deref(), Some("scenes/intro.blend"));
    }

    #[test]
    fn zero_estimate_is_rejected() {
        let err = NewTask::new(Priority::Low, 0).build(Utc::now()).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn estimate_beyond_signed_range_is_rejected() {
        let now = Utc::now();
        let err = NewTask::new(Priority::Low, u64::MAX).build(now).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(NewTask::new(Priority::Low, i64::MAX as u64).build(now).is_ok());

        let mut task = NewTask::new(Priority::Low, 60).build(now).unwrap();
        task.estimated_render_seconds = u64::MAX;
        assert!(!task.is_render_complete(now + TimeDelta::days(365)));
    }

    #[test]
    fn render_completes_strictly_after_estimate() {
        let now = Utc::now();
        let mut task = NewTask::new(Priority::Low, 60).build(now).unwrap();
        assert!(!task.is_render_complete(now + TimeDelta::seconds(60)));
        assert!(task.is_render_complete(now + TimeDelta::seconds(61)));
        task.created_at = now - TimeDelta::minutes(65);
        assert!(task.is_render_complete(now));
    }

    #[test]
    fn timeout_failure_resets_retry_budget() {
        let now = Utc::now();
        let worker = WorkerId::new();
        let mut task = NewTask::new(Priority::High, 60).build(now).unwrap();
        task.retry_count = 1;
        task.assign_to(worker, now);
        task.fail_by_timeout(worker);
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.error_message.as_deref(), Some("Worker timeout"));
        assert!(task.assigned_worker_id.is_none());
        assert_eq!(task.last_worker_id, Some(worker));
    }

    #[test]
    fn task_transitions() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Rendering));
        assert!(Rendering.can_transition_to(Pending));
        assert!(Failed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Rendering));
        assert!(!Failed.can_transition_to(Rendering));
    }
}
