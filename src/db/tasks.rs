//! Task rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Priority, Task, TaskId, TaskStatus, WorkerId};
use crate::store::{TaskStore, task_conflict};

const COLUMNS: &str = "id, priority, priority_rank, estimated_render_seconds, file_path, status, \
     retry_count, assigned_worker_id, last_worker_id, error_message, created_at, started_at, completed_at";

#[async_trait]
impl TaskStore for super::Db {
    async fn insert_task(&self, task: &Task) -> Result<()> {
        sqlx::query(
            "INSERT INTO tasks (id, priority, priority_rank, estimated_render_seconds, file_path, status,
                                retry_count, assigned_worker_id, last_worker_id, error_message,
                                created_at, started_at, completed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(task.id.0)
        .bind(task.priority.to_string())
        .bind(task.priority_rank)
        .bind(task.estimated_render_seconds as i64)
        .bind(&task.file_path)
        .bind(task.status.to_string())
        .bind(task.retry_count as i32)
        .bind(task.assigned_worker_id.map(|w| w.0))
        .bind(task.last_worker_id.map(|w| w.0))
        .bind(&task.error_message)
        .bind(task.created_at)
        .bind(task.started_at)
        .bind(task.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        let mut conn = self.pool.acquire().await?;
        fetch(&mut conn, id).await
    }

    async fn list_tasks(&self) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM tasks ORDER BY seq"))
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TaskRow::try_into_task).collect()
    }

    async fn tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM tasks WHERE status = $1 ORDER BY seq"
        ))
        .bind(status.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TaskRow::try_into_task).collect()
    }

    async fn tasks_by_status_and_priority(
        &self,
        status: TaskStatus,
        priority: Priority,
    ) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM tasks WHERE status = $1 AND priority = $2 ORDER BY seq"
        ))
        .bind(status.to_string())
        .bind(priority.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TaskRow::try_into_task).collect()
    }

    async fn update_task(&self, task: &Task, expected: TaskStatus) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        update(&mut conn, task, expected).await
    }

    async fn set_task_error(&self, id: TaskId, message: &str) -> Result<Task> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "UPDATE tasks SET error_message = $1 WHERE id = $2 RETURNING {COLUMNS}"
        ))
        .bind(message)
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| Error::NotFound(format!("task {id}")))?
            .try_into_task()
    }
}

async fn fetch(conn: &mut PgConnection, id: TaskId) -> Result<Option<Task>> {
    let row: Option<TaskRow> =
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM tasks WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&mut *conn)
            .await?;
    row.map(TaskRow::try_into_task).transpose()
}

/// Overwrite the mutable columns of a task whose status is still `expected`.
pub(super) async fn update(
    conn: &mut PgConnection,
    task: &Task,
    expected: TaskStatus,
) -> Result<()> {
    let rows_affected = sqlx::query(
        "UPDATE tasks SET status = $1, retry_count = $2, assigned_worker_id = $3, last_worker_id = $4,
                          error_message = $5, started_at = $6, completed_at = $7
         WHERE id = $8 AND status = $9",
    )
    .bind(task.status.to_string())
    .bind(task.retry_count as i32)
    .bind(task.assigned_worker_id.map(|w| w.0))
    .bind(task.last_worker_id.map(|w| w.0))
    .bind(&task.error_message)
    .bind(task.started_at)
    .bind(task.completed_at)
    .bind(task.id.0)
    .bind(expected.to_string())
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if rows_affected == 0 {
        return match fetch(conn, task.id).await? {
            Some(current) => Err(task_conflict(task.id, expected, current.status)),
            None => Err(Error::NotFound(format!("task {}", task.id))),
        };
    }
    Ok(())
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    priority: String,
    priority_rank: i32,
    estimated_render_seconds: i64,
    file_path: Option<String>,
    status: String,
    retry_count: i32,
    assigned_worker_id: Option<Uuid>,
    last_worker_id: Option<Uuid>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TaskRow {
    fn try_into_task(self) -> Result<Task> {
        Ok(Task {
            id: TaskId(self.id),
            priority: self.priority.parse()?,
            priority_rank: self.priority_rank,
            estimated_render_seconds: self.estimated_render_seconds as u64,
            file_path: self.file_path,
            status: self.status.parse()?,
            retry_count: self.retry_count as u32,
            assigned_worker_id: self.assigned_worker_id.map(WorkerId),
            last_worker_id: self.last_worker_id.map(WorkerId),
            error_message: self.error_message,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}
