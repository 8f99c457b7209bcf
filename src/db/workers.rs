//! Worker rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{TaskId, Worker, WorkerId, WorkerStatus};
use crate::store::{WorkerStore, worker_conflict};

#[async_trait]
impl WorkerStore for super::Db {
    async fn insert_worker(&self, worker: &Worker) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert(&mut conn, worker).await
    }

    async fn get_worker(&self, id: WorkerId) -> Result<Option<Worker>> {
        let mut conn = self.pool.acquire().await?;
        fetch(&mut conn, id).await
    }

    async fn list_workers(&self) -> Result<Vec<Worker>> {
        let rows: Vec<WorkerRow> = sqlx::query_as(
            "SELECT id, status, last_heartbeat, current_task_id FROM workers ORDER BY seq",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(WorkerRow::try_into_worker).collect()
    }

    async fn workers_by_status(&self, status: WorkerStatus) -> Result<Vec<Worker>> {
        let rows: Vec<WorkerRow> = sqlx::query_as(
            "SELECT id, status, last_heartbeat, current_task_id FROM workers
             WHERE status = $1 ORDER BY seq",
        )
        .bind(status.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(WorkerRow::try_into_worker).collect()
    }

    async fn update_worker(&self, worker: &Worker, expected: WorkerStatus) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        update(&mut conn, worker, expected).await
    }

    async fn touch_worker(&self, id: WorkerId, at: DateTime<Utc>) -> Result<Worker> {
        let row: Option<WorkerRow> = sqlx::query_as(
            "UPDATE workers SET last_heartbeat = $1 WHERE id = $2
             RETURNING id, status, last_heartbeat, current_task_id",
        )
        .bind(at)
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| Error::NotFound(format!("worker {id}")))?
            .try_into_worker()
    }
}

pub(super) async fn insert(conn: &mut PgConnection, worker: &Worker) -> Result<()> {
    sqlx::query(
        "INSERT INTO workers (id, status, last_heartbeat, current_task_id) VALUES ($1, $2, $3, $4)",
    )
    .bind(worker.id.0)
    .bind(worker.status.to_string())
    .bind(worker.last_heartbeat)
    .bind(worker.current_task_id.map(|t| t.0))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn fetch(conn: &mut PgConnection, id: WorkerId) -> Result<Option<Worker>> {
    let row: Option<WorkerRow> = sqlx::query_as(
        "SELECT id, status, last_heartbeat, current_task_id FROM workers WHERE id = $1",
    )
    .bind(id.0)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(WorkerRow::try_into_worker).transpose()
}

/// Overwrite a worker whose status is still `expected`.
pub(super) async fn update(
    conn: &mut PgConnection,
    worker: &Worker,
    expected: WorkerStatus,
) -> Result<()> {
    let rows_affected = sqlx::query(
        "UPDATE workers SET status = $1, last_heartbeat = $2, current_task_id = $3
         WHERE id = $4 AND status = $5",
    )
    .bind(worker.status.to_string())
    .bind(worker.last_heartbeat)
    .bind(worker.current_task_id.map(|t| t.0))
    .bind(worker.id.0)
    .bind(expected.to_string())
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if rows_affected == 0 {
        return match fetch(conn, worker.id).await? {
            Some(current) => Err(worker_conflict(worker.id, expected, current.status)),
            None => Err(Error::NotFound(format!("worker {}", worker.id))),
        };
    }
    Ok(())
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct WorkerRow {
    id: Uuid,
    status: String,
    last_heartbeat: DateTime<Utc>,
    current_task_id: Option<Uuid>,
}

impl WorkerRow {
    fn try_into_worker(self) -> Result<Worker> {
        Ok(Worker {
            id: WorkerId(self.id),
            status: self.status.parse()?,
            last_heartbeat: self.last_heartbeat,
            current_task_id: self.current_task_id.map(TaskId),
        })
    }
}
