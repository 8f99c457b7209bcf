//! Postgres-backed store: connection pool, migrations, health check.
//!
//! Task and worker queries live in the submodules; each takes a
//! `&mut PgConnection` so the same statement runs standalone or inside the
//! transaction of a [`Batch`] commit.

mod tasks;
mod workers;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::error::{Error, Result};
use crate::store::{Batch, Store, Write};

/// Database handle. Owns the connection pool.
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for Db {
    async fn commit(&self, batch: Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for write in batch.into_writes() {
            match write {
                Write::InsertWorker(worker) => workers::insert(&mut *tx, &worker).await?,
                Write::UpdateTask { task, expected } => {
                    tasks::update(&mut *tx, &task, expected).await?
                }
                Write::UpdateWorker { worker, expected } => {
                    workers::update(&mut *tx, &worker, expected).await?
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }
}
