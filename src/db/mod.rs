use std::time::Duration;

use anyhow::Context;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::errors::AppResult;

pub mod scope;
pub mod sessions;
pub mod users;

pub async fn init() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&database_url)
        .await
        .context("failed to connect to database")?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    Ok(pool)
}

/// Opens a transaction that already holds the database write lock.
///
/// SQLite returns `SQLITE_BUSY` without waiting when a transaction that has read tries to
/// upgrade to a write lock another connection holds. Writing first keeps every write
/// transaction on the busy-timeout path.
pub async fn begin_write(pool: &SqlitePool) -> AppResult<Transaction<'static, Sqlite>> {
    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE write_guard SET generation = generation + 1 WHERE id = 1")
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}
