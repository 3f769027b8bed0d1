//! Connections to the source Postgres database.

use backfill_config::shared::{
    BACKFILL_ADMIN_OPTIONS, BACKFILL_CHUNK_OPTIONS, PgConnectionConfig,
};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::debug;

use crate::error::BackfillResult;

/// Connects the pool used by chunk workers.
///
/// The pool is sized exactly to the worker count: every worker checks out one
/// connection for the lifetime of its sub-range, so a bigger pool would only
/// hold idle connections and a smaller one would deadlock the workers.
pub async fn connect_chunk_pool(
    config: &PgConnectionConfig,
    workers: u16,
) -> BackfillResult<PgPool> {
    let options = config.with_db(&BACKFILL_CHUNK_OPTIONS);

    let pool = PgPoolOptions::new()
        .max_connections(workers as u32)
        .min_connections(workers as u32)
        .connect_with(options)
        .await?;

    debug!(workers, "chunk worker pool connected");

    Ok(pool)
}

/// Connects a single-connection pool for DDL and maintenance statements.
pub async fn connect_admin_pool(config: &PgConnectionConfig) -> BackfillResult<PgPool> {
    let options = config.with_db(&BACKFILL_ADMIN_OPTIONS);

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    debug!("admin pool connected");

    Ok(pool)
}

/// Returns the maximum value of `column` in `table`, or `None` when empty.
///
/// `table` and `column` must be trusted identifiers, they are interpolated
/// into the statement.
pub async fn max_key(pool: &PgPool, table: &str, column: &str) -> BackfillResult<Option<i64>> {
    let statement = format!("SELECT MAX({column}) AS max_key FROM {table}");
    let row = sqlx::query(&statement).fetch_one(pool).await?;

    Ok(row.try_get("max_key")?)
}

/// Default upper bound of a backfill over `table`, taken from its highest
/// transaction sequence number.
pub async fn max_sequence_number(pool: &PgPool, table: &str) -> BackfillResult<Option<i64>> {
    max_key(pool, table, "tx_sequence_number").await
}
