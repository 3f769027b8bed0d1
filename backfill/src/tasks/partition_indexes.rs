use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::Semaphore;
use tracing::info;

use crate::backfill_error;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{BackfillResult, ErrorKind};
use crate::workers::pool::WorkerPool;
use crate::workers::range::WorkerId;

/// Builds one index across the `objects_history` partition hierarchy.
///
/// Postgres cannot create a partitioned index concurrently in one statement,
/// so the build runs bottom-up: one index per partition table in parallel,
/// then the parent index `ON ONLY` the partitioned table, then one `ATTACH
/// PARTITION` per child index. Every statement is `IF NOT EXISTS` or
/// attach-idempotent, so the build can be re-run after an interruption.
#[derive(Debug, Clone)]
pub struct PartitionIndexBuilder {
    pool: PgPool,
    index_name: String,
    definition: String,
}

impl PartitionIndexBuilder {
    /// `definition` is the column list and optional predicate, e.g.
    /// `(checkpoint_sequence_number, object_id) WHERE coin_type IS NOT NULL`.
    pub fn new(pool: PgPool, index_name: String, definition: String) -> Self {
        Self {
            pool,
            index_name,
            definition,
        }
    }

    /// Creates the index on one partition table.
    pub async fn create_partition_index(&self, partition: i64) -> BackfillResult<()> {
        let statement = format!(
            "CREATE INDEX IF NOT EXISTS {name}_{partition} \
             ON objects_history_partition_{partition} {definition}",
            name = self.index_name,
            definition = self.definition,
        );
        sqlx::query(&statement).execute(&self.pool).await?;

        info!(partition, index = %self.index_name, "partition index created");

        Ok(())
    }

    /// Creates the parent index on the partitioned table without recursing
    /// into the partitions.
    pub async fn create_parent_index(&self) -> BackfillResult<()> {
        let statement = format!(
            "CREATE INDEX IF NOT EXISTS {name} ON ONLY objects_history {definition}",
            name = self.index_name,
            definition = self.definition,
        );
        sqlx::query(&statement).execute(&self.pool).await?;

        Ok(())
    }

    /// Attaches the partition indexes of `first..=last` to the parent index.
    pub async fn attach_partition_indexes(&self, first: i64, last: i64) -> BackfillResult<()> {
        for partition in first..=last {
            let statement = format!(
                "ALTER INDEX {name} ATTACH PARTITION {name}_{partition}",
                name = self.index_name,
            );
            sqlx::query(&statement).execute(&self.pool).await?;

            info!(partition, index = %self.index_name, "partition index attached");
        }

        Ok(())
    }

    /// Runs the whole build for partitions `first..=last`, creating the
    /// per-partition indexes concurrently across `max_workers` connections.
    ///
    /// Shutdown is observed between partitions: index builds already running
    /// complete, no new ones start, and the parent index is not created. A
    /// later run picks up where this one stopped.
    pub async fn build(
        &self,
        first: i64,
        last: i64,
        max_workers: u16,
        shutdown_rx: ShutdownRx,
    ) -> BackfillResult<()> {
        let pool = WorkerPool::new();
        let permits = Arc::new(Semaphore::new(max_workers as usize));

        for partition in first..=last {
            let worker_id = (partition - first).min(WorkerId::MAX as i64) as WorkerId;
            let builder = self.clone();
            let permits = permits.clone();
            let shutdown_rx = shutdown_rx.clone();

            pool.spawn(worker_id, async move {
                let _permit = permits.acquire_owned().await.map_err(|_| {
                    backfill_error!(ErrorKind::Unknown, "Worker permits semaphore closed")
                })?;

                if shutdown_rx.is_shutdown() {
                    return Ok(());
                }

                builder.create_partition_index(partition).await
            })
            .await;
        }

        pool.wait_all().await?;

        if shutdown_rx.is_shutdown() {
            info!(index = %self.index_name, "shutdown observed, skipping index attachment");
            return Ok(());
        }

        self.create_parent_index().await?;
        self.attach_partition_indexes(first, last).await?;

        Ok(())
    }
}
