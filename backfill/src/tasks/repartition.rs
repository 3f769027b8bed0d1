use sqlx::Row;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};

use crate::bail;
use crate::error::{BackfillResult, ErrorKind};
use crate::range::KeyRange;
use crate::task::BackfillTask;
use tracing::{debug, info};

/// Returns the 0-indexed partition table holding `key`.
pub fn partition_for_key(key: i64, partition_size: u64) -> i64 {
    key.div_euclid(partition_size as i64)
}

const TRANSACTION_COLUMNS: &str = r#"
    tx_sequence_number BIGINT NOT NULL,
    transaction_digest BYTEA NOT NULL,
    raw_transaction BYTEA NOT NULL,
    raw_effects BYTEA NOT NULL,
    checkpoint_sequence_number BIGINT NOT NULL,
    timestamp_ms BIGINT NOT NULL,
    object_changes BYTEA[] NOT NULL,
    balance_changes BYTEA[] NOT NULL,
    events BYTEA[] NOT NULL,
    transaction_kind SMALLINT NOT NULL,
    success_command_count SMALLINT NOT NULL
"#;

const SELECT_CHECKPOINT_BOUNDS: &str = r#"
SELECT MIN(checkpoint_sequence_number) AS min_cp, MAX(checkpoint_sequence_number) AS max_cp
FROM transactions
WHERE tx_sequence_number BETWEEN $1 AND $2
"#;

/// Copies `transactions` rows into the fixed-width partition tables
/// `transactions_v2_{p}` where `p = key / partition_size`.
///
/// Sub-ranges must be dispatched partition-aligned: a chunk spanning two
/// partition tables is rejected rather than split. Each insert is bounded by
/// the checkpoint range of the chunk so the planner can prune the source scan.
#[derive(Debug, Clone)]
pub struct RepartitionTask {
    pool: PgPool,
    partition_size: u64,
}

impl RepartitionTask {
    pub fn new(pool: PgPool, partition_size: u64) -> Self {
        Self {
            pool,
            partition_size,
        }
    }
}

impl BackfillTask for RepartitionTask {
    type Session = PoolConnection<Postgres>;

    fn name(&self) -> &'static str {
        "repartition"
    }

    async fn open_session(&self) -> BackfillResult<Self::Session> {
        Ok(self.pool.acquire().await?)
    }

    async fn process_chunk(
        &self,
        session: &mut Self::Session,
        chunk: KeyRange,
    ) -> BackfillResult<u64> {
        let partition = partition_for_key(chunk.start(), self.partition_size);
        if partition != partition_for_key(chunk.end(), self.partition_size) {
            bail!(
                ErrorKind::InvalidRange,
                "Chunk spans partition tables, dispatch must be partition-aligned",
                chunk
            );
        }

        let bounds = sqlx::query(SELECT_CHECKPOINT_BOUNDS)
            .bind(chunk.start())
            .bind(chunk.end())
            .fetch_one(&mut **session)
            .await?;
        let min_cp: Option<i64> = bounds.try_get("min_cp")?;
        let max_cp: Option<i64> = bounds.try_get("max_cp")?;

        let (Some(min_cp), Some(max_cp)) = (min_cp, max_cp) else {
            // No source rows in this chunk, nothing to copy.
            debug!(chunk = %chunk, "no source rows, skipping chunk");
            return Ok(0);
        };

        let statement = format!(
            r#"
            INSERT INTO transactions_v2_{partition}
            SELECT * FROM transactions
            WHERE tx_sequence_number BETWEEN $1 AND $2
              AND checkpoint_sequence_number BETWEEN $3 AND $4
            ON CONFLICT (tx_sequence_number) DO NOTHING
            "#
        );

        let result = sqlx::query(&statement)
            .bind(chunk.start())
            .bind(chunk.end())
            .bind(min_cp)
            .bind(max_cp)
            .execute(&mut **session)
            .await?;

        Ok(result.rows_affected())
    }
}

/// DDL and maintenance operations around the partition tables.
///
/// These run outside the chunked path, on the single admin connection.
#[derive(Debug, Clone)]
pub struct PartitionAdmin {
    pool: PgPool,
    partition_size: u64,
}

impl PartitionAdmin {
    pub fn new(pool: PgPool, partition_size: u64) -> Self {
        Self {
            pool,
            partition_size,
        }
    }

    /// Creates the partitioned main table and one detached table per
    /// partition.
    ///
    /// Partition tables carry their primary key from the start so the chunk
    /// upserts can rely on `ON CONFLICT`; they are attached to the main table
    /// only after the copy finishes.
    pub async fn create_tables(&self, partitions: i64) -> BackfillResult<()> {
        let main = format!(
            "CREATE TABLE IF NOT EXISTS transactions_v2 ({TRANSACTION_COLUMNS}) \
             PARTITION BY RANGE (tx_sequence_number)"
        );
        sqlx::query(&main).execute(&self.pool).await?;

        for partition in 0..partitions {
            let statement = format!(
                "CREATE TABLE IF NOT EXISTS transactions_v2_{partition} \
                 ({TRANSACTION_COLUMNS}, PRIMARY KEY (tx_sequence_number))"
            );
            sqlx::query(&statement).execute(&self.pool).await?;
        }

        info!(partitions, "partition tables ready");

        Ok(())
    }

    /// Toggles autovacuum on one partition table.
    ///
    /// Autovacuum is turned off for the bulk copy and back on before the
    /// partition is attached.
    pub async fn set_autovacuum(&self, partition: i64, enabled: bool) -> BackfillResult<()> {
        let statement = format!(
            "ALTER TABLE transactions_v2_{partition} SET (autovacuum_enabled = {enabled})"
        );
        sqlx::query(&statement).execute(&self.pool).await?;

        Ok(())
    }

    pub async fn vacuum_analyze(&self, partition: i64) -> BackfillResult<()> {
        let statement = format!("VACUUM ANALYZE transactions_v2_{partition}");
        sqlx::query(&statement).execute(&self.pool).await?;

        Ok(())
    }

    /// Adds the range check constraint that lets `ATTACH PARTITION` skip its
    /// full-table validation scan.
    pub async fn add_partition_check(&self, partition: i64) -> BackfillResult<()> {
        let (from, to) = self.partition_bounds(partition);
        let statement = format!(
            "ALTER TABLE transactions_v2_{partition} \
             ADD CONSTRAINT transactions_v2_{partition}_partition_check \
             CHECK (tx_sequence_number >= {from} AND tx_sequence_number < {to})"
        );
        sqlx::query(&statement).execute(&self.pool).await?;

        Ok(())
    }

    /// Attaches one partition table to the main table and drops the
    /// scaffolding check constraint.
    pub async fn attach_partition(&self, partition: i64) -> BackfillResult<()> {
        let (from, to) = self.partition_bounds(partition);
        let attach = format!(
            "ALTER TABLE transactions_v2 ATTACH PARTITION transactions_v2_{partition} \
             FOR VALUES FROM ({from}) TO ({to})"
        );
        sqlx::query(&attach).execute(&self.pool).await?;

        let drop_check = format!(
            "ALTER TABLE transactions_v2_{partition} \
             DROP CONSTRAINT transactions_v2_{partition}_partition_check"
        );
        sqlx::query(&drop_check).execute(&self.pool).await?;

        info!(partition, "partition attached");

        Ok(())
    }

    /// Runs the full post-copy sequence for one partition: autovacuum back
    /// on, vacuum analyze, check constraint, attach.
    pub async fn finalize_partition(&self, partition: i64) -> BackfillResult<()> {
        self.set_autovacuum(partition, true).await?;
        self.vacuum_analyze(partition).await?;
        self.add_partition_check(partition).await?;
        self.attach_partition(partition).await?;

        Ok(())
    }

    /// Drops the main table and every partition table.
    pub async fn drop_tables(&self, partitions: i64) -> BackfillResult<()> {
        sqlx::query("DROP TABLE IF EXISTS transactions_v2")
            .execute(&self.pool)
            .await?;

        for partition in 0..partitions {
            let statement = format!("DROP TABLE IF EXISTS transactions_v2_{partition}");
            sqlx::query(&statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    fn partition_bounds(&self, partition: i64) -> (i64, i64) {
        let width = self.partition_size as i64;
        (partition * width, (partition + 1) * width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::partition_aligned;

    #[test]
    fn partition_for_key_uses_fixed_width_stripes() {
        assert_eq!(partition_for_key(0, 10_000_000), 0);
        assert_eq!(partition_for_key(9_999_999, 10_000_000), 0);
        assert_eq!(partition_for_key(10_000_000, 10_000_000), 1);
        assert_eq!(partition_for_key(1_300_225_138, 10_000_000), 130);
    }

    #[test]
    fn aligned_sub_range_chunks_never_span_partitions() {
        let range = KeyRange::new(0, 34_999_999).unwrap();
        for sub_range in partition_aligned(range, 10_000_000) {
            for chunk in sub_range.chunks(10_000) {
                assert_eq!(
                    partition_for_key(chunk.start(), 10_000_000),
                    partition_for_key(chunk.end(), 10_000_000),
                );
            }
        }
    }
}
