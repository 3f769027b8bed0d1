use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};

use crate::error::BackfillResult;
use crate::range::KeyRange;
use crate::task::BackfillTask;

const CREATE_SEQUENCE_NUMBERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS tx_sequence_numbers (
    tx_sequence_number BIGINT NOT NULL,
    checkpoint_sequence_number BIGINT NOT NULL,
    PRIMARY KEY (tx_sequence_number)
)
"#;

const UPSERT_SEQUENCE_NUMBERS: &str = r#"
WITH txs AS (
    SELECT tx_sequence_number, checkpoint_sequence_number
    FROM transactions
    WHERE tx_sequence_number BETWEEN $1 AND $2
)
INSERT INTO tx_sequence_numbers (tx_sequence_number, checkpoint_sequence_number)
SELECT tx_sequence_number, checkpoint_sequence_number
FROM txs
ON CONFLICT (tx_sequence_number) DO NOTHING
"#;

/// Populates the `tx_sequence_numbers` lookup table from `transactions`.
///
/// The lookup table maps every transaction sequence number to its checkpoint
/// and is the join source for the address backfills.
#[derive(Debug, Clone)]
pub struct SequenceNumberMapTask {
    pool: PgPool,
}

impl SequenceNumberMapTask {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the destination table if it does not exist yet.
    pub async fn prepare(pool: &PgPool) -> BackfillResult<()> {
        sqlx::query(CREATE_SEQUENCE_NUMBERS_TABLE)
            .execute(pool)
            .await?;

        Ok(())
    }
}

impl BackfillTask for SequenceNumberMapTask {
    type Session = PoolConnection<Postgres>;

    fn name(&self) -> &'static str {
        "sequence_numbers"
    }

    async fn open_session(&self) -> BackfillResult<Self::Session> {
        Ok(self.pool.acquire().await?)
    }

    async fn process_chunk(
        &self,
        session: &mut Self::Session,
        chunk: KeyRange,
    ) -> BackfillResult<u64> {
        let result = sqlx::query(UPSERT_SEQUENCE_NUMBERS)
            .bind(chunk.start())
            .bind(chunk.end())
            .execute(&mut **session)
            .await?;

        Ok(result.rows_affected())
    }
}
