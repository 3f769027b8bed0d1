use std::collections::BTreeMap;

use backfill_config::shared::{BACKFILL_CHECKPOINT_OPTIONS, PgConnectionConfig};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::debug;

use crate::backfill_error;
use crate::checkpoint::base::{CheckpointStore, RangeState};
use crate::error::{BackfillResult, ErrorKind};
use crate::job::JobId;
use crate::range::KeyRange;

/// Number of connections held by the checkpoint pool.
///
/// Checkpoint writes are tiny single-row upserts, one connection is enough
/// and keeps the connection budget for the chunk workers.
const NUM_POOL_CONNECTIONS: u32 = 1;

const CREATE_CHECKPOINTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS backfill_range_checkpoints (
    job_id BIGINT NOT NULL,
    range_start BIGINT NOT NULL,
    range_end BIGINT NOT NULL,
    state TEXT NOT NULL,
    next_key BIGINT,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (job_id, range_start, range_end)
)
"#;

const UPSERT_CHECKPOINT: &str = r#"
INSERT INTO backfill_range_checkpoints (job_id, range_start, range_end, state, next_key)
VALUES ($1, $2, $3, $4, $5)
ON CONFLICT (job_id, range_start, range_end)
DO UPDATE SET state = EXCLUDED.state, next_key = EXCLUDED.next_key, updated_at = now()
"#;

const SELECT_CHECKPOINTS: &str = r#"
SELECT range_start, range_end, state, next_key
FROM backfill_range_checkpoints
WHERE job_id = $1
"#;

const DELETE_CHECKPOINTS: &str = r#"
DELETE FROM backfill_range_checkpoints WHERE job_id = $1
"#;

const STATE_PENDING: &str = "pending";
const STATE_IN_PROGRESS: &str = "in_progress";
const STATE_COMPLETED: &str = "completed";
const STATE_FAILED: &str = "failed";

/// Converts a job id to the BIGINT the checkpoint table stores.
///
/// Config validation already rejects ids beyond `i64::MAX`, but the store
/// checks again instead of wrapping silently with `as`.
fn job_id_param(job_id: JobId) -> BackfillResult<i64> {
    i64::try_from(job_id).map_err(|_| {
        backfill_error!(
            ErrorKind::CheckpointStoreFailed,
            "Job id does not fit in a BIGINT checkpoint column",
            job_id
        )
    })
}

fn encode_state(state: RangeState) -> (&'static str, Option<i64>) {
    match state {
        RangeState::Pending => (STATE_PENDING, None),
        RangeState::InProgress { next_key } => (STATE_IN_PROGRESS, Some(next_key)),
        RangeState::Completed => (STATE_COMPLETED, None),
        RangeState::Failed { next_key } => (STATE_FAILED, Some(next_key)),
    }
}

fn decode_state(state: &str, next_key: Option<i64>) -> BackfillResult<RangeState> {
    match (state, next_key) {
        (STATE_PENDING, _) => Ok(RangeState::Pending),
        (STATE_COMPLETED, _) => Ok(RangeState::Completed),
        (STATE_IN_PROGRESS, Some(next_key)) => Ok(RangeState::InProgress { next_key }),
        (STATE_FAILED, Some(next_key)) => Ok(RangeState::Failed { next_key }),
        (STATE_IN_PROGRESS, None) | (STATE_FAILED, None) => Err(backfill_error!(
            ErrorKind::CheckpointStoreFailed,
            "Checkpoint record is missing its next_key",
            state
        )),
        (other, _) => Err(backfill_error!(
            ErrorKind::CheckpointStoreFailed,
            "Checkpoint record holds an unknown state",
            other
        )),
    }
}

/// Checkpoint store persisting range records in the source Postgres database.
///
/// Records live in the `backfill_range_checkpoints` table, created on first
/// connect. All writes are primary-key upserts, so re-writing a checkpoint
/// after a re-executed chunk is a no-op.
#[derive(Debug, Clone)]
pub struct PostgresCheckpointStore {
    pool: PgPool,
}

impl PostgresCheckpointStore {
    /// Connects to the database and ensures the checkpoints table exists.
    pub async fn connect(config: &PgConnectionConfig) -> BackfillResult<Self> {
        let options = config.with_db(&BACKFILL_CHECKPOINT_OPTIONS);

        let pool = PgPoolOptions::new()
            .max_connections(NUM_POOL_CONNECTIONS)
            .min_connections(NUM_POOL_CONNECTIONS)
            .connect_with(options)
            .await?;

        sqlx::query(CREATE_CHECKPOINTS_TABLE).execute(&pool).await?;

        debug!("postgres checkpoint store ready");

        Ok(Self { pool })
    }
}

impl CheckpointStore for PostgresCheckpointStore {
    async fn load_range_states(
        &self,
        job_id: JobId,
    ) -> BackfillResult<BTreeMap<KeyRange, RangeState>> {
        let rows = sqlx::query(SELECT_CHECKPOINTS)
            .bind(job_id_param(job_id)?)
            .fetch_all(&self.pool)
            .await?;

        let mut states = BTreeMap::new();
        for row in rows {
            let range_start: i64 = row.try_get("range_start")?;
            let range_end: i64 = row.try_get("range_end")?;
            let state: String = row.try_get("state")?;
            let next_key: Option<i64> = row.try_get("next_key")?;

            let range = KeyRange::new(range_start, range_end)?;
            states.insert(range, decode_state(&state, next_key)?);
        }

        Ok(states)
    }

    async fn update_range_state(
        &self,
        job_id: JobId,
        range: KeyRange,
        state: RangeState,
    ) -> BackfillResult<()> {
        let (state, next_key) = encode_state(state);

        sqlx::query(UPSERT_CHECKPOINT)
            .bind(job_id_param(job_id)?)
            .bind(range.start())
            .bind(range.end())
            .bind(state)
            .bind(next_key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn clear_job(&self, job_id: JobId) -> BackfillResult<()> {
        sqlx::query(DELETE_CHECKPOINTS)
            .bind(job_id_param(job_id)?)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
