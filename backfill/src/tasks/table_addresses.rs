use std::str::FromStr;

use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};

use crate::backfill_error;
use crate::error::{BackfillResult, ErrorKind};
use crate::range::KeyRange;
use crate::task::BackfillTask;

/// A per-transaction side table that gets denormalized address columns.
///
/// Each side table keys its rows on the transaction sequence number plus a
/// table-specific tuple; the backfill joins it with `tx_addresses` to produce
/// a `{table}_cp` variant carrying the address, its relation code and the
/// checkpoint sequence number alongside that tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableAddressKind {
    Calls,
    ChangedObjects,
    InputObjects,
}

impl TableAddressKind {
    /// Source table holding the rows without address columns.
    pub fn source_table(&self) -> &'static str {
        match self {
            Self::Calls => "tx_calls",
            Self::ChangedObjects => "tx_changed_objects",
            Self::InputObjects => "tx_input_objects",
        }
    }

    /// Destination table extended with the address columns.
    pub fn target_table(&self) -> &'static str {
        match self {
            Self::Calls => "tx_calls_cp",
            Self::ChangedObjects => "tx_changed_objects_cp",
            Self::InputObjects => "tx_input_objects_cp",
        }
    }

    /// Table-specific columns carried from the source into the destination.
    pub fn key_columns(&self) -> &'static [&'static str] {
        match self {
            Self::Calls => &["package", "module", "func"],
            Self::ChangedObjects | Self::InputObjects => &["object_id"],
        }
    }
}

impl FromStr for TableAddressKind {
    type Err = crate::error::BackfillError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "tx_calls" => Ok(Self::Calls),
            "tx_changed_objects" => Ok(Self::ChangedObjects),
            "tx_input_objects" => Ok(Self::InputObjects),
            other => Err(backfill_error!(
                ErrorKind::ConfigError,
                "Unknown side table, expected 'tx_calls', 'tx_changed_objects' or 'tx_input_objects'",
                other
            )),
        }
    }
}

/// Backfills a `{table}_cp` side table by joining the plain side table with
/// the merged `tx_addresses` table.
///
/// One source row fans out to one destination row per address of its
/// transaction, so the destination can answer address-filtered queries
/// without a join at read time.
#[derive(Debug, Clone)]
pub struct TableAddressTask {
    pool: PgPool,
    kind: TableAddressKind,
    statement: String,
}

impl TableAddressTask {
    pub fn new(pool: PgPool, kind: TableAddressKind) -> Self {
        let key_columns = kind.key_columns().join(", ");
        let statement = format!(
            r#"
            WITH txs AS (
                SELECT tx_sequence_number, address, rel, checkpoint_sequence_number
                FROM tx_addresses
                WHERE tx_sequence_number BETWEEN $1 AND $2
            ),
            partial AS (
                SELECT {key_columns}, txs.address, txs.rel,
                       txs.tx_sequence_number, txs.checkpoint_sequence_number
                FROM {source}
                JOIN txs USING (tx_sequence_number)
            )
            INSERT INTO {target} ({key_columns}, address, rel, tx_sequence_number, checkpoint_sequence_number)
            SELECT {key_columns}, address, rel, tx_sequence_number, checkpoint_sequence_number
            FROM partial
            ON CONFLICT ({key_columns}, address, tx_sequence_number) DO NOTHING
            "#,
            source = kind.source_table(),
            target = kind.target_table(),
        );

        Self {
            pool,
            kind,
            statement,
        }
    }
}

impl BackfillTask for TableAddressTask {
    type Session = PoolConnection<Postgres>;

    fn name(&self) -> &'static str {
        match self.kind {
            TableAddressKind::Calls => "call_addresses",
            TableAddressKind::ChangedObjects => "changed_object_addresses",
            TableAddressKind::InputObjects => "input_object_addresses",
        }
    }

    async fn open_session(&self) -> BackfillResult<Self::Session> {
        Ok(self.pool.acquire().await?)
    }

    async fn process_chunk(
        &self,
        session: &mut Self::Session,
        chunk: KeyRange,
    ) -> BackfillResult<u64> {
        let result = sqlx::query(&self.statement)
            .bind(chunk.start())
            .bind(chunk.end())
            .execute(&mut **session)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_known_side_tables() {
        assert_eq!(
            "tx_calls".parse::<TableAddressKind>().unwrap(),
            TableAddressKind::Calls
        );
        assert_eq!(
            "tx_changed_objects".parse::<TableAddressKind>().unwrap(),
            TableAddressKind::ChangedObjects
        );
        assert_eq!(
            "tx_input_objects".parse::<TableAddressKind>().unwrap(),
            TableAddressKind::InputObjects
        );
        assert!("tx_addresses".parse::<TableAddressKind>().is_err());
    }

    #[test]
    fn kind_maps_tables_and_key_columns() {
        let calls = TableAddressKind::Calls;
        assert_eq!(calls.source_table(), "tx_calls");
        assert_eq!(calls.target_table(), "tx_calls_cp");
        assert_eq!(calls.key_columns(), &["package", "module", "func"]);

        let objects = TableAddressKind::InputObjects;
        assert_eq!(objects.source_table(), "tx_input_objects");
        assert_eq!(objects.target_table(), "tx_input_objects_cp");
        assert_eq!(objects.key_columns(), &["object_id"]);
    }

    #[tokio::test]
    async fn statement_upserts_on_the_destination_key() {
        let pool = PgPool::connect_lazy("postgres://localhost/ignored").unwrap();
        let task = TableAddressTask::new(pool, TableAddressKind::Calls);

        assert!(task.statement.contains("INSERT INTO tx_calls_cp"));
        assert!(task.statement.contains(
            "ON CONFLICT (package, module, func, address, tx_sequence_number) DO NOTHING"
        ));
    }
}
