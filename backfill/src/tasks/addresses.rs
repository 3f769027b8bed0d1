use std::str::FromStr;

use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};

use crate::backfill_error;
use crate::error::{BackfillResult, ErrorKind};
use crate::range::KeyRange;
use crate::task::BackfillTask;

/// Side of a transaction an address appears on.
///
/// The `rel` codes in `tx_addresses` are 0 for sender, 1 for recipient and 2
/// for an address that is both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressRel {
    Sender,
    Recipient,
}

impl AddressRel {
    /// Source table holding the addresses without checkpoint numbers.
    pub fn source_table(&self) -> &'static str {
        match self {
            Self::Sender => "tx_senders",
            Self::Recipient => "tx_recipients",
        }
    }

    /// Destination table extended with `checkpoint_sequence_number`.
    pub fn target_table(&self) -> &'static str {
        match self {
            Self::Sender => "tx_senders_cp",
            Self::Recipient => "tx_recipients_cp",
        }
    }

    /// Address column in the source table.
    pub fn address_column(&self) -> &'static str {
        match self {
            Self::Sender => "sender",
            Self::Recipient => "recipient",
        }
    }
}

impl FromStr for AddressRel {
    type Err = crate::error::BackfillError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sender" => Ok(Self::Sender),
            "recipient" => Ok(Self::Recipient),
            other => Err(backfill_error!(
                ErrorKind::ConfigError,
                "Unknown address relation, expected 'sender' or 'recipient'",
                other
            )),
        }
    }
}

/// Backfills `tx_senders_cp` or `tx_recipients_cp` by joining the plain
/// address table with `tx_sequence_numbers`.
#[derive(Debug, Clone)]
pub struct AddressCheckpointTask {
    pool: PgPool,
    rel: AddressRel,
    statement: String,
}

impl AddressCheckpointTask {
    pub fn new(pool: PgPool, rel: AddressRel) -> Self {
        let statement = format!(
            r#"
            WITH txs AS (
                SELECT tx_sequence_number, checkpoint_sequence_number
                FROM tx_sequence_numbers
                WHERE tx_sequence_number BETWEEN $1 AND $2
            ),
            partial AS (
                SELECT txs.tx_sequence_number, txs.checkpoint_sequence_number, {address}
                FROM {source}
                JOIN txs USING (tx_sequence_number)
            )
            INSERT INTO {target} (tx_sequence_number, checkpoint_sequence_number, address)
            SELECT tx_sequence_number, checkpoint_sequence_number, {address}
            FROM partial
            ON CONFLICT (address, tx_sequence_number, checkpoint_sequence_number) DO NOTHING
            "#,
            address = rel.address_column(),
            source = rel.source_table(),
            target = rel.target_table(),
        );

        Self {
            pool,
            rel,
            statement,
        }
    }
}

impl BackfillTask for AddressCheckpointTask {
    type Session = PoolConnection<Postgres>;

    fn name(&self) -> &'static str {
        match self.rel {
            AddressRel::Sender => "sender_checkpoints",
            AddressRel::Recipient => "recipient_checkpoints",
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

const MERGE_ADDRESSES: &str = r#"
WITH s AS (
    SELECT * FROM tx_senders_cp WHERE tx_sequence_number BETWEEN $1 AND $2
),
r AS (
    SELECT * FROM tx_recipients_cp WHERE tx_sequence_number BETWEEN $1 AND $2
)
INSERT INTO tx_addresses (tx_sequence_number, address, checkpoint_sequence_number, rel)
SELECT
    COALESCE(s.tx_sequence_number, r.tx_sequence_number) AS tx_sequence_number,
    COALESCE(s.address, r.address) AS address,
    COALESCE(s.checkpoint_sequence_number, r.checkpoint_sequence_number) AS checkpoint_sequence_number,
    CASE
        WHEN s.address IS NOT NULL AND r.address IS NULL THEN 0
        WHEN s.address IS NULL AND r.address IS NOT NULL THEN 1
        ELSE 2
    END AS rel
FROM s
FULL OUTER JOIN r
    ON s.tx_sequence_number = r.tx_sequence_number
    AND s.checkpoint_sequence_number = r.checkpoint_sequence_number
    AND s.address = r.address
ON CONFLICT (address, rel, tx_sequence_number, checkpoint_sequence_number) DO NOTHING
"#;

/// Merges `tx_senders_cp` and `tx_recipients_cp` into `tx_addresses`.
///
/// An address appearing on both sides of a transaction collapses into a
/// single row with rel 2.
#[derive(Debug, Clone)]
pub struct MergeAddressesTask {
    pool: PgPool,
}

impl MergeAddressesTask {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl BackfillTask for MergeAddressesTask {
    type Session = PoolConnection<Postgres>;

    fn name(&self) -> &'static str {
        "merge_addresses"
    }

    async fn open_session(&self) -> BackfillResult<Self::Session> {
        Ok(self.pool.acquire().await?)
    }

    async fn process_chunk(
        &self,
        session: &mut Self::Session,
        chunk: KeyRange,
    ) -> BackfillResult<u64> {
        let result = sqlx::query(MERGE_ADDRESSES)
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
    fn address_rel_parses_known_relations() {
        assert_eq!("sender".parse::<AddressRel>().unwrap(), AddressRel::Sender);
        assert_eq!(
            "recipient".parse::<AddressRel>().unwrap(),
            AddressRel::Recipient
        );
        assert!("both".parse::<AddressRel>().is_err());
    }

    #[test]
    fn checkpoint_statement_targets_the_relation_tables() {
        let sender = AddressRel::Sender;
        assert_eq!(sender.source_table(), "tx_senders");
        assert_eq!(sender.target_table(), "tx_senders_cp");
        assert_eq!(sender.address_column(), "sender");

        let recipient = AddressRel::Recipient;
        assert_eq!(recipient.source_table(), "tx_recipients");
        assert_eq!(recipient.target_table(), "tx_recipients_cp");
        assert_eq!(recipient.address_column(), "recipient");
    }
}
