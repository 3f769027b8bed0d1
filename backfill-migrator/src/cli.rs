use clap::{Parser, Subcommand};

/// Chunked, resumable backfills for the transaction-indexing store.
#[derive(Debug, Parser)]
#[command(name = "backfill-migrator", version, about)]
pub struct Cli {
    /// First key of the backfill range.
    #[arg(long, global = true)]
    pub start: Option<i64>,

    /// Last key of the backfill range.
    ///
    /// Defaults to the highest key in the source table.
    #[arg(long, global = true)]
    pub end: Option<i64>,

    /// Resume from the checkpoints of a previous run instead of dispatching a
    /// fresh range.
    #[arg(long, global = true)]
    pub resume: bool,

    /// Override the configured job id.
    #[arg(long, global = true)]
    pub job_id: Option<u64>,

    /// Override the configured chunk size.
    #[arg(long, global = true)]
    pub chunk_size: Option<u64>,

    /// Override the configured number of concurrent workers.
    #[arg(long, global = true)]
    pub workers: Option<u16>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Populate the tx_sequence_numbers lookup table from transactions.
    SequenceNumbers,

    /// Backfill tx_senders_cp or tx_recipients_cp with checkpoint numbers.
    AddressCheckpoints {
        /// Which address relation to backfill: sender or recipient.
        #[arg(long, default_value = "sender")]
        rel: String,
    },

    /// Merge tx_senders_cp and tx_recipients_cp into tx_addresses.
    MergeAddresses,

    /// Backfill a side table's _cp variant with the addresses of its
    /// transactions.
    TableAddresses {
        /// Which side table to backfill: tx_calls, tx_changed_objects or
        /// tx_input_objects.
        #[arg(long)]
        table: String,
    },

    /// Copy transactions into the fixed-width partition tables.
    Repartition {
        /// Drop and recreate the partition tables before copying.
        #[arg(long)]
        reset: bool,
    },

    /// Attach the copied partition tables to transactions_v2.
    FinalizePartitions {
        /// First partition to finalize.
        #[arg(long)]
        first: i64,

        /// Last partition to finalize, inclusive.
        #[arg(long)]
        last: i64,
    },

    /// Build an index across the objects_history partitions.
    BuildPartitionIndexes {
        /// Name of the index to create.
        #[arg(long)]
        index_name: String,

        /// Column list and optional predicate of the index.
        #[arg(long)]
        index_definition: String,

        /// First partition to index.
        #[arg(long)]
        first: i64,

        /// Last partition to index, inclusive.
        #[arg(long)]
        last: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_overrides_after_the_subcommand() {
        let cli = Cli::parse_from([
            "backfill-migrator",
            "sequence-numbers",
            "--start",
            "0",
            "--end",
            "999",
            "--workers",
            "8",
        ]);

        assert!(matches!(cli.command, Command::SequenceNumbers));
        assert_eq!(cli.start, Some(0));
        assert_eq!(cli.end, Some(999));
        assert_eq!(cli.workers, Some(8));
        assert!(!cli.resume);
    }

    #[test]
    fn parses_the_table_addresses_command() {
        let cli = Cli::parse_from([
            "backfill-migrator",
            "table-addresses",
            "--table",
            "tx_calls",
        ]);

        let Command::TableAddresses { table } = cli.command else {
            panic!("expected the table-addresses command");
        };
        assert_eq!(table, "tx_calls");
    }

    #[test]
    fn parses_the_index_build_command() {
        let cli = Cli::parse_from([
            "backfill-migrator",
            "build-partition-indexes",
            "--index-name",
            "objects_history_coin_owner",
            "--index-definition",
            "(checkpoint_sequence_number, owner_id) WHERE coin_type IS NOT NULL",
            "--first",
            "0",
            "--last",
            "399",
        ]);

        let Command::BuildPartitionIndexes {
            index_name,
            first,
            last,
            ..
        } = cli.command
        else {
            panic!("expected the build-partition-indexes command");
        };
        assert_eq!(index_name, "objects_history_coin_owner");
        assert_eq!(first, 0);
        assert_eq!(last, 399);
    }
}
