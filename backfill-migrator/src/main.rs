//! Backfill migrator binary.
//!
//! Runs chunked, resumable backfills against the transaction-indexing store:
//! lookup-table population, address merges, table repartitioning and
//! partition index builds. Jobs checkpoint their progress per sub-range and
//! shut down cleanly on SIGINT/SIGTERM.

use clap::Parser;

use crate::cli::Cli;
use crate::config::load_migrator_config;
use crate::core::run_migration;
use crate::error::MigratorResult;

use backfill_telemetry::tracing::init_tracing;

mod cli;
mod config;
mod core;
mod error;

fn main() -> MigratorResult<()> {
    let cli = Cli::parse();

    let config = load_migrator_config()?;

    init_tracing(env!("CARGO_BIN_NAME"))?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run_migration(cli, config))?;

    Ok(())
}
