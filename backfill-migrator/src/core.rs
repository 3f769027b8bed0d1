use anyhow::Context;
use backfill::checkpoint::{CheckpointStore, PostgresCheckpointStore};
use backfill::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use backfill::job::{BackfillJob, DispatchPlan};
use backfill::range::KeyRange;
use backfill::source::{connect_admin_pool, connect_chunk_pool, max_sequence_number};
use backfill::task::BackfillTask;
use backfill::tasks::addresses::{AddressCheckpointTask, AddressRel, MergeAddressesTask};
use backfill::tasks::partition_indexes::PartitionIndexBuilder;
use backfill::tasks::repartition::{PartitionAdmin, RepartitionTask, partition_for_key};
use backfill::tasks::sequence_numbers::SequenceNumberMapTask;
use backfill::tasks::table_addresses::{TableAddressKind, TableAddressTask};
use backfill_config::shared::{BackfillJobConfig, MigratorConfig};
use sqlx::PgPool;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cli::{Cli, Command};

/// Runs the selected migration with the provided configuration.
pub async fn run_migration(cli: Cli, config: MigratorConfig) -> anyhow::Result<()> {
    info!("starting backfill migrator");

    log_config(&config);

    let job_config = effective_job_config(&cli, &config.job);

    match &cli.command {
        Command::SequenceNumbers => {
            let pool = connect_chunk_pool(&config.pg_connection, job_config.max_workers).await?;
            SequenceNumberMapTask::prepare(&pool).await?;

            let plan = resolve_plan(&cli, &pool, None).await?;
            let store = PostgresCheckpointStore::connect(&config.pg_connection).await?;
            let task = SequenceNumberMapTask::new(pool.clone());

            run_job(BackfillJob::new(job_config, store, task), plan).await?;
        }
        Command::AddressCheckpoints { rel } => {
            let rel: AddressRel = rel.parse()?;
            let pool = connect_chunk_pool(&config.pg_connection, job_config.max_workers).await?;

            let plan = resolve_plan(&cli, &pool, None).await?;
            let store = PostgresCheckpointStore::connect(&config.pg_connection).await?;
            let task = AddressCheckpointTask::new(pool.clone(), rel);

            run_job(BackfillJob::new(job_config, store, task), plan).await?;
        }
        Command::MergeAddresses => {
            let pool = connect_chunk_pool(&config.pg_connection, job_config.max_workers).await?;

            let plan = resolve_plan(&cli, &pool, None).await?;
            let store = PostgresCheckpointStore::connect(&config.pg_connection).await?;
            let task = MergeAddressesTask::new(pool.clone());

            run_job(BackfillJob::new(job_config, store, task), plan).await?;
        }
        Command::TableAddresses { table } => {
            let kind: TableAddressKind = table.parse()?;
            let pool = connect_chunk_pool(&config.pg_connection, job_config.max_workers).await?;

            let plan = resolve_plan(&cli, &pool, None).await?;
            let store = PostgresCheckpointStore::connect(&config.pg_connection).await?;
            let task = TableAddressTask::new(pool.clone(), kind);

            run_job(BackfillJob::new(job_config, store, task), plan).await?;
        }
        Command::Repartition { reset } => {
            let partition_size = config.repartition.partition_size;
            let pool = connect_chunk_pool(&config.pg_connection, job_config.max_workers).await?;

            let plan = resolve_plan(&cli, &pool, Some(partition_size)).await?;

            // Table scaffolding only applies to a fresh dispatch, a resumed
            // run continues into the tables of the original one.
            if let DispatchPlan::FreshAligned { range, .. } = plan {
                let admin_pool = connect_admin_pool(&config.pg_connection).await?;
                let admin = PartitionAdmin::new(admin_pool, partition_size);
                let partitions = partition_for_key(range.end(), partition_size) + 1;

                if *reset {
                    admin.drop_tables(partitions).await?;
                }
                admin.create_tables(partitions).await?;

                // Autovacuum back on happens per partition during finalize.
                for partition in 0..partitions {
                    admin.set_autovacuum(partition, false).await?;
                }
            }

            let store = PostgresCheckpointStore::connect(&config.pg_connection).await?;
            let task = RepartitionTask::new(pool.clone(), partition_size);

            run_job(BackfillJob::new(job_config, store, task), plan).await?;
        }
        Command::FinalizePartitions { first, last } => {
            let admin_pool = connect_admin_pool(&config.pg_connection).await?;
            let admin = PartitionAdmin::new(admin_pool, config.repartition.partition_size);

            let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
            let signal_handle = spawn_signal_listener(shutdown_tx);

            for partition in *first..=*last {
                if shutdown_rx.is_shutdown() {
                    info!(partition, "shutdown observed, stopping finalization");
                    break;
                }

                admin.finalize_partition(partition).await?;
            }

            signal_handle.abort();
            let _ = signal_handle.await;
        }
        Command::BuildPartitionIndexes {
            index_name,
            index_definition,
            first,
            last,
        } => {
            let pool = connect_chunk_pool(&config.pg_connection, job_config.max_workers).await?;
            let builder =
                PartitionIndexBuilder::new(pool, index_name.clone(), index_definition.clone());

            let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
            let signal_handle = spawn_signal_listener(shutdown_tx);

            let result = builder
                .build(*first, *last, job_config.max_workers, shutdown_rx)
                .await;

            signal_handle.abort();
            let _ = signal_handle.await;

            result?;
        }
    }

    info!("backfill migrator finished");

    Ok(())
}

/// Starts a backfill job and waits for it, shutting it down on SIGINT or
/// SIGTERM.
async fn run_job<S, T>(mut job: BackfillJob<S, T>, plan: DispatchPlan) -> anyhow::Result<()>
where
    S: CheckpointStore + Clone + Send + Sync + 'static,
    T: BackfillTask + Clone,
{
    job.start(plan).await?;

    let signal_handle = spawn_signal_listener(job.shutdown_tx());

    // Wait for the job to finish, either normally or via shutdown.
    let result = job.wait().await;

    // The listener may still be waiting for a signal that never arrives.
    signal_handle.abort();
    let _ = signal_handle.await;

    result?;

    Ok(())
}

/// Spawns a task translating process signals into the shutdown broadcast.
fn spawn_signal_listener(shutdown_tx: ShutdownTx) -> JoinHandle<()> {
    tokio::spawn(async move {
        // SIGTERM is sent by Kubernetes before SIGKILL during pod termination.
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("sigint (ctrl+c) received, shutting down");
            }
            _ = sigterm.recv() => {
                info!("sigterm received, shutting down");
            }
        }

        shutdown_tx.shutdown();
    })
}

/// Applies the CLI overrides on top of the configured job settings.
fn effective_job_config(cli: &Cli, base: &BackfillJobConfig) -> BackfillJobConfig {
    BackfillJobConfig {
        id: cli.job_id.unwrap_or(base.id),
        chunk_size: cli.chunk_size.unwrap_or(base.chunk_size),
        max_workers: cli.workers.unwrap_or(base.max_workers),
        progress_interval_ms: base.progress_interval_ms,
    }
}

/// Resolves the dispatch plan from the CLI range arguments.
///
/// Without `--end` the range extends to the highest key in the source table.
async fn resolve_plan(
    cli: &Cli,
    pool: &PgPool,
    aligned_width: Option<u64>,
) -> anyhow::Result<DispatchPlan> {
    if cli.resume {
        return Ok(DispatchPlan::Resume);
    }

    let start = cli.start.unwrap_or(0);
    let end = match cli.end {
        Some(end) => end,
        None => max_sequence_number(pool, "transactions")
            .await?
            .context("the transactions table is empty, nothing to backfill")?,
    };

    let range = KeyRange::new(start, end)?;

    Ok(match aligned_width {
        Some(width) => DispatchPlan::FreshAligned { range, width },
        None => DispatchPlan::Fresh { range },
    })
}

/// Logs the loaded configuration, omitting secrets.
fn log_config(config: &MigratorConfig) {
    debug!(
        host = %config.pg_connection.host,
        port = config.pg_connection.port,
        database = %config.pg_connection.name,
        username = %config.pg_connection.username,
        require_tls = config.pg_connection.require_tls,
        "source database"
    );
    debug!(
        job_id = config.job.id,
        chunk_size = config.job.chunk_size,
        max_workers = config.job.max_workers,
        progress_interval_ms = config.job.progress_interval_ms,
        partition_size = config.repartition.partition_size,
        "job settings"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn base_config() -> BackfillJobConfig {
        BackfillJobConfig {
            id: 1,
            chunk_size: 10_000,
            max_workers: 16,
            progress_interval_ms: 10_000,
        }
    }

    #[test]
    fn cli_overrides_take_precedence_over_the_config_file() {
        let cli = Cli::parse_from([
            "backfill-migrator",
            "sequence-numbers",
            "--job-id",
            "7",
            "--chunk-size",
            "500",
        ]);

        let effective = effective_job_config(&cli, &base_config());
        assert_eq!(effective.id, 7);
        assert_eq!(effective.chunk_size, 500);
        assert_eq!(effective.max_workers, 16);
    }

    #[test]
    fn configured_values_apply_without_overrides() {
        let cli = Cli::parse_from(["backfill-migrator", "merge-addresses"]);

        let effective = effective_job_config(&cli, &base_config());
        assert_eq!(effective.id, 1);
        assert_eq!(effective.chunk_size, 10_000);
        assert_eq!(effective.max_workers, 16);
    }
}
