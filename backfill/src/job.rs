//! Backfill job orchestration.

use std::sync::Arc;
use std::time::Duration;

use backfill_config::shared::BackfillJobConfig;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::info;

use crate::checkpoint::{CheckpointStore, RangeAssignment, RangeState, remaining_ranges};
use crate::{backfill_error, bail};
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::error::{BackfillResult, ErrorKind};
use crate::progress::{ProgressTracker, spawn_progress_reporter};
use crate::range::{KeyRange, partition, partition_aligned};
use crate::task::BackfillTask;
use crate::workers::pool::WorkerPool;
use crate::workers::range::{RangeWorker, WorkerId};

/// Identifier of a backfill job.
///
/// The job id isolates checkpoint records, so distinct migrations can run and
/// resume independently against the same database.
pub type JobId = u64;

/// How the sub-ranges of a job are computed.
#[derive(Debug, Clone, Copy)]
pub enum DispatchPlan {
    /// Partition `range` into one sub-range per worker.
    Fresh { range: KeyRange },
    /// Partition `range` into sub-ranges aligned to multiples of `width`.
    ///
    /// Used when sub-ranges must not span destination partition tables.
    FreshAligned { range: KeyRange, width: u64 },
    /// Reprocess the incomplete sub-ranges recorded by a previous run.
    Resume,
}

#[derive(Debug)]
enum JobState {
    NotStarted,
    Started {
        pool: WorkerPool,
        reporter: JoinHandle<()>,
    },
}

/// A backfill job: one migration task fanned out over a key range.
///
/// `start` computes the dispatch plan and spawns one worker per sub-range,
/// bounded by the configured worker count; `wait` joins all workers and
/// aggregates their errors. `shutdown` broadcasts the cooperative stop
/// signal, which workers observe at chunk boundaries.
#[derive(Debug)]
pub struct BackfillJob<S, T> {
    id: JobId,
    config: Arc<BackfillJobConfig>,
    checkpoint_store: S,
    task: T,
    state: JobState,
    shutdown_tx: ShutdownTx,
    progress: ProgressTracker,
}

impl<S, T> BackfillJob<S, T>
where
    S: CheckpointStore + Clone + Send + Sync + 'static,
    T: BackfillTask + Clone,
{
    /// Creates a new job in the not-started state.
    pub fn new(config: BackfillJobConfig, checkpoint_store: S, task: T) -> Self {
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            id: config.id,
            config: Arc::new(config),
            checkpoint_store,
            task,
            state: JobState::NotStarted,
            shutdown_tx,
            progress: ProgressTracker::new(),
        }
    }

    /// Returns the job identifier.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Returns a transmitter for signaling shutdown from outside the job.
    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Returns a handle to the job's progress counters.
    pub fn progress(&self) -> ProgressTracker {
        self.progress.clone()
    }

    /// Computes the sub-ranges for the plan and spawns the workers.
    pub async fn start(&mut self, plan: DispatchPlan) -> BackfillResult<()> {
        let assignments = self.dispatch_ranges(plan).await?;
        let total_keys: u64 = assignments
            .iter()
            .filter_map(|assignment| assignment.pending())
            .map(|pending| pending.len())
            .sum();

        info!(
            job_id = self.id,
            task = self.task.name(),
            sub_ranges = assignments.len(),
            total_keys,
            max_workers = self.config.max_workers,
            chunk_size = self.config.chunk_size,
            "starting backfill job"
        );

        let pool = WorkerPool::new();
        let permits = Arc::new(Semaphore::new(self.config.max_workers as usize));

        for (index, assignment) in assignments.into_iter().enumerate() {
            let worker_id = index.min(WorkerId::MAX as usize) as WorkerId;
            let worker = RangeWorker::new(
                worker_id,
                self.id,
                assignment,
                self.config.chunk_size,
                self.task.clone(),
                self.checkpoint_store.clone(),
                self.progress.clone(),
                self.shutdown_tx.subscribe(),
            );

            let permits = permits.clone();
            pool.spawn(worker_id, async move {
                let _permit = permits.acquire_owned().await.map_err(|_| {
                    backfill_error!(ErrorKind::Unknown, "Worker permits semaphore closed")
                })?;

                worker.run().await
            })
            .await;
        }

        let reporter = spawn_progress_reporter(
            self.progress.clone(),
            total_keys,
            Duration::from_millis(self.config.progress_interval_ms),
            self.shutdown_tx.subscribe(),
        );

        self.state = JobState::Started { pool, reporter };

        Ok(())
    }

    /// Waits for all workers to complete and aggregates their errors.
    pub async fn wait(self) -> BackfillResult<()> {
        let JobState::Started { pool, reporter } = self.state else {
            info!(job_id = self.id, "job was not started, nothing to wait for");
            return Ok(());
        };

        let result = pool.wait_all().await;

        reporter.abort();
        let _ = reporter.await;

        info!(
            job_id = self.id,
            chunks_completed = self.progress.chunks_completed(),
            keys_completed = self.progress.keys_completed(),
            "backfill job finished"
        );

        result
    }

    /// Signals all workers to stop at their next chunk boundary.
    pub fn shutdown(&self) {
        info!(job_id = self.id, "shutting down backfill job");
        self.shutdown_tx.shutdown();
    }

    /// Signals shutdown and waits for all workers to stop.
    pub async fn shutdown_and_wait(self) -> BackfillResult<()> {
        self.shutdown();
        self.wait().await
    }

    async fn dispatch_ranges(&self, plan: DispatchPlan) -> BackfillResult<Vec<RangeAssignment>> {
        match plan {
            DispatchPlan::Fresh { range } => {
                let ranges = partition(range, self.config.max_workers as usize);
                self.record_fresh_dispatch(&ranges).await?;
                Ok(ranges.into_iter().map(RangeAssignment::fresh).collect())
            }
            DispatchPlan::FreshAligned { range, width } => {
                let ranges = partition_aligned(range, width);
                self.record_fresh_dispatch(&ranges).await?;
                Ok(ranges.into_iter().map(RangeAssignment::fresh).collect())
            }
            DispatchPlan::Resume => {
                let states = self.checkpoint_store.load_range_states(self.id).await?;
                if states.is_empty() {
                    bail!(
                        ErrorKind::InvalidRange,
                        "No checkpoint records found for resume",
                        format!("job {} has nothing to resume", self.id)
                    );
                }

                let assignments = remaining_ranges(&states);
                info!(
                    job_id = self.id,
                    recorded_ranges = states.len(),
                    remaining_ranges = assignments.len(),
                    "resuming from checkpoint records"
                );

                Ok(assignments)
            }
        }
    }

    /// Resets any stale checkpoint records and marks the new dispatch.
    async fn record_fresh_dispatch(&self, ranges: &[KeyRange]) -> BackfillResult<()> {
        self.checkpoint_store.clear_job(self.id).await?;
        for range in ranges {
            self.checkpoint_store
                .update_range_state(self.id, *range, RangeState::Pending)
                .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    use crate::checkpoint::MemoryCheckpointStore;

    fn range(start: i64, end: i64) -> KeyRange {
        KeyRange::new(start, end).unwrap()
    }

    fn job_config(id: JobId, chunk_size: u64, max_workers: u16) -> BackfillJobConfig {
        BackfillJobConfig {
            id,
            chunk_size,
            max_workers,
            progress_interval_ms: 60_000,
        }
    }

    /// Task double recording every processed chunk.
    #[derive(Debug, Clone, Default)]
    struct RecordingTask {
        chunks: Arc<StdMutex<Vec<KeyRange>>>,
    }

    impl RecordingTask {
        fn processed_chunks(&self) -> Vec<KeyRange> {
            let mut chunks = self.chunks.lock().unwrap().clone();
            chunks.sort();
            chunks
        }
    }

    impl BackfillTask for RecordingTask {
        type Session = ();

        fn name(&self) -> &'static str {
            "recording"
        }

        async fn open_session(&self) -> BackfillResult<()> {
            Ok(())
        }

        async fn process_chunk(&self, _session: &mut (), chunk: KeyRange) -> BackfillResult<u64> {
            self.chunks.lock().unwrap().push(chunk);
            Ok(chunk.len())
        }
    }

    /// Task double failing on one specific chunk.
    #[derive(Debug, Clone)]
    struct FailingTask {
        fail_at: i64,
    }

    impl BackfillTask for FailingTask {
        type Session = ();

        fn name(&self) -> &'static str {
            "failing"
        }

        async fn open_session(&self) -> BackfillResult<()> {
            Ok(())
        }

        async fn process_chunk(&self, _session: &mut (), chunk: KeyRange) -> BackfillResult<u64> {
            if chunk.start() == self.fail_at {
                return Err(backfill_error!(
                    ErrorKind::SourceQueryFailed,
                    "injected chunk failure"
                ));
            }

            Ok(chunk.len())
        }
    }

    /// Task double signaling shutdown after a number of processed chunks.
    ///
    /// The transmitter slot is filled after the owning job is built, since the
    /// job creates its own shutdown channel.
    #[derive(Debug, Clone)]
    struct ShutdownAfterTask {
        shutdown_tx: Arc<StdMutex<Option<ShutdownTx>>>,
        after: u64,
        processed: Arc<AtomicU64>,
        chunks: Arc<StdMutex<Vec<KeyRange>>>,
    }

    impl BackfillTask for ShutdownAfterTask {
        type Session = ();

        fn name(&self) -> &'static str {
            "shutdown_after"
        }

        async fn open_session(&self) -> BackfillResult<()> {
            Ok(())
        }

        async fn process_chunk(&self, _session: &mut (), chunk: KeyRange) -> BackfillResult<u64> {
            self.chunks.lock().unwrap().push(chunk);
            let processed = self.processed.fetch_add(1, Ordering::SeqCst) + 1;
            if processed == self.after
                && let Some(shutdown_tx) = self.shutdown_tx.lock().unwrap().as_ref()
            {
                shutdown_tx.shutdown();
            }

            Ok(chunk.len())
        }
    }

    #[tokio::test]
    async fn fresh_run_processes_every_chunk_exactly_once() {
        let store = MemoryCheckpointStore::new();
        let task = RecordingTask::default();
        let mut job = BackfillJob::new(job_config(1, 100, 4), store.clone(), task.clone());
        let progress = job.progress();

        job.start(DispatchPlan::Fresh {
            range: range(0, 999),
        })
        .await
        .unwrap();
        job.wait().await.unwrap();

        // Four sub-ranges of 250 keys, each cut into chunks of 100: the last
        // chunk of every sub-range is truncated, so 3 chunks per sub-range.
        let chunks = task.processed_chunks();
        assert_eq!(chunks.len(), 12);
        assert_eq!(chunks[0].start(), 0);
        assert_eq!(chunks.last().unwrap().end(), 999);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end() + 1, pair[1].start());
        }
        // No chunk crosses a sub-range boundary.
        for chunk in &chunks {
            assert_eq!(chunk.start().div_euclid(250), chunk.end().div_euclid(250));
        }

        let states = store.load_range_states(1).await.unwrap();
        assert_eq!(states.len(), 4);
        assert!(states.values().all(|state| state.is_completed()));

        assert_eq!(progress.keys_completed(), 1_000);
        assert_eq!(progress.chunks_completed(), 12);
    }

    #[tokio::test]
    async fn aligned_dispatch_respects_partition_stripes() {
        let store = MemoryCheckpointStore::new();
        let task = RecordingTask::default();
        let mut job = BackfillJob::new(job_config(2, 50, 2), store.clone(), task.clone());

        job.start(DispatchPlan::FreshAligned {
            range: range(50, 349),
            width: 100,
        })
        .await
        .unwrap();
        job.wait().await.unwrap();

        let states = store.load_range_states(2).await.unwrap();
        let dispatched: Vec<_> = states.keys().copied().collect();
        assert_eq!(
            dispatched,
            vec![range(50, 99), range(100, 199), range(200, 299), range(300, 349)]
        );
        assert!(states.values().all(|state| state.is_completed()));
    }

    #[tokio::test]
    async fn resume_reprocesses_only_incomplete_ranges() {
        let store = MemoryCheckpointStore::new();
        store
            .update_range_state(3, range(0, 99), RangeState::Completed)
            .await
            .unwrap();
        store
            .update_range_state(3, range(100, 199), RangeState::InProgress { next_key: 150 })
            .await
            .unwrap();
        store
            .update_range_state(3, range(200, 299), RangeState::Failed { next_key: 200 })
            .await
            .unwrap();

        let task = RecordingTask::default();
        let mut job = BackfillJob::new(job_config(3, 50, 4), store.clone(), task.clone());

        job.start(DispatchPlan::Resume).await.unwrap();
        job.wait().await.unwrap();

        let chunks = task.processed_chunks();
        assert_eq!(chunks[0].start(), 150);
        let total: u64 = chunks.iter().map(|chunk| chunk.len()).sum();
        assert_eq!(total, 150);
        assert!(chunks.iter().all(|chunk| chunk.start() >= 150));

        // The resumed workers update the originally dispatched records in
        // place, so after the run every record reads completed and a further
        // resume has nothing left to do.
        let states = store.load_range_states(3).await.unwrap();
        let dispatched: Vec<_> = states.keys().copied().collect();
        assert_eq!(
            dispatched,
            vec![range(0, 99), range(100, 199), range(200, 299)]
        );
        assert!(states.values().all(|state| state.is_completed()));

        let follow_up = RecordingTask::default();
        let mut job = BackfillJob::new(job_config(3, 50, 4), store.clone(), follow_up.clone());
        job.start(DispatchPlan::Resume).await.unwrap();
        job.wait().await.unwrap();
        assert!(follow_up.processed_chunks().is_empty());
    }

    #[tokio::test]
    async fn resume_without_checkpoints_is_an_error() {
        let store = MemoryCheckpointStore::new();
        let task = RecordingTask::default();
        let mut job = BackfillJob::new(job_config(4, 50, 2), store, task);

        let err = job.start(DispatchPlan::Resume).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRange);
    }

    #[tokio::test]
    async fn shutdown_stops_workers_at_chunk_boundaries() {
        let store = MemoryCheckpointStore::new();
        let chunks = Arc::new(StdMutex::new(Vec::new()));
        let shutdown_slot = Arc::new(StdMutex::new(None));
        let task = ShutdownAfterTask {
            shutdown_tx: shutdown_slot.clone(),
            after: 2,
            processed: Arc::new(AtomicU64::new(0)),
            chunks: chunks.clone(),
        };

        let mut job = BackfillJob::new(job_config(5, 50, 2), store.clone(), task);
        *shutdown_slot.lock().unwrap() = Some(job.shutdown_tx());

        job.start(DispatchPlan::Fresh {
            range: range(0, 999),
        })
        .await
        .unwrap();
        job.wait().await.unwrap();

        let processed_chunks = chunks.lock().unwrap().clone();
        // Each worker finishes at most the chunk that was in flight when the
        // signal fired, far fewer than the 20 chunks of a full run.
        assert!(processed_chunks.len() < 20);

        // Every committed chunk is reflected in a checkpoint: in-progress
        // ranges resume at a chunk boundary.
        let states = store.load_range_states(5).await.unwrap();
        for (sub_range, state) in states {
            if let RangeState::InProgress { next_key } = state {
                assert_eq!((next_key - sub_range.start()) % 50, 0);
                assert!(next_key >= sub_range.start());
            }
        }
    }

    #[tokio::test]
    async fn failing_worker_propagates_and_records_failure() {
        let store = MemoryCheckpointStore::new();
        let task = FailingTask { fail_at: 100 };
        let mut job = BackfillJob::new(job_config(6, 50, 2), store.clone(), task);

        job.start(DispatchPlan::Fresh {
            range: range(0, 199),
        })
        .await
        .unwrap();

        let err = job.wait().await.unwrap_err();
        assert_eq!(err.kinds(), vec![ErrorKind::SourceQueryFailed]);

        let states = store.load_range_states(6).await.unwrap();
        assert_eq!(states.get(&range(0, 99)), Some(&RangeState::Completed));
        assert_eq!(
            states.get(&range(100, 199)),
            Some(&RangeState::Failed { next_key: 100 })
        );
    }

    #[tokio::test]
    async fn waiting_on_an_unstarted_job_is_a_noop() {
        let store = MemoryCheckpointStore::new();
        let task = RecordingTask::default();
        let job = BackfillJob::new(job_config(7, 50, 2), store, task);

        assert!(job.wait().await.is_ok());
    }
}
