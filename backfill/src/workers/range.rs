use tracing::{debug, error, info, warn};

use crate::checkpoint::{CheckpointStore, RangeAssignment, RangeState};
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::BackfillResult;
use crate::job::JobId;
use crate::progress::ProgressTracker;
use crate::task::BackfillTask;

/// Identifier of a range worker within one job, used for logging.
pub type WorkerId = u16;

/// Worker processing one sub-range of a backfill job.
///
/// The worker opens one task session for the duration of its sub-range and
/// walks the sub-range in chunks: check shutdown, execute the task's chunk
/// statement, persist the checkpoint, bump the progress counters. Shutdown is
/// observed only at chunk boundaries, so an in-flight statement always
/// completes or errors before the worker exits.
///
/// Checkpoints are always keyed on the dispatched range of the assignment,
/// also when the assignment resumes partway through it, so a resumed run
/// updates the existing records rather than accumulating trimmed ones.
#[derive(Debug)]
pub struct RangeWorker<S, T> {
    worker_id: WorkerId,
    job_id: JobId,
    assignment: RangeAssignment,
    chunk_size: u64,
    task: T,
    checkpoint_store: S,
    progress: ProgressTracker,
    shutdown_rx: ShutdownRx,
}

impl<S, T> RangeWorker<S, T>
where
    S: CheckpointStore + Send + Sync,
    T: BackfillTask,
{
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        worker_id: WorkerId,
        job_id: JobId,
        assignment: RangeAssignment,
        chunk_size: u64,
        task: T,
        checkpoint_store: S,
        progress: ProgressTracker,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            worker_id,
            job_id,
            assignment,
            chunk_size,
            task,
            checkpoint_store,
            progress,
            shutdown_rx,
        }
    }

    /// Processes the assigned sub-range to completion, shutdown, or error.
    ///
    /// On shutdown the worker returns `Ok` after recording its position; the
    /// already-committed chunks stay committed and the job can be resumed.
    /// On error the remainder of the sub-range is abandoned: the failure
    /// position is recorded best-effort and the error propagates to the pool.
    pub async fn run(self) -> BackfillResult<()> {
        let range = self.assignment.range();

        info!(
            worker_id = self.worker_id,
            task = self.task.name(),
            range = %range,
            resume_key = self.assignment.resume_key(),
            "starting range worker"
        );

        let Some(pending) = self.assignment.pending() else {
            // Nothing left to process; make sure the record says so.
            self.checkpoint_store
                .update_range_state(self.job_id, range, RangeState::Completed)
                .await?;
            return Ok(());
        };

        let mut session = self.task.open_session().await?;

        // Claim the range before the first chunk so an interrupted run
        // resumes from the same position even if no chunk ever committed.
        self.checkpoint_store
            .update_range_state(
                self.job_id,
                range,
                RangeState::InProgress {
                    next_key: pending.start(),
                },
            )
            .await?;

        for chunk in pending.chunks(self.chunk_size) {
            if self.shutdown_rx.is_shutdown() {
                info!(
                    worker_id = self.worker_id,
                    range = %range,
                    next_key = chunk.start(),
                    "shutdown observed, stopping at chunk boundary"
                );
                return Ok(());
            }

            match self.task.process_chunk(&mut session, chunk).await {
                Ok(rows) => {
                    let state = if chunk.end() == range.end() {
                        RangeState::Completed
                    } else {
                        RangeState::InProgress {
                            next_key: chunk.end() + 1,
                        }
                    };

                    self.checkpoint_store
                        .update_range_state(self.job_id, range, state)
                        .await?;
                    self.progress.record_chunk(chunk.len());

                    debug!(
                        worker_id = self.worker_id,
                        chunk = %chunk,
                        rows,
                        "chunk committed"
                    );
                }
                Err(err) => {
                    error!(
                        worker_id = self.worker_id,
                        range = %range,
                        chunk = %chunk,
                        error = %err,
                        "chunk failed, abandoning the remainder of the range"
                    );

                    // Best-effort: losing this write only means resume restarts
                    // from the previous checkpoint instead of the failed chunk.
                    let failed = RangeState::Failed {
                        next_key: chunk.start(),
                    };
                    if let Err(store_err) = self
                        .checkpoint_store
                        .update_range_state(self.job_id, range, failed)
                        .await
                    {
                        warn!(
                            worker_id = self.worker_id,
                            error = %store_err,
                            "failed to record the failure position"
                        );
                    }

                    return Err(err);
                }
            }
        }

        info!(
            worker_id = self.worker_id,
            range = %range,
            "range completed"
        );

        Ok(())
    }
}
