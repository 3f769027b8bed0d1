//! The chunk-processing seam the runner is parameterized by.

use std::future::Future;

use crate::error::BackfillResult;
use crate::range::KeyRange;

/// A migration task processed by range workers, one chunk at a time.
///
/// Implementations define two things: how a worker opens the session it will
/// hold for the duration of its sub-range (for SQL tasks, one pooled database
/// connection), and how one chunk of keys is processed within that session.
///
/// # Idempotence
///
/// `process_chunk` must be safe to re-execute against an already-migrated
/// chunk: every statement has to be an upsert or conflict-ignoring insert
/// keyed on the destination table's primary key. Resume dispatches a range
/// from its last checkpointed key, so the chunk containing that key may run
/// more than once.
pub trait BackfillTask: Send + Sync + 'static {
    /// Per-worker session held for the duration of one sub-range.
    type Session: Send;

    /// Returns a short name identifying the task in logs and checkpoints.
    fn name(&self) -> &'static str;

    /// Opens the session a worker uses for its entire sub-range.
    fn open_session(&self) -> impl Future<Output = BackfillResult<Self::Session>> + Send;

    /// Processes one chunk of keys, returning the number of rows written.
    ///
    /// A returned error abandons the remainder of the worker's sub-range; the
    /// failure position is recorded for resume and the error propagates to
    /// the job.
    fn process_chunk(
        &self,
        session: &mut Self::Session,
        chunk: KeyRange,
    ) -> impl Future<Output = BackfillResult<u64>> + Send;
}
