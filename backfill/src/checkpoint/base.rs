use std::collections::BTreeMap;
use std::future::Future;

use crate::error::BackfillResult;
use crate::job::JobId;
use crate::range::KeyRange;

/// Progress of one dispatched sub-range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeState {
    /// The range was dispatched but no worker has claimed it yet.
    Pending,
    /// A worker is processing the range; all keys before `next_key` are
    /// committed.
    InProgress {
        /// First key not yet covered by a committed chunk.
        next_key: i64,
    },
    /// Every chunk of the range is committed.
    Completed,
    /// The owning worker abandoned the range at `next_key` after an error.
    Failed {
        /// First key not covered by a committed chunk when the worker failed.
        next_key: i64,
    },
}

impl RangeState {
    /// Returns whether the range needs no further processing.
    pub fn is_completed(&self) -> bool {
        matches!(self, RangeState::Completed)
    }
}

/// Trait for persisting and retrieving per-range checkpoint records.
///
/// Implementations must make `update_range_state` an upsert keyed on
/// `(job_id, range)` so that re-running a chunk, and therefore re-writing its
/// checkpoint, is a no-op. Implementations should be thread-safe; every
/// worker writes through a clone of the store.
pub trait CheckpointStore {
    /// Loads all checkpoint records for a job.
    fn load_range_states(
        &self,
        job_id: JobId,
    ) -> impl Future<Output = BackfillResult<BTreeMap<KeyRange, RangeState>>> + Send;

    /// Upserts the checkpoint record for one sub-range.
    fn update_range_state(
        &self,
        job_id: JobId,
        range: KeyRange,
        state: RangeState,
    ) -> impl Future<Output = BackfillResult<()>> + Send;

    /// Deletes all checkpoint records for a job.
    fn clear_job(&self, job_id: JobId) -> impl Future<Output = BackfillResult<()>> + Send;
}

/// A sub-range handed to one worker, with the key processing starts from.
///
/// The assignment keeps the originally dispatched range even when processing
/// resumes partway through it: checkpoint records are keyed on the dispatched
/// range, so a resumed worker must keep writing under the same key or the
/// original record would stay incomplete forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeAssignment {
    range: KeyRange,
    resume_key: i64,
}

impl RangeAssignment {
    /// Creates an assignment covering the whole range.
    pub fn fresh(range: KeyRange) -> Self {
        Self {
            range,
            resume_key: range.start(),
        }
    }

    /// Creates an assignment resuming `range` at `resume_key`.
    ///
    /// A resume key before the range start processes the full range.
    pub fn resuming(range: KeyRange, resume_key: i64) -> Self {
        Self {
            range,
            resume_key: resume_key.max(range.start()),
        }
    }

    /// Returns the dispatched range the checkpoint record is keyed on.
    pub fn range(&self) -> KeyRange {
        self.range
    }

    /// Returns the first key that still needs processing.
    pub fn resume_key(&self) -> i64 {
        self.resume_key
    }

    /// Returns the portion of the range that still needs processing, or
    /// `None` when the resume key lies past the range end.
    pub fn pending(&self) -> Option<KeyRange> {
        self.range.trim_start(self.resume_key)
    }
}

/// Computes the assignments a resumed job still has to process.
///
/// Completed ranges are dropped. Pending ranges are kept whole. In-progress
/// and failed ranges resume at their recorded `next_key`; a range whose
/// `next_key` already lies past its end is dropped as complete. Every
/// returned assignment keeps the originally dispatched range, so the
/// resumed workers update the existing checkpoint records in place.
pub fn remaining_ranges(states: &BTreeMap<KeyRange, RangeState>) -> Vec<RangeAssignment> {
    states
        .iter()
        .filter_map(|(range, state)| match state {
            RangeState::Completed => None,
            RangeState::Pending => Some(RangeAssignment::fresh(*range)),
            RangeState::InProgress { next_key } | RangeState::Failed { next_key } => {
                if *next_key > range.end() {
                    None
                } else {
                    Some(RangeAssignment::resuming(*range, *next_key))
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: i64, end: i64) -> KeyRange {
        KeyRange::new(start, end).unwrap()
    }

    #[test]
    fn incomplete_range_is_reprocessed_exactly() {
        let mut states = BTreeMap::new();
        states.insert(range(0, 99), RangeState::Completed);
        states.insert(range(100, 199), RangeState::InProgress { next_key: 100 });
        states.insert(range(200, 299), RangeState::Completed);

        assert_eq!(
            remaining_ranges(&states),
            vec![RangeAssignment::fresh(range(100, 199))]
        );
    }

    #[test]
    fn partially_completed_range_resumes_from_next_key() {
        let mut states = BTreeMap::new();
        states.insert(range(100, 199), RangeState::InProgress { next_key: 150 });

        let assignments = remaining_ranges(&states);
        assert_eq!(
            assignments,
            vec![RangeAssignment::resuming(range(100, 199), 150)]
        );

        // The assignment keeps the dispatched range for checkpoint writes and
        // only trims the portion that actually runs.
        assert_eq!(assignments[0].range(), range(100, 199));
        assert_eq!(assignments[0].pending(), Some(range(150, 199)));
    }

    #[test]
    fn failed_range_resumes_from_failure_position() {
        let mut states = BTreeMap::new();
        states.insert(range(0, 99), RangeState::Failed { next_key: 40 });
        states.insert(range(100, 199), RangeState::Pending);

        assert_eq!(
            remaining_ranges(&states),
            vec![
                RangeAssignment::resuming(range(0, 99), 40),
                RangeAssignment::fresh(range(100, 199)),
            ]
        );
    }

    #[test]
    fn resume_key_before_the_range_start_keeps_the_full_range() {
        let assignment = RangeAssignment::resuming(range(100, 199), 0);
        assert_eq!(assignment.resume_key(), 100);
        assert_eq!(assignment.pending(), Some(range(100, 199)));
    }

    #[test]
    fn next_key_past_range_end_counts_as_complete() {
        let mut states = BTreeMap::new();
        states.insert(range(0, 99), RangeState::InProgress { next_key: 100 });

        assert!(remaining_ranges(&states).is_empty());
    }
}
