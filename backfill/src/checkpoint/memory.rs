use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::checkpoint::base::{CheckpointStore, RangeState};
use crate::error::BackfillResult;
use crate::job::JobId;
use crate::range::KeyRange;

/// Inner state of [`MemoryCheckpointStore`].
#[derive(Debug, Default)]
struct Inner {
    /// Current checkpoint record per sub-range, keyed by job.
    range_states: HashMap<JobId, BTreeMap<KeyRange, RangeState>>,
    /// Append-only history of state transitions, kept for test assertions and
    /// debugging.
    state_history: HashMap<(JobId, KeyRange), Vec<RangeState>>,
}

/// In-memory checkpoint store.
///
/// Keeps all checkpoint records in process memory, so resume only works
/// within one process lifetime. Used in tests and for dry runs; production
/// jobs use [`crate::checkpoint::PostgresCheckpointStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryCheckpointStore {
    /// Creates a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded state transitions for one sub-range.
    pub async fn range_state_history(&self, job_id: JobId, range: KeyRange) -> Vec<RangeState> {
        let inner = self.inner.lock().await;

        inner
            .state_history
            .get(&(job_id, range))
            .cloned()
            .unwrap_or_default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    async fn load_range_states(
        &self,
        job_id: JobId,
    ) -> BackfillResult<BTreeMap<KeyRange, RangeState>> {
        let inner = self.inner.lock().await;

        Ok(inner.range_states.get(&job_id).cloned().unwrap_or_default())
    }

    async fn update_range_state(
        &self,
        job_id: JobId,
        range: KeyRange,
        state: RangeState,
    ) -> BackfillResult<()> {
        let mut inner = self.inner.lock().await;

        inner
            .range_states
            .entry(job_id)
            .or_default()
            .insert(range, state);
        inner
            .state_history
            .entry((job_id, range))
            .or_default()
            .push(state);

        Ok(())
    }

    async fn clear_job(&self, job_id: JobId) -> BackfillResult<()> {
        let mut inner = self.inner.lock().await;

        inner.range_states.remove(&job_id);
        inner
            .state_history
            .retain(|(history_job_id, _), _| *history_job_id != job_id);

        Ok(())
    }
}
