//! Aggregate progress tracking across range workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::concurrency::shutdown::ShutdownRx;

#[derive(Debug, Default)]
struct Counters {
    chunks: AtomicU64,
    keys: AtomicU64,
}

/// Shared monotonic counters incremented by workers after each committed chunk.
///
/// Counters are incremented with relaxed ordering, there is no ordering
/// guarantee between workers and none is needed: the values are only read for
/// reporting.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    counters: Arc<Counters>,
}

impl ProgressTracker {
    /// Creates a new tracker with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one committed chunk covering `keys` keys.
    pub fn record_chunk(&self, keys: u64) {
        self.counters.chunks.fetch_add(1, Ordering::Relaxed);
        self.counters.keys.fetch_add(keys, Ordering::Relaxed);
    }

    /// Returns the number of chunks committed so far.
    pub fn chunks_completed(&self) -> u64 {
        self.counters.chunks.load(Ordering::Relaxed)
    }

    /// Returns the number of keys covered by committed chunks so far.
    pub fn keys_completed(&self) -> u64 {
        self.counters.keys.load(Ordering::Relaxed)
    }
}

/// Spawns a background task logging job progress at a fixed interval.
///
/// The reporter stops when shutdown is signaled; the job aborts it once all
/// workers have finished.
pub fn spawn_progress_reporter(
    tracker: ProgressTracker,
    total_keys: u64,
    interval: Duration,
    mut shutdown_rx: ShutdownRx,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let keys = tracker.keys_completed();
                    let percent = if total_keys == 0 {
                        100.0
                    } else {
                        keys as f64 / total_keys as f64 * 100.0
                    };

                    info!(
                        chunks_completed = tracker.chunks_completed(),
                        keys_completed = keys,
                        total_keys,
                        percent = format!("{percent:.1}"),
                        "backfill progress"
                    );
                }
                _ = shutdown_rx.signaled() => {
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_chunk_accumulates() {
        let tracker = ProgressTracker::new();
        tracker.record_chunk(10_000);
        tracker.record_chunk(4_500);

        assert_eq!(tracker.chunks_completed(), 2);
        assert_eq!(tracker.keys_completed(), 14_500);
    }

    #[test]
    fn clones_share_counters() {
        let tracker = ProgressTracker::new();
        let clone = tracker.clone();
        clone.record_chunk(100);

        assert_eq!(tracker.keys_completed(), 100);
    }
}
