use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::backfill_error;
use crate::error::{BackfillResult, ErrorKind};
use crate::workers::range::WorkerId;

/// Pool owning the tasks of all range workers of one job.
///
/// Workers run independently; the pool exists to join them and to aggregate
/// their failures. One worker failing does not affect the others, every
/// remaining worker runs to completion (or shutdown) before `wait_all`
/// returns.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    join_set: Arc<Mutex<JoinSet<(WorkerId, BackfillResult<()>)>>>,
}

impl WorkerPool {
    /// Creates a new empty worker pool.
    pub fn new() -> Self {
        Self {
            join_set: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Spawns a worker future into the pool.
    pub async fn spawn<F>(&self, worker_id: WorkerId, future: F)
    where
        F: Future<Output = BackfillResult<()>> + Send + 'static,
    {
        let mut join_set = self.join_set.lock().await;
        join_set.spawn(async move {
            let result = future.await;
            (worker_id, result)
        });

        debug!(worker_id, "spawned worker in pool");
    }

    /// Waits for all workers to complete, aggregating their errors.
    pub async fn wait_all(&self) -> BackfillResult<()> {
        let mut errors = Vec::new();

        loop {
            let result = {
                let mut join_set = self.join_set.lock().await;
                join_set.join_next().await
            };

            let Some(result) = result else {
                // The join set is empty, all workers have completed.
                break;
            };

            match result {
                Ok((worker_id, worker_result)) => {
                    if let Err(err) = worker_result {
                        error!(worker_id, error = %err, "worker completed with error");
                        errors.push(err);
                    }
                }
                Err(join_err) => {
                    if join_err.is_cancelled() {
                        debug!("worker task was cancelled");
                    } else {
                        errors.push(backfill_error!(
                            ErrorKind::WorkerPanic,
                            "Range worker panicked",
                            join_err
                        ));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bail;

    #[tokio::test]
    async fn wait_all_succeeds_when_every_worker_succeeds() {
        let pool = WorkerPool::new();
        for worker_id in 0..4 {
            pool.spawn(worker_id, async { Ok(()) }).await;
        }

        assert!(pool.wait_all().await.is_ok());
    }

    #[tokio::test]
    async fn wait_all_aggregates_worker_errors() {
        let pool = WorkerPool::new();
        pool.spawn(0, async { Ok(()) }).await;
        pool.spawn(1, async {
            bail!(ErrorKind::SourceQueryFailed, "statement failed")
        })
        .await;
        pool.spawn(2, async {
            bail!(ErrorKind::SourceQueryFailed, "statement failed")
        })
        .await;

        let err = pool.wait_all().await.unwrap_err();
        assert_eq!(err.kinds().len(), 2);
    }

    async fn panicking_worker() -> BackfillResult<()> {
        panic!("boom")
    }

    #[tokio::test]
    async fn wait_all_reports_panics_as_errors() {
        let pool = WorkerPool::new();
        pool.spawn(0, panicking_worker()).await;

        let err = pool.wait_all().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WorkerPanic);
    }

    #[tokio::test]
    async fn wait_all_on_empty_pool_returns_ok() {
        let pool = WorkerPool::new();
        assert!(pool.wait_all().await.is_ok());
    }
}
