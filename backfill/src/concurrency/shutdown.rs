//! Cooperative shutdown signaling.
//!
//! Wraps a tokio watch channel into an explicit shutdown token pair. The
//! transmitter is held by the job orchestrator (and the signal handler in the
//! binary); every worker holds a receiver and polls it between chunks.

use tokio::sync::watch;

/// Transmitter side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    /// Signals shutdown to all receivers.
    ///
    /// Sending is idempotent, repeated calls have no further effect.
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }

    /// Creates a new receiver subscribed to this transmitter.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiver side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    /// Returns whether shutdown has been signaled.
    ///
    /// This is the check workers perform at every chunk boundary. A dropped
    /// transmitter counts as shutdown, since no component remains that could
    /// coordinate the job.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow() || self.0.has_changed().is_err()
    }

    /// Waits until shutdown is signaled.
    pub async fn signaled(&mut self) {
        // An error means the transmitter was dropped, which we treat the same
        // as an explicit signal.
        let _ = self.0.wait_for(|signaled| *signaled).await;
    }
}

/// Creates a new shutdown channel pair.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), ShutdownRx(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_is_observed_by_all_receivers() {
        let (tx, rx) = create_shutdown_channel();
        let other_rx = tx.subscribe();

        assert!(!rx.is_shutdown());
        assert!(!other_rx.is_shutdown());

        tx.shutdown();

        assert!(rx.is_shutdown());
        assert!(other_rx.is_shutdown());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let (tx, rx) = create_shutdown_channel();

        tx.shutdown();
        tx.shutdown();

        assert!(rx.is_shutdown());
    }

    #[tokio::test]
    async fn signaled_wakes_a_waiting_receiver() {
        let (tx, mut rx) = create_shutdown_channel();

        let waiter = tokio::spawn(async move {
            rx.signaled().await;
        });

        tx.shutdown();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_transmitter_counts_as_shutdown() {
        let (tx, rx) = create_shutdown_channel();
        drop(tx);

        assert!(rx.is_shutdown());
    }
}
