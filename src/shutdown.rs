use anyhow::Result;
use tokio::sync::watch;
use tracing::info;

/// Graceful shutdown coordinator for the relay.
///
/// Subscribers get a `watch::Receiver<bool>` that flips to `true` once a
/// shutdown is requested, either by a signal or by `trigger()`.
pub struct ShutdownCoordinator {
    sender: watch::Sender<bool>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    pub fn trigger(&self) {
        // send_replace succeeds even with no live receivers
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// Wait for SIGINT/SIGTERM, then notify every subscriber
    pub async fn wait_for_signal(&self) -> Result<()> {
        info!("Shutdown coordinator ready - will shutdown gracefully on SIGINT/SIGTERM");

        #[cfg(unix)]
        {
            let mut terminate =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
            tokio::select! {
                result = tokio::signal::ctrl_c() => result?,
                _ = terminate.recv() => {}
            }
        }

        #[cfg(not(unix))]
        tokio::signal::ctrl_c().await?;

        info!("Shutdown signal received, stopping relay");
        self.trigger();
        Ok(())
    }
}

/// Resolve once the coordinator behind `receiver` has been triggered (or
/// dropped). Suitable for `axum::serve(..).with_graceful_shutdown(..)`.
pub async fn shutdown_requested(mut receiver: watch::Receiver<bool>) {
    // wait_for only errors when the sender is gone, which also means shut down.
    let _ = receiver.wait_for(|triggered| *triggered).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_subscribers() {
        let coordinator = ShutdownCoordinator::new();
        let receiver = coordinator.subscribe();
        assert!(!coordinator.is_triggered());

        let waiter = tokio::spawn(shutdown_requested(receiver));
        coordinator.trigger();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("subscriber should be woken")
            .unwrap();
        assert!(coordinator.is_triggered());
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_trigger() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.trigger();

        let receiver = coordinator.subscribe();
        tokio::time::timeout(Duration::from_secs(1), shutdown_requested(receiver))
            .await
            .expect("already-triggered shutdown should resolve immediately");
    }

    #[tokio::test]
    async fn test_dropped_coordinator_releases_waiters() {
        let coordinator = ShutdownCoordinator::new();
        let receiver = coordinator.subscribe();
        drop(coordinator);

        tokio::time::timeout(Duration::from_secs(1), shutdown_requested(receiver))
            .await
            .expect("dropped sender should release the waiter");
    }
}
