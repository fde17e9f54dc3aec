//! Interrupt propagation
//!
//! The Ctrl+C handler runs on its own thread and flips a watch channel.
//! Async code either polls [`Shutdown::is_triggered`] between chunks or
//! awaits [`Shutdown::triggered`] alongside a running child process.

use tokio::sync::watch;

/// Sending half, owned by the signal handler
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Request shutdown; safe to call from a non-async thread
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether shutdown was already requested
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Receiving half, cloned into every task that must stop on interrupt
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Check without waiting
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is requested
    ///
    /// If the trigger is dropped without firing this never resolves.
    pub async fn triggered(&mut self) {
        if self.rx.wait_for(|fired| *fired).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Create a connected trigger/receiver pair
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_waiter() {
        let (trigger, shutdown) = channel();
        let mut waiter = shutdown.clone();
        assert!(!shutdown.is_triggered());

        let handle = tokio::spawn(async move { waiter.triggered().await });
        trigger.trigger();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(shutdown.is_triggered());
        assert!(trigger.is_triggered());
    }

    #[tokio::test]
    async fn test_dropped_trigger_never_fires() {
        let (trigger, mut shutdown) = channel();
        drop(trigger);
        let waited = tokio::time::timeout(Duration::from_millis(50), shutdown.triggered()).await;
        assert!(waited.is_err());
    }
}
