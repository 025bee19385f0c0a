//! Cooperative cancellation shared by the scheduler and the translation pipeline.

use tokio::sync::watch;
use tracing::warn;

/// Trigger side, owned by whoever decides to abort (Ctrl-C handler, tests)
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

/// Observer side, cloned into every long-running stage
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        // send_replace works even when no receiver is alive anymore
        self.tx.send_replace(true);
    }
}

impl ShutdownSignal {
    /// Create a linked handle/signal pair
    pub fn new() -> (ShutdownHandle, ShutdownSignal) {
        let (tx, rx) = watch::channel(false);
        (ShutdownHandle { tx }, ShutdownSignal { rx })
    }

    /// A signal that never fires
    pub fn never() -> ShutdownSignal {
        let (_handle, signal) = Self::new();
        signal
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the shutdown has been requested
    pub async fn triggered(&mut self) {
        if self.rx.wait_for(|stop| *stop).await.is_err() {
            // Sender dropped without firing: nothing can trigger us anymore.
            std::future::pending::<()>().await;
        }
    }
}

/// Trigger `handle` on the first Ctrl-C
pub fn install_ctrl_c(handle: ShutdownHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Keyboard interrupt detected, stopping after current work");
            handle.trigger();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_is_observed() {
        let (handle, mut signal) = ShutdownSignal::new();
        assert!(!signal.is_triggered());

        handle.trigger();
        assert!(signal.is_triggered());
        tokio::time::timeout(Duration::from_secs(1), signal.triggered())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_never_does_not_fire() {
        let mut signal = ShutdownSignal::never();
        assert!(!signal.is_triggered());
        let waited = tokio::time::timeout(Duration::from_millis(20), signal.triggered()).await;
        assert!(waited.is_err());
    }
}
