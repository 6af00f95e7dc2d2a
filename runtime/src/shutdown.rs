//! Cooperative shutdown signal for consumer loops.
//!
//! Workers hold a [`Shutdown`] handle and race it against the next message
//! pull; in-flight processing always runs to completion, so a message is
//! never left half-handled by shutdown.

use tokio::sync::watch;

/// Owning side of the shutdown signal.
#[derive(Debug)]
pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

impl ShutdownController {
    /// Creates a controller with no shutdown requested.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Hands out a handle for a worker loop.
    #[must_use]
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }

    /// Requests shutdown. All handles observe it; idempotent.
    pub fn trigger(&self) {
        // Send only fails when every receiver is gone, which is itself a
        // completed shutdown.
        let _ = self.tx.send(true);
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker-side handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested. Also resolves if the controller
    /// was dropped, so orphaned workers stop rather than spin.
    pub async fn triggered(&mut self) {
        if *self.rx.borrow_and_update() {
            return;
        }
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}
