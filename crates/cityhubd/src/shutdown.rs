//! Gateway-wide shutdown signal.
//!
//! Level-triggered: a task that starts watching after shutdown was triggered
//! still observes it, so tasks may subscribe at any point.

use tokio::sync::watch;

/// Raises the shutdown signal. Dropping it also stops every watcher.
pub struct ShutdownTrigger(watch::Sender<bool>);

/// Watches for shutdown. Cheap to clone; one per task.
#[derive(Clone)]
pub struct Shutdown(watch::Receiver<bool>);

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger(tx), Shutdown(rx))
}

impl ShutdownTrigger {
    /// Idempotent, and succeeds even when nobody is watching yet.
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown(self.0.subscribe())
    }
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once shutdown is triggered or the trigger is dropped.
    /// Cancel-safe.
    pub async fn wait(&mut self) {
        let _ = self.0.wait_for(|stop| *stop).await;
    }
}
