//! Periodic idle-session sweeper.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;

use crate::lifecycle::SessionLifecycle;

/// Background task that finalizes idle sessions at a fixed interval.
pub struct Sweeper {
    lifecycle: Arc<SessionLifecycle>,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl Sweeper {
    pub fn new(lifecycle: Arc<SessionLifecycle>, interval: Duration) -> Self {
        Self {
            lifecycle,
            interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Sweep every `interval` until [`Sweeper::shutdown`] is called.
    pub async fn run(&self) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let expired = self.lifecycle.sweep_expired().await;
                    debug!(expired = expired.len(), "Idle sweep finished");
                }
                _ = self.shutdown.notified() => return,
            }
        }
    }

    /// Signal the sweeper to stop.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}
