//! Cooperative lock refresher
//!
//! Launched when a lock is acquired, terminated on release. Renews at
//! TTL/3; the first refresh failure publishes an abort signal that the
//! reconciler observes between (and during) stages. A heartbeat failure
//! is a hard error for the deployment.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::{Lock, LockStore};

/// Handle to a running heartbeat task
pub struct Heartbeat {
    handle: JoinHandle<()>,
    abort_rx: watch::Receiver<bool>,
}

impl Heartbeat {
    /// Spawn the refresher for a held lock
    pub fn start(store: Arc<dyn LockStore>, lock: Lock, ttl: Duration) -> Self {
        let (abort_tx, abort_rx) = watch::channel(false);
        let interval = ttl / 3;

        let handle = tokio::spawn(async move {
            let mut current = lock;
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(100)));
            // The first tick fires immediately; skip it so the initial
            // acquisition's TTL is not double-counted.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match store.refresh(&current, ttl).await {
                    Ok(renewed) => {
                        debug!(key = %renewed.key, expires_at = %renewed.expires_at, "lock renewed");
                        current = renewed;
                    }
                    Err(err) => {
                        error!(key = %current.key, error = %err, "lock heartbeat failed; signalling abort");
                        let _ = abort_tx.send(true);
                        return;
                    }
                }
            }
        });

        Self { handle, abort_rx }
    }

    /// Receiver that flips to `true` when a refresh fails
    pub fn abort_signal(&self) -> watch::Receiver<bool> {
        self.abort_rx.clone()
    }

    /// Whether a refresh failure has been observed
    pub fn is_aborted(&self) -> bool {
        *self.abort_rx.borrow()
    }

    /// Stop renewing; called right before release
    pub fn stop(self) {
        self.handle.abort();
    }
}
