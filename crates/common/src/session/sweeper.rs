use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::SessionStore;

/// Periodically remove expired sessions until `shutdown` fires
///
/// The first sweep happens one `every` after start. A failed sweep is
/// logged and retried on the next tick. Returns once the shutdown channel
/// receives a value or its sender is dropped.
pub async fn run_sweeper(
    store: Arc<SessionStore>,
    every: Duration,
    mut shutdown: watch::Receiver<()>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // Skip first immediate tick

    tracing::info!(bucket = store.bucket(), every = ?every, "session sweeper started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                break;
            }
            _ = ticker.tick() => {
                match store.sweep_expired(Utc::now()).await {
                    Ok(removed) => tracing::debug!(removed, "session sweep finished"),
                    Err(e) => tracing::error!(error = %e, "session sweep failed"),
                }
            }
        }
    }

    tracing::info!(bucket = store.bucket(), "session sweeper stopped");
}

/// Handle to a background [`run_sweeper`] task with its own shutdown channel
#[derive(Debug)]
pub struct Sweeper {
    shutdown: watch::Sender<()>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    pub fn spawn(store: Arc<SessionStore>, every: Duration) -> Self {
        let (shutdown, rx) = watch::channel(());
        let handle = tokio::spawn(run_sweeper(store, every, rx));
        Self { shutdown, handle }
    }

    /// Signal the task and wait for it to finish
    ///
    /// A sweep already in progress completes first.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "session sweeper task ended abnormally");
        }
    }
}
