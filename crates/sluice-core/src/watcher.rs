//! Configuration watcher.
//!
//! Subscribes to the listener-definition table itself and re-runs the full
//! bootstrap on every change. Bursts of changes that arrive while a reload
//! is running are folded into a single follow-up reload.

use std::sync::Weak;

use async_trait::async_trait;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::SluiceResult;
use crate::traits::ChangeFeed;
use crate::types::EventFilter;

/// Something that can re-synchronize itself with stored configuration.
#[async_trait]
pub trait Reloadable: Send + Sync {
    /// Run the full reload sequence, returning the number of listeners.
    async fn resync(&self) -> SluiceResult<usize>;
}

/// Handle to the running watcher task.
pub struct ConfigWatcher {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ConfigWatcher {
    /// Subscribe to `table` and start reacting to its changes.
    ///
    /// Fails if the feed cannot be opened. The watcher holds only a weak
    /// reference to `target` and exits once the target is dropped.
    pub async fn start(
        feed: &dyn ChangeFeed,
        table: &str,
        target: Weak<dyn Reloadable>,
    ) -> SluiceResult<Self> {
        let mut subscription = feed.subscribe(table, EventFilter::All).await?;
        let cancel = subscription.cancel.clone();
        let table = table.to_string();

        let task = tokio::spawn(async move {
            info!(table = %table, "Watching listener configuration");
            loop {
                let next = tokio::select! {
                    biased;
                    _ = subscription.cancel.cancelled() => break,
                    next = subscription.receiver.recv() => next,
                };
                let Some(change) = next else {
                    if !subscription.cancel.is_cancelled() {
                        error!(table = %table, "Configuration feed closed unexpectedly");
                    }
                    break;
                };

                let mut folded = 0usize;
                loop {
                    match subscription.receiver.try_recv() {
                        Ok(_) => folded += 1,
                        Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                    }
                }
                debug!(event = %change.event_type, folded, "Configuration change received");

                let Some(target) = target.upgrade() else {
                    break;
                };
                info!("Listener configuration changed, reloading");
                if let Err(e) = target.resync().await {
                    error!(error = %e, "Reload after configuration change failed");
                }
            }
            debug!(table = %table, "Configuration watcher stopped");
        });

        Ok(Self { cancel, task })
    }

    /// Stop the watcher and wait for it to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}
