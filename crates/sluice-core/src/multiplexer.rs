//! Subscription multiplexer.
//!
//! Keeps exactly one change-feed subscription per table, however many
//! listeners target it. Each subscription gets a pump task that pulls
//! notifications off the feed in arrival order and hands them to a
//! bounded pool of dispatch tasks.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{SluiceError, SluiceResult};
use crate::traits::{ChangeFeed, FeedSubscription};
use crate::types::{ChangeNotification, EventFilter};

/// Default upper bound on notifications being dispatched at once.
pub const DEFAULT_MAX_CONCURRENT_DISPATCHES: usize = 64;

/// Entry point for notifications coming off a feed.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, notification: ChangeNotification);
}

struct ActiveSubscription {
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

impl ActiveSubscription {
    fn is_live(&self) -> bool {
        !self.pump.is_finished()
    }
}

/// One live subscription per watched table.
pub struct SubscriptionMultiplexer {
    feed: Arc<dyn ChangeFeed>,
    handler: Arc<dyn NotificationHandler>,
    subscriptions: Mutex<HashMap<String, ActiveSubscription>>,
    permits: Arc<Semaphore>,
}

impl SubscriptionMultiplexer {
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        handler: Arc<dyn NotificationHandler>,
        max_concurrent_dispatches: usize,
    ) -> Self {
        Self {
            feed,
            handler,
            subscriptions: Mutex::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(max_concurrent_dispatches.max(1))),
        }
    }

    /// Open a feed for `table` unless a live one already exists.
    ///
    /// Returns `true` when a new subscription was opened. The lookup and
    /// the insert happen under one lock, so concurrent calls for the same
    /// table open a single feed.
    pub async fn ensure(&self, table: &str) -> SluiceResult<bool> {
        let mut subscriptions = self.subscriptions.lock().await;

        match subscriptions.get(table) {
            Some(existing) if existing.is_live() => return Ok(false),
            Some(_) => {
                warn!(table, "Replacing dead change feed");
                subscriptions.remove(table);
            }
            None => {}
        }

        let feed = self
            .feed
            .subscribe(table, EventFilter::All)
            .await
            .map_err(|e| SluiceError::subscription(table, e.to_string()))?;
        let cancel = feed.cancel.clone();
        let pump = tokio::spawn(pump(
            table.to_string(),
            feed,
            self.handler.clone(),
            self.permits.clone(),
        ));

        subscriptions.insert(table.to_string(), ActiveSubscription { cancel, pump });
        info!(table, "Now listening to table");
        Ok(true)
    }

    /// Cancel every subscription and wait for their pumps to stop.
    ///
    /// Once this returns no further notification from the old feeds is
    /// handed to the dispatcher. Dispatches already started run to
    /// completion.
    pub async fn teardown_all(&self) -> usize {
        let drained: Vec<(String, ActiveSubscription)> =
            self.subscriptions.lock().await.drain().collect();

        for (_, subscription) in &drained {
            subscription.cancel.cancel();
        }

        let count = drained.len();
        for (table, subscription) in drained {
            if let Err(e) = subscription.pump.await {
                warn!(table = %table, error = %e, "Subscription pump ended abnormally");
            }
            debug!(table = %table, "Subscription torn down");
        }

        if count > 0 {
            info!(count, "Tore down subscriptions");
        }
        count
    }

    /// Tables with a live subscription.
    pub async fn tables(&self) -> BTreeSet<String> {
        self.subscriptions
            .lock()
            .await
            .iter()
            .filter(|(_, s)| s.is_live())
            .map(|(table, _)| table.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.tables().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

async fn pump(
    table: String,
    mut feed: FeedSubscription,
    handler: Arc<dyn NotificationHandler>,
    permits: Arc<Semaphore>,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = feed.cancel.cancelled() => break,
            next = feed.receiver.recv() => next,
        };

        let Some(notification) = next else {
            if !feed.cancel.is_cancelled() {
                error!(
                    table = %table,
                    "Change feed closed unexpectedly; table is not covered until it is re-subscribed"
                );
            }
            break;
        };

        let permit = tokio::select! {
            biased;
            _ = feed.cancel.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let handler = handler.clone();
        tokio::spawn(async move {
            handler.handle(notification).await;
            drop(permit);
        });
    }
}
