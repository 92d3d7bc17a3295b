//! In-process change feed.
//!
//! [`ChangeHub`] keeps one tokio broadcast channel per table. Writers call
//! [`ChangeHub::publish`]; every [`ChangeFeed::subscribe`] call gets its own
//! forwarding task that filters by event type and stops as soon as the
//! subscription's cancellation token fires. Slow subscribers miss events
//! rather than blocking writers.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::SluiceResult;
use crate::traits::{ChangeFeed, FeedSubscription};
use crate::types::{ChangeNotification, EventFilter};

/// Default per-table channel capacity.
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

type Channels = Arc<RwLock<HashMap<String, broadcast::Sender<ChangeNotification>>>>;

/// Broadcast hub for row-level change notifications.
///
/// A table's channel exists only while at least one feed is open on it.
pub struct ChangeHub {
    channels: Channels,
    capacity: usize,
}

impl ChangeHub {
    /// Create a hub with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_FEED_CAPACITY)
    }

    /// Create a hub with custom per-table capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Attach a receiver, creating the table's channel if needed.
    fn attach(&self, table: &str) -> broadcast::Receiver<ChangeNotification> {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(table.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish a notification to every live feed on its table.
    ///
    /// Returns the number of feeds that received it. Never fails; with no
    /// open feed on the table the notification is dropped.
    pub fn publish(&self, notification: ChangeNotification) -> usize {
        let table = notification.table.clone();
        let event = notification.event_type;
        let delivered = self
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&table)
            .map_or(0, |sender| sender.send(notification).unwrap_or(0));
        debug!(table = %table, %event, delivered, "Published change");
        delivered
    }

    /// Number of live feeds on a table.
    pub fn subscriber_count(&self, table: &str) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .map_or(0, |sender| sender.receiver_count())
    }

    /// Number of tables with an open channel.
    pub fn table_count(&self) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop the table's channel once its last receiver is gone.
fn prune(channels: &Channels, table: &str) {
    let mut channels = channels.write().unwrap_or_else(PoisonError::into_inner);
    if channels
        .get(table)
        .is_some_and(|sender| sender.receiver_count() == 0)
    {
        channels.remove(table);
        debug!(table = %table, "Removed idle change channel");
    }
}

#[async_trait]
impl ChangeFeed for ChangeHub {
    async fn subscribe(&self, table: &str, filter: EventFilter) -> SluiceResult<FeedSubscription> {
        let mut source = self.attach(table);
        let (tx, receiver) = mpsc::channel(self.capacity);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let table = table.to_string();
        let channels = self.channels.clone();

        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    next = source.recv() => next,
                };

                match next {
                    Ok(notification) => {
                        if !filter.matches(notification.event_type) {
                            continue;
                        }
                        let sent = tokio::select! {
                            biased;
                            _ = token.cancelled() => break,
                            sent = tx.send(notification) => sent,
                        };
                        if sent.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(table = %table, skipped = n, "Change feed lagged, notifications dropped");
                    }
                }
            }
            drop(source);
            prune(&channels, &table);
            debug!(table = %table, "Change feed closed");
        });

        Ok(FeedSubscription { receiver, cancel })
    }
}
