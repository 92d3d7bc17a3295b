//! Change-feed source trait.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::SluiceResult;
use crate::types::{ChangeNotification, EventFilter};

/// A live feed of notifications for one table.
///
/// The feed runs until `cancel` is triggered or the source goes away, at
/// which point `receiver` yields `None`.
#[derive(Debug)]
pub struct FeedSubscription {
    pub receiver: mpsc::Receiver<ChangeNotification>,
    pub cancel: CancellationToken,
}

/// Source of row-level change notifications.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open a feed for `table` carrying the events selected by `filter`.
    async fn subscribe(&self, table: &str, filter: EventFilter) -> SluiceResult<FeedSubscription>;
}
