//! Log sink trait for delivery outcomes.

use async_trait::async_trait;

use crate::error::SluiceResult;
use crate::types::{DeliveryLogEntry, DeliveryOutcome};

/// Append-only store of delivery outcomes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryLog: Send + Sync {
    async fn append(&self, outcome: &DeliveryOutcome) -> SluiceResult<()>;

    /// The most recent outcomes, newest first, joined with their listener.
    async fn recent(&self, limit: usize) -> SluiceResult<Vec<DeliveryLogEntry>>;
}
