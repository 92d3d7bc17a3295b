//! Configuration store trait.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::SluiceResult;
use crate::types::{Listener, ValidListener};

/// Name of the table holding listener definitions.
pub const LISTENERS_TABLE: &str = "listeners";

/// CRUD over persisted listener definitions.
///
/// The dispatch core only ever calls [`ListenerStore::list`]; the write
/// operations back the management surface.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ListenerStore: Send + Sync {
    /// All stored listeners, newest first.
    async fn list(&self) -> SluiceResult<Vec<Listener>>;

    /// Persist a validated listener and return the stored record.
    async fn insert(&self, fields: ValidListener) -> SluiceResult<Listener>;

    /// Delete by id. Returns whether a record was removed.
    async fn delete(&self, id: Uuid) -> SluiceResult<bool>;
}
