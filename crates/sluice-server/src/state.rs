//! Server state management.

use std::sync::Arc;

use sluice_core::{ChangeHub, Engine, EngineConfig, SluiceResult, SqliteStore};
use tracing::info;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SqliteStore>,
    pub engine: Arc<Engine>,
}

impl AppState {
    pub fn new(store: Arc<SqliteStore>, engine: Arc<Engine>) -> Self {
        Self { store, engine }
    }

    /// Open the store, wire it to a change hub and build an engine over it.
    ///
    /// The engine is not started.
    pub fn from_config(config: &EngineConfig) -> SluiceResult<Self> {
        let hub = Arc::new(ChangeHub::with_capacity(config.feed_capacity));
        let store = Arc::new(SqliteStore::open(config)?.with_feed(hub.clone()));
        let engine = Engine::new(config, store.clone(), hub, store.clone())?;
        info!(in_memory = config.is_in_memory(), "Application state initialized");
        Ok(Self::new(store, engine))
    }
}
