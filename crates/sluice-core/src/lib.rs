//! sluice-core - Core library for sluice.
//!
//! This crate provides the types, traits and engine for the sluice
//! change-data-capture webhook dispatcher: listeners are stored as data,
//! row changes arrive on per-table feeds, and every matching listener gets
//! the changed row POSTed to its webhook with the outcome logged.
//!
//! # Example
//!
//! ```ignore
//! use sluice_core::{ChangeHub, Engine, EngineConfig, NewListener, SqliteStore};
//!
//! let config = EngineConfig::default().in_memory();
//! let hub = Arc::new(ChangeHub::with_capacity(config.feed_capacity));
//! let store = Arc::new(SqliteStore::open(&config)?.with_feed(hub.clone()));
//! let engine = Engine::new(&config, store.clone(), hub, store.clone())?;
//! engine.start().await?;
//!
//! // Register a listener; the engine reloads on its own.
//! let fields = NewListener::new("OrderHook", "orders", "INSERT", "https://sink.example/orders")
//!     .validate()?;
//! store.insert(fields).await?;
//!
//! // Any insert on "orders" is now delivered.
//! store.insert_row("orders", serde_json::json!({"total": 42})).await?;
//! ```

pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod feed;
pub mod multiplexer;
pub mod registry;
pub mod store;
pub mod traits;
pub mod types;
pub mod watcher;

// Re-export commonly used types
pub use config::EngineConfig;
pub use delivery::{WebhookClient, WebhookSender};
pub use dispatch::Dispatcher;
pub use engine::{Engine, EngineStatus};
pub use error::{ErrorCode, FieldError, SluiceError, SluiceResult};
pub use feed::ChangeHub;
pub use multiplexer::{NotificationHandler, SubscriptionMultiplexer};
pub use registry::{ListenerIndex, ListenerRegistry};
pub use store::{SqliteStore, StoredRow};
pub use traits::{ChangeFeed, DeliveryLog, FeedSubscription, ListenerStore, LISTENERS_TABLE};
pub use types::{
    parse_listener_id, ChangeNotification, DeliveryLogEntry, DeliveryOutcome, DeliveryResult,
    DeliveryStatus, EventFilter, EventType, Listener, ListenerSummary, NewListener, TargetType,
    ValidListener,
};
pub use watcher::{ConfigWatcher, Reloadable};
