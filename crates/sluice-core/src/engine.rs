//! Dispatch engine.
//!
//! Wires the listener registry, the subscription multiplexer, the dispatch
//! pipeline and the configuration watcher together and owns their
//! lifecycle: bootstrap on start, full resync on configuration change,
//! graceful shutdown.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::delivery::{WebhookClient, WebhookSender};
use crate::dispatch::Dispatcher;
use crate::error::SluiceResult;
use crate::multiplexer::SubscriptionMultiplexer;
use crate::registry::ListenerRegistry;
use crate::traits::{ChangeFeed, DeliveryLog, ListenerStore, LISTENERS_TABLE};
use crate::types::{ChangeNotification, DeliveryOutcome, Listener};
use crate::watcher::{ConfigWatcher, Reloadable};

/// Point-in-time view of the engine for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub listeners: usize,
    pub subscriptions: BTreeSet<String>,
    pub watching: bool,
}

/// The running dispatcher.
///
/// # Example
///
/// ```ignore
/// use sluice_core::{ChangeHub, Engine, EngineConfig, SqliteStore};
///
/// let hub = Arc::new(ChangeHub::new());
/// let store = Arc::new(SqliteStore::in_memory_with_feed(hub.clone())?);
/// let engine = Engine::new(&EngineConfig::default(), store.clone(), hub, store)?;
///
/// engine.start().await?;
/// // ... listeners are dispatched until ...
/// engine.shutdown().await;
/// ```
pub struct Engine {
    registry: Arc<ListenerRegistry>,
    multiplexer: SubscriptionMultiplexer,
    dispatcher: Arc<Dispatcher>,
    feed: Arc<dyn ChangeFeed>,
    /// Serializes resync and incremental adds so teardown/ensure steps of
    /// two reloads never interleave.
    sync_lock: Mutex<()>,
    watcher: Mutex<Option<ConfigWatcher>>,
}

impl Engine {
    /// Create an engine delivering through a reqwest client.
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn ListenerStore>,
        feed: Arc<dyn ChangeFeed>,
        log: Arc<dyn DeliveryLog>,
    ) -> SluiceResult<Arc<Self>> {
        let client = WebhookClient::with_timeout(config.delivery_timeout())?;
        Ok(Self::with_sender(config, store, feed, log, Arc::new(client)))
    }

    /// Create an engine with a custom delivery implementation.
    pub fn with_sender(
        config: &EngineConfig,
        store: Arc<dyn ListenerStore>,
        feed: Arc<dyn ChangeFeed>,
        log: Arc<dyn DeliveryLog>,
        sender: Arc<dyn WebhookSender>,
    ) -> Arc<Self> {
        debug!(
            timeout_secs = config.delivery_timeout_secs,
            max_concurrent = config.max_concurrent_dispatches,
            "Creating engine"
        );

        let registry = Arc::new(ListenerRegistry::new(store));
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), sender, log));
        let multiplexer = SubscriptionMultiplexer::new(
            feed.clone(),
            dispatcher.clone(),
            config.max_concurrent_dispatches,
        );

        Arc::new(Self {
            registry,
            multiplexer,
            dispatcher,
            feed,
            sync_lock: Mutex::new(()),
            watcher: Mutex::new(None),
        })
    }

    /// Start watching the listener table, then bootstrap.
    ///
    /// The watcher feed is opened before the initial load, so a listener
    /// written while the bootstrap runs triggers a follow-up resync instead
    /// of being missed. A store failure on the initial load is logged and
    /// the engine starts with no listeners. Failure to open any change feed
    /// is returned as an error.
    pub async fn start(self: &Arc<Self>) -> SluiceResult<()> {
        let mut watcher = self.watcher.lock().await;
        if watcher.is_some() {
            return Ok(());
        }
        info!("Event engine starting");

        let weak_self: Weak<Self> = Arc::downgrade(self);
        let target: Weak<dyn Reloadable> = weak_self;
        let config_watcher = ConfigWatcher::start(self.feed.as_ref(), LISTENERS_TABLE, target).await?;

        if let Err(e) = self.bootstrap().await {
            config_watcher.stop().await;
            self.multiplexer.teardown_all().await;
            return Err(e);
        }
        *watcher = Some(config_watcher);

        info!(
            listeners = self.registry.len(),
            tables = self.registry.tables().len(),
            "Engine ready and listening for events"
        );
        Ok(())
    }

    async fn bootstrap(&self) -> SluiceResult<()> {
        let _guard = self.sync_lock.lock().await;
        if let Err(e) = self.registry.reload().await {
            warn!(error = %e, "Initial listener load failed, starting with no listeners");
        }
        self.multiplexer.teardown_all().await;
        for table in self.registry.tables() {
            self.multiplexer.ensure(&table).await?;
        }
        Ok(())
    }

    /// Reload listeners and rebuild every subscription.
    ///
    /// If the reload fails, neither the registry nor the subscriptions are
    /// touched. A table whose feed cannot be reopened is reported after the
    /// remaining tables have been covered.
    pub async fn resync(&self) -> SluiceResult<usize> {
        let _guard = self.sync_lock.lock().await;

        let count = self.registry.reload().await?;
        self.multiplexer.teardown_all().await;

        let mut first_error = None;
        for table in self.registry.tables() {
            if let Err(e) = self.multiplexer.ensure(&table).await {
                error!(table = %table, error = %e, "Failed to re-subscribe table");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(count),
        }
    }

    /// Register a listener and make sure its table is subscribed.
    pub async fn add_listener(&self, listener: Listener) -> SluiceResult<()> {
        let _guard = self.sync_lock.lock().await;
        let table = listener.source_table.clone();
        self.registry.add(listener);
        self.multiplexer.ensure(&table).await?;
        Ok(())
    }

    /// Dispatch a notification directly, bypassing the change feed.
    pub async fn dispatch(&self, notification: ChangeNotification) -> Vec<DeliveryOutcome> {
        self.dispatcher.dispatch(notification).await
    }

    /// Stop watching configuration and cancel every subscription.
    pub async fn shutdown(&self) {
        if let Some(watcher) = self.watcher.lock().await.take() {
            watcher.stop().await;
        }
        let _guard = self.sync_lock.lock().await;
        self.multiplexer.teardown_all().await;
        info!("Event engine stopped");
    }

    pub async fn status(&self) -> EngineStatus {
        let watching = self
            .watcher
            .lock()
            .await
            .as_ref()
            .map_or(false, ConfigWatcher::is_running);
        EngineStatus {
            listeners: self.registry.len(),
            subscriptions: self.multiplexer.tables().await,
            watching,
        }
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    /// Tables with a live subscription.
    pub async fn subscribed_tables(&self) -> BTreeSet<String> {
        self.multiplexer.tables().await
    }
}

#[async_trait]
impl Reloadable for Engine {
    async fn resync(&self) -> SluiceResult<usize> {
        Engine::resync(self).await
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("listeners", &self.registry.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SluiceError;
    use crate::feed::ChangeHub;
    use crate::traits::{FeedSubscription, MockDeliveryLog, MockListenerStore};
    use crate::types::{DeliveryResult, DeliveryStatus, EventFilter, EventType, ValidListener};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::sleep;
    use uuid::Uuid;

    struct OkSender;

    #[async_trait]
    impl WebhookSender for OkSender {
        async fn send(&self, _url: &str, _payload: &Value) -> DeliveryResult {
            DeliveryResult::succeeded(200, None)
        }
    }

    fn quiet_log() -> Arc<MockDeliveryLog> {
        let mut log = MockDeliveryLog::new();
        log.expect_append().returning(|_| Ok(()));
        Arc::new(log)
    }

    fn store_returning(sets: Vec<Vec<Listener>>) -> Arc<MockListenerStore> {
        let sets = StdMutex::new(sets.into_iter());
        let last = StdMutex::new(Vec::new());
        let mut store = MockListenerStore::new();
        store.expect_list().returning(move || {
            let mut last = last.lock().unwrap();
            if let Some(next) = sets.lock().unwrap().next() {
                *last = next;
            }
            Ok(last.clone())
        });
        Arc::new(store)
    }

    fn listener(name: &str, table: &str, event: EventType) -> Listener {
        Listener::new(name, table, event, "https://sink.example/hook")
    }

    #[tokio::test]
    async fn test_start_subscribes_every_table_once() {
        let hub = Arc::new(ChangeHub::new());
        let store = store_returning(vec![vec![
            listener("a", "orders", EventType::Insert),
            listener("b", "orders", EventType::Update),
            listener("c", "users", EventType::Delete),
        ]]);
        let engine = Engine::with_sender(
            &EngineConfig::default(),
            store,
            hub.clone(),
            quiet_log(),
            Arc::new(OkSender),
        );

        engine.start().await.unwrap();
        let status = engine.status().await;
        assert_eq!(status.listeners, 3);
        assert!(status.watching);
        assert_eq!(
            status.subscriptions.into_iter().collect::<Vec<_>>(),
            vec!["orders".to_string(), "users".to_string()]
        );
        assert_eq!(hub.subscriber_count("orders"), 1);

        engine.shutdown().await;
        assert!(engine.subscribed_tables().await.is_empty());
    }

    #[tokio::test]
    async fn test_resync_matches_subscriptions_to_listeners() {
        let hub = Arc::new(ChangeHub::new());
        let store = store_returning(vec![
            vec![
                listener("a", "orders", EventType::Insert),
                listener("b", "users", EventType::Insert),
            ],
            vec![
                listener("c", "users", EventType::Insert),
                listener("d", "payments", EventType::Delete),
            ],
        ]);
        let engine = Engine::with_sender(
            &EngineConfig::default(),
            store,
            hub,
            quiet_log(),
            Arc::new(OkSender),
        );
        engine.start().await.unwrap();

        assert_eq!(engine.resync().await.unwrap(), 2);
        assert_eq!(
            engine.subscribed_tables().await.into_iter().collect::<Vec<_>>(),
            vec!["payments".to_string(), "users".to_string()]
        );
        assert!(engine.registry().matching("orders", EventType::Insert).is_empty());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_resync_keeps_state() {
        let hub = Arc::new(ChangeHub::new());
        let mut store = MockListenerStore::new();
        let mut calls = 0;
        store.expect_list().returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(vec![listener("a", "orders", EventType::Insert)])
            } else {
                Err(SluiceError::store("connection reset"))
            }
        });
        let engine = Engine::with_sender(
            &EngineConfig::default(),
            Arc::new(store),
            hub.clone(),
            quiet_log(),
            Arc::new(OkSender),
        );
        engine.start().await.unwrap();

        assert!(engine.resync().await.is_err());
        assert_eq!(engine.registry().len(), 1);
        assert!(engine.subscribed_tables().await.contains("orders"));
        assert_eq!(hub.subscriber_count("orders"), 1);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_initial_load_failure_is_not_fatal() {
        let mut store = MockListenerStore::new();
        store
            .expect_list()
            .returning(|| Err(SluiceError::store("unreachable")));
        let engine = Engine::with_sender(
            &EngineConfig::default(),
            Arc::new(store),
            Arc::new(ChangeHub::new()),
            quiet_log(),
            Arc::new(OkSender),
        );

        engine.start().await.unwrap();
        assert_eq!(engine.status().await.listeners, 0);
        engine.shutdown().await;
    }

    struct NoFeed;

    #[async_trait]
    impl ChangeFeed for NoFeed {
        async fn subscribe(&self, table: &str, _filter: EventFilter) -> SluiceResult<FeedSubscription> {
            Err(SluiceError::subscription(table, "realtime unavailable"))
        }
    }

    #[tokio::test]
    async fn test_start_fails_without_feeds() {
        let store = store_returning(vec![vec![listener("a", "orders", EventType::Insert)]]);
        let engine = Engine::with_sender(
            &EngineConfig::default(),
            store,
            Arc::new(NoFeed),
            quiet_log(),
            Arc::new(OkSender),
        );

        let err = engine.start().await.unwrap_err();
        assert!(matches!(err, SluiceError::Subscription { .. }));
    }

    #[tokio::test]
    async fn test_add_listener_subscribes_new_table() {
        let hub = Arc::new(ChangeHub::new());
        let engine = Engine::with_sender(
            &EngineConfig::default(),
            store_returning(vec![vec![]]),
            hub.clone(),
            quiet_log(),
            Arc::new(OkSender),
        );
        engine.start().await.unwrap();
        assert!(engine.subscribed_tables().await.is_empty());

        engine
            .add_listener(listener("a", "orders", EventType::Insert))
            .await
            .unwrap();
        engine
            .add_listener(listener("b", "orders", EventType::Delete))
            .await
            .unwrap();

        assert_eq!(engine.subscribed_tables().await.len(), 1);
        assert_eq!(hub.subscriber_count("orders"), 1);

        let outcomes = engine
            .dispatch(ChangeNotification::insert("orders", json!({"id": 1})))
            .await;
        assert_eq!(outcomes.len(), 1);
        engine.shutdown().await;
    }

    /// Store whose first read races with a concurrent listener insert.
    struct RacingStore {
        hub: Arc<ChangeHub>,
        calls: AtomicUsize,
        first: Listener,
        second: Listener,
    }

    #[async_trait]
    impl ListenerStore for RacingStore {
        async fn list(&self) -> SluiceResult<Vec<Listener>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.hub.publish(ChangeNotification::insert(
                    LISTENERS_TABLE,
                    serde_json::to_value(&self.second)?,
                ));
                Ok(vec![self.first.clone()])
            } else {
                Ok(vec![self.first.clone(), self.second.clone()])
            }
        }

        async fn insert(&self, _fields: ValidListener) -> SluiceResult<Listener> {
            Err(SluiceError::internal("read-only"))
        }

        async fn delete(&self, _id: Uuid) -> SluiceResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_listener_written_during_start_is_picked_up() {
        let hub = Arc::new(ChangeHub::new());
        let store = Arc::new(RacingStore {
            hub: hub.clone(),
            calls: AtomicUsize::new(0),
            first: listener("a", "orders", EventType::Insert),
            second: listener("b", "users", EventType::Insert),
        });
        let engine = Engine::with_sender(
            &EngineConfig::default(),
            store.clone(),
            hub,
            quiet_log(),
            Arc::new(OkSender),
        );
        engine.start().await.unwrap();

        for _ in 0..100 {
            if engine.subscribed_tables().await.contains("users") {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(engine.registry().len(), 2);
        assert_eq!(
            engine.subscribed_tables().await.into_iter().collect::<Vec<_>>(),
            vec!["orders".to_string(), "users".to_string()]
        );
        assert!(store.calls.load(Ordering::SeqCst) >= 2);
        engine.shutdown().await;
    }

    /// Sender that parks every call until released.
    #[derive(Default)]
    struct GatedSender {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl WebhookSender for GatedSender {
        async fn send(&self, _url: &str, _payload: &Value) -> DeliveryResult {
            self.started.notify_one();
            self.release.notified().await;
            DeliveryResult::succeeded(200, None)
        }
    }

    #[derive(Default)]
    struct MemoryLog {
        outcomes: StdMutex<Vec<DeliveryOutcome>>,
    }

    #[async_trait]
    impl DeliveryLog for MemoryLog {
        async fn append(&self, outcome: &DeliveryOutcome) -> SluiceResult<()> {
            self.outcomes.lock().unwrap().push(outcome.clone());
            Ok(())
        }

        async fn recent(&self, _limit: usize) -> SluiceResult<Vec<crate::types::DeliveryLogEntry>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_in_flight_delivery_survives_listener_removal() {
        let doomed = listener("doomed", "orders", EventType::Insert);
        let doomed_id = doomed.id;
        let sender = Arc::new(GatedSender::default());
        let log = Arc::new(MemoryLog::default());
        let engine = Engine::with_sender(
            &EngineConfig::default(),
            store_returning(vec![vec![doomed], vec![]]),
            Arc::new(ChangeHub::new()),
            log.clone(),
            sender.clone(),
        );
        engine.start().await.unwrap();

        let dispatching = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .dispatch(ChangeNotification::insert("orders", json!({"id": 1})))
                    .await
            })
        };
        sender.started.notified().await;

        // The listener is gone from the store and the engine reloads.
        assert_eq!(engine.resync().await.unwrap(), 0);
        assert!(engine.registry().is_empty());
        assert!(engine.subscribed_tables().await.is_empty());

        sender.release.notify_one();
        let outcomes = dispatching.await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].listener_id, doomed_id);
        assert_eq!(outcomes[0].status, DeliveryStatus::Success);

        let logged = log.outcomes.lock().unwrap().clone();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].listener_id, doomed_id);
        engine.shutdown().await;
    }
}
