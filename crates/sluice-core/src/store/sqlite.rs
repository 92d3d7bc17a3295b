//! SQLite-backed configuration store, delivery log and observed rows.
//!
//! All SQLite calls run on the blocking pool. When a [`ChangeHub`] is
//! attached, every committed write publishes the matching change
//! notification, which makes the database its own change-feed source.
//! Publishing happens before the connection is released, so feed order
//! always equals commit order.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{SluiceError, SluiceResult};
use crate::feed::ChangeHub;
use crate::traits::{DeliveryLog, ListenerStore, LISTENERS_TABLE};
use crate::types::{
    ChangeNotification, DeliveryLogEntry, DeliveryOutcome, EventType, Listener, ListenerSummary,
    TargetType, ValidListener,
};

/// A row of an observed table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    pub id: Uuid,
    pub table: String,
    /// Row image as published on the change feed.
    pub data: Value,
}

/// SQLite store implementing [`ListenerStore`] and [`DeliveryLog`].
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    feed: Option<Arc<ChangeHub>>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub fn new(path: impl AsRef<Path>) -> SluiceResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> SluiceResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Create an in-memory store that publishes its writes to `feed`.
    pub fn in_memory_with_feed(feed: Arc<ChangeHub>) -> SluiceResult<Self> {
        Ok(Self::in_memory()?.with_feed(feed))
    }

    /// Open the database named by the engine configuration.
    pub fn open(config: &EngineConfig) -> SluiceResult<Self> {
        if config.is_in_memory() {
            debug!("Creating in-memory store");
            Self::in_memory()
        } else {
            debug!(path = %config.database_path.display(), "Creating file-backed store");
            Self::new(&config.database_path)
        }
    }

    /// Publish committed writes to `feed`.
    pub fn with_feed(mut self, feed: Arc<ChangeHub>) -> Self {
        self.feed = Some(feed);
        self
    }

    fn from_connection(conn: Connection) -> SluiceResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            feed: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> SluiceResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS listeners (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                source_table TEXT NOT NULL,
                event TEXT NOT NULL,
                target_type TEXT NOT NULL DEFAULT 'WEBHOOK',
                target_url TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_listeners_created ON listeners(created_at);

            CREATE TABLE IF NOT EXISTS event_logs (
                id TEXT PRIMARY KEY,
                listener_id TEXT NOT NULL,
                status TEXT NOT NULL,
                payload_sent TEXT NOT NULL,
                notification TEXT NOT NULL,
                response_summary TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_event_logs_created ON event_logs(created_at);
            CREATE INDEX IF NOT EXISTS idx_event_logs_listener ON event_logs(listener_id);

            CREATE TABLE IF NOT EXISTS table_rows (
                id TEXT PRIMARY KEY,
                table_name TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_table_rows_table ON table_rows(table_name);
        "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> SluiceResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SluiceError::internal("SQLite connection lock poisoned"))
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> SluiceResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> SluiceResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| SluiceError::internal("SQLite connection lock poisoned"))?;
            f(&mut conn)
        })
        .await?
    }

    /// Like [`Self::with_conn`], but `f` also returns the change it made.
    /// The change is published while the connection is still held.
    async fn write<T, F>(&self, f: F) -> SluiceResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> SluiceResult<(T, Option<ChangeNotification>)> + Send + 'static,
    {
        let conn = self.conn.clone();
        let feed = self.feed.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| SluiceError::internal("SQLite connection lock poisoned"))?;
            let (value, change) = f(&mut conn)?;
            if let (Some(feed), Some(change)) = (feed, change) {
                feed.publish(change);
            }
            Ok(value)
        })
        .await?
    }

    fn row_to_listener(row: &rusqlite::Row<'_>) -> SluiceResult<Listener> {
        let id: String = row.get(0)?;
        let name: String = row.get(1)?;
        let source_table: String = row.get(2)?;
        let event: String = row.get(3)?;
        let target_type: String = row.get(4)?;
        let target_url: String = row.get(5)?;
        let created_at: String = row.get(6)?;

        Ok(Listener {
            id: parse_uuid(&id)?,
            name,
            source_table,
            event: parse_event(&event)?,
            target_type: target_type
                .parse::<TargetType>()
                .map_err(|e| SluiceError::store(format!("corrupt target_type '{}': {}", target_type, e)))?,
            target_url,
            created_at: parse_timestamp(&created_at)?,
        })
    }

    fn row_to_log_entry(row: &rusqlite::Row<'_>) -> SluiceResult<DeliveryLogEntry> {
        let id: String = row.get(0)?;
        let listener_id: String = row.get(1)?;
        let status: String = row.get(2)?;
        let payload_sent: String = row.get(3)?;
        let notification: String = row.get(4)?;
        let response_summary: String = row.get(5)?;
        let created_at: String = row.get(6)?;
        let listener_name: Option<String> = row.get(7)?;
        let listener_table: Option<String> = row.get(8)?;
        let listener_event: Option<String> = row.get(9)?;

        let listener = match (listener_name, listener_table, listener_event) {
            (Some(name), Some(source_table), Some(event)) => Some(ListenerSummary {
                name,
                source_table,
                event: parse_event(&event)?,
            }),
            _ => None,
        };

        Ok(DeliveryLogEntry {
            outcome: DeliveryOutcome {
                id: parse_uuid(&id)?,
                listener_id: parse_uuid(&listener_id)?,
                status: status
                    .parse()
                    .map_err(|e| SluiceError::store(format!("corrupt status '{}': {}", status, e)))?,
                payload_sent: serde_json::from_str(&payload_sent)?,
                notification: serde_json::from_str(&notification)?,
                response_summary,
                created_at: parse_timestamp(&created_at)?,
            },
            listener,
        })
    }

    /// Insert a row into an observed table and publish an INSERT.
    pub async fn insert_row(&self, table: &str, data: Value) -> SluiceResult<StoredRow> {
        let table = table.trim().to_string();
        if table.is_empty() {
            return Err(SluiceError::validation(vec![crate::error::FieldError::new(
                "table",
                "Table is required",
            )]));
        }

        let id = Uuid::new_v4();
        let data = with_row_id(id, data);
        let row = StoredRow { id, table, data };

        self.write(move |conn| {
            conn.execute(
                "INSERT INTO table_rows (id, table_name, data, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    row.id.to_string(),
                    row.table,
                    serde_json::to_string(&row.data)?,
                    timestamp(Utc::now()),
                ],
            )?;
            let change = ChangeNotification::insert(&row.table, row.data.clone());
            Ok((row, Some(change)))
        })
        .await
    }

    /// Replace a row's data and publish an UPDATE with both images.
    pub async fn update_row(&self, id: Uuid, data: Value) -> SluiceResult<Option<StoredRow>> {
        let data = with_row_id(id, data);
        self.write(move |conn| {
            let tx = conn.transaction()?;
            let Some((table, before)) = select_row(&tx, id)? else {
                return Ok((None, None));
            };
            tx.execute(
                "UPDATE table_rows SET data = ?2 WHERE id = ?1",
                params![id.to_string(), serde_json::to_string(&data)?],
            )?;
            tx.commit()?;

            let change = ChangeNotification::update(&table, before, data.clone());
            Ok((Some(StoredRow { id, table, data }), Some(change)))
        })
        .await
    }

    /// Delete a row and publish a DELETE with its last image.
    pub async fn delete_row(&self, id: Uuid) -> SluiceResult<bool> {
        self.write(move |conn| {
            let tx = conn.transaction()?;
            let Some((table, before)) = select_row(&tx, id)? else {
                return Ok((false, None));
            };
            tx.execute("DELETE FROM table_rows WHERE id = ?1", params![id.to_string()])?;
            tx.commit()?;
            Ok((true, Some(ChangeNotification::delete(&table, before))))
        })
        .await
    }
}

#[async_trait]
impl ListenerStore for SqliteStore {
    async fn list(&self) -> SluiceResult<Vec<Listener>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"SELECT id, name, source_table, event, target_type, target_url, created_at
                   FROM listeners
                   ORDER BY created_at DESC, rowid DESC"#,
            )?;
            let results = stmt.query_map([], |row| Ok(Self::row_to_listener(row)))?;

            results
                .map(|r| r.map_err(SluiceError::from).and_then(|inner| inner))
                .collect()
        })
        .await
    }

    async fn insert(&self, fields: ValidListener) -> SluiceResult<Listener> {
        let listener = Listener::new(fields.name, fields.source_table, fields.event, fields.target_url);

        self.write(move |conn| {
            conn.execute(
                r#"INSERT INTO listeners (id, name, source_table, event, target_type, target_url, created_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
                params![
                    listener.id.to_string(),
                    listener.name,
                    listener.source_table,
                    listener.event.to_string(),
                    listener.target_type.to_string(),
                    listener.target_url,
                    timestamp(listener.created_at),
                ],
            )?;
            let change = ChangeNotification::insert(LISTENERS_TABLE, serde_json::to_value(&listener)?);
            Ok((listener, Some(change)))
        })
        .await
    }

    async fn delete(&self, id: Uuid) -> SluiceResult<bool> {
        self.write(move |conn| {
            let tx = conn.transaction()?;
            let previous = tx
                .query_row(
                    r#"SELECT id, name, source_table, event, target_type, target_url, created_at
                       FROM listeners WHERE id = ?1"#,
                    params![id.to_string()],
                    |row| Ok(Self::row_to_listener(row)),
                )
                .optional()?
                .transpose()?;
            let Some(listener) = previous else {
                return Ok((false, None));
            };
            tx.execute("DELETE FROM listeners WHERE id = ?1", params![id.to_string()])?;
            tx.commit()?;

            let change = ChangeNotification::delete(LISTENERS_TABLE, serde_json::to_value(&listener)?);
            Ok((true, Some(change)))
        })
        .await
    }
}

#[async_trait]
impl DeliveryLog for SqliteStore {
    async fn append(&self, outcome: &DeliveryOutcome) -> SluiceResult<()> {
        let outcome = outcome.clone();
        self.with_conn(move |conn| {
            conn.execute(
                r#"INSERT INTO event_logs
                   (id, listener_id, status, payload_sent, notification, response_summary, created_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
                params![
                    outcome.id.to_string(),
                    outcome.listener_id.to_string(),
                    outcome.status.to_string(),
                    serde_json::to_string(&outcome.payload_sent)?,
                    serde_json::to_string(&outcome.notification)?,
                    outcome.response_summary,
                    timestamp(outcome.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn recent(&self, limit: usize) -> SluiceResult<Vec<DeliveryLogEntry>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                r#"SELECT e.id, e.listener_id, e.status, e.payload_sent, e.notification,
                          e.response_summary, e.created_at, l.name, l.source_table, l.event
                   FROM event_logs e
                   LEFT JOIN listeners l ON l.id = e.listener_id
                   ORDER BY e.created_at DESC, e.rowid DESC
                   LIMIT ?1"#,
            )?;
            let results = stmt.query_map(params![limit as i64], |row| Ok(Self::row_to_log_entry(row)))?;

            results
                .map(|r| r.map_err(SluiceError::from).and_then(|inner| inner))
                .collect()
        })
        .await
    }
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> SluiceResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SluiceError::store(format!("corrupt timestamp '{}': {}", raw, e)))
}

fn parse_uuid(raw: &str) -> SluiceResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| SluiceError::store(format!("corrupt id '{}': {}", raw, e)))
}

fn parse_event(raw: &str) -> SluiceResult<EventType> {
    raw.parse()
        .map_err(|e| SluiceError::store(format!("corrupt event '{}': {}", raw, e)))
}

/// Table name and current image of an observed row.
fn select_row(conn: &Connection, id: Uuid) -> SluiceResult<Option<(String, Value)>> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT table_name, data FROM table_rows WHERE id = ?1",
            params![id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    row.map(|(table, data)| Ok((table, serde_json::from_str(&data)?)))
        .transpose()
}

/// Object rows carry their id; other JSON values are stored as given.
fn with_row_id(id: Uuid, data: Value) -> Value {
    match data {
        Value::Object(mut map) => {
            map.entry("id").or_insert_with(|| Value::String(id.to_string()));
            Value::Object(map)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ChangeFeed;
    use crate::types::{DeliveryResult, DeliveryStatus, EventFilter};
    use serde_json::json;

    fn valid(name: &str, table: &str, event: EventType) -> ValidListener {
        ValidListener {
            name: name.to_string(),
            source_table: table.to_string(),
            event,
            target_url: "https://sink.example/hook".to_string(),
        }
    }

    #[tokio::test]
    async fn test_listener_crud_newest_first() {
        let store = SqliteStore::in_memory().unwrap();
        let first = store.insert(valid("first", "orders", EventType::Insert)).await.unwrap();
        let second = store.insert(valid("second", "users", EventType::Delete)).await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1], first);
        assert_eq!(listed[0].target_type, TargetType::Webhook);

        assert!(store.delete(first.id).await.unwrap());
        assert!(!store.delete(first.id).await.unwrap());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_listener_writes_publish_changes() {
        let hub = Arc::new(ChangeHub::new());
        let store = SqliteStore::in_memory_with_feed(hub.clone()).unwrap();
        let mut feed = hub.subscribe(LISTENERS_TABLE, EventFilter::All).await.unwrap();

        let created = store.insert(valid("hook", "orders", EventType::Insert)).await.unwrap();
        let inserted = feed.receiver.recv().await.unwrap();
        assert_eq!(inserted.event_type, EventType::Insert);
        assert_eq!(inserted.after_image.unwrap()["name"], json!("hook"));

        // Deleting an unknown id publishes nothing.
        store.delete(Uuid::new_v4()).await.unwrap();
        store.delete(created.id).await.unwrap();
        let deleted = feed.receiver.recv().await.unwrap();
        assert_eq!(deleted.event_type, EventType::Delete);
        assert_eq!(deleted.before_image.unwrap()["id"], json!(created.id.to_string()));
    }

    #[tokio::test]
    async fn test_log_entries_join_listener() {
        let store = SqliteStore::in_memory().unwrap();
        let listener = store.insert(valid("hook", "orders", EventType::Insert)).await.unwrap();
        let notification = ChangeNotification::insert("orders", json!({"id": 1}));

        let ok = DeliveryOutcome::new(
            listener.id,
            &notification,
            notification.payload(),
            &DeliveryResult::succeeded(200, None),
        );
        let orphan = DeliveryOutcome::new(
            Uuid::new_v4(),
            &notification,
            notification.payload(),
            &DeliveryResult::failed("connection refused"),
        );
        store.append(&ok).await.unwrap();
        store.append(&orphan).await.unwrap();

        let entries = store.recent(100).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].outcome.id, orphan.id);
        assert_eq!(entries[0].outcome.status, DeliveryStatus::Failed);
        assert!(entries[0].listener.is_none());
        assert_eq!(entries[1].outcome, ok);
        assert_eq!(entries[1].listener.as_ref().unwrap().name, "hook");

        assert_eq!(store.recent(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_row_changes_carry_images() {
        let hub = Arc::new(ChangeHub::new());
        let store = SqliteStore::in_memory().unwrap().with_feed(hub.clone());
        let mut feed = hub.subscribe("orders", EventFilter::All).await.unwrap();

        let row = store
            .insert_row("orders", json!({"id": 1, "total": 42}))
            .await
            .unwrap();
        let insert = feed.receiver.recv().await.unwrap();
        assert_eq!(insert.after_image, Some(json!({"id": 1, "total": 42})));
        assert!(insert.before_image.is_none());

        store
            .update_row(row.id, json!({"id": 1, "total": 50}))
            .await
            .unwrap()
            .unwrap();
        let update = feed.receiver.recv().await.unwrap();
        assert_eq!(update.before_image, Some(json!({"id": 1, "total": 42})));
        assert_eq!(update.after_image, Some(json!({"id": 1, "total": 50})));

        assert!(store.delete_row(row.id).await.unwrap());
        let delete = feed.receiver.recv().await.unwrap();
        assert_eq!(delete.event_type, EventType::Delete);
        assert_eq!(delete.before_image, Some(json!({"id": 1, "total": 50})));
        assert!(delete.after_image.is_none());

        assert!(!store.delete_row(row.id).await.unwrap());
        assert!(store.update_row(row.id, json!({})).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_publish_in_commit_order() {
        let hub = Arc::new(ChangeHub::new());
        let store = SqliteStore::in_memory_with_feed(hub.clone()).unwrap();
        let mut feed = hub.subscribe("orders", EventFilter::Only(EventType::Update)).await.unwrap();
        let row = store.insert_row("orders", json!({"rev": 0})).await.unwrap();

        let writers = (1..=32).map(|rev| {
            let store = store.clone();
            tokio::spawn(async move { store.update_row(row.id, json!({"rev": rev})).await })
        });
        for result in futures::future::join_all(writers).await {
            assert!(result.unwrap().unwrap().is_some());
        }

        // Each update's before image is the previous update's after image.
        let mut current = json!({"rev": 0, "id": row.id.to_string()});
        for _ in 0..32 {
            let update = feed.receiver.recv().await.unwrap();
            assert_eq!(update.before_image.as_ref(), Some(&current));
            current = update.after_image.unwrap();
        }

        let mut deletes = hub.subscribe("orders", EventFilter::Only(EventType::Delete)).await.unwrap();
        assert!(store.delete_row(row.id).await.unwrap());
        let delete = deletes.receiver.recv().await.unwrap();
        assert_eq!(delete.before_image, Some(current));
    }

    #[tokio::test]
    async fn test_insert_row_assigns_id_and_requires_table() {
        let store = SqliteStore::in_memory().unwrap();
        let row = store.insert_row("users", json!({"email": "a@b.c"})).await.unwrap();
        assert_eq!(row.data["id"], json!(row.id.to_string()));

        let err = store.insert_row("  ", json!({})).await.unwrap_err();
        assert_eq!(err.field_errors()[0].field, "table");
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sluice.db");

        let id = {
            let store = SqliteStore::new(&path).unwrap();
            store.insert(valid("hook", "orders", EventType::Update)).await.unwrap().id
        };

        let reopened = SqliteStore::new(&path).unwrap();
        let listed = reopened.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
    }
}
