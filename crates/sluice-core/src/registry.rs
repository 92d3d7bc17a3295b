//! In-memory listener registry.
//!
//! Listeners are indexed by (source table, event type). The index is an
//! immutable snapshot behind an [`ArcSwap`]: a reload builds the new index
//! off to the side and publishes it with a single store, so concurrent
//! readers see either the old or the new set, never a mix.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, info, warn};

use crate::error::SluiceResult;
use crate::traits::ListenerStore;
use crate::types::{EventType, Listener};

/// Immutable lookup structure for listeners.
#[derive(Debug, Default, Clone)]
pub struct ListenerIndex {
    by_table: HashMap<String, HashMap<EventType, Vec<Arc<Listener>>>>,
    len: usize,
}

impl ListenerIndex {
    /// Build an index, keeping the input order within each key.
    pub fn from_listeners(listeners: impl IntoIterator<Item = Listener>) -> Self {
        let mut index = Self::default();
        for listener in listeners {
            index.insert(Arc::new(listener));
        }
        index
    }

    fn insert(&mut self, listener: Arc<Listener>) {
        self.by_table
            .entry(listener.source_table.clone())
            .or_default()
            .entry(listener.event)
            .or_default()
            .push(listener);
        self.len += 1;
    }

    /// Listeners registered for exactly this key.
    pub fn matching(&self, table: &str, event: EventType) -> &[Arc<Listener>] {
        self.by_table
            .get(table)
            .and_then(|events| events.get(&event))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.by_table.contains_key(table)
    }

    /// Distinct source tables referenced by any listener.
    pub fn tables(&self) -> BTreeSet<String> {
        self.by_table.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Owner of the live listener cache.
pub struct ListenerRegistry {
    index: ArcSwap<ListenerIndex>,
    store: Arc<dyn ListenerStore>,
}

impl ListenerRegistry {
    /// Create an empty registry backed by `store`.
    pub fn new(store: Arc<dyn ListenerStore>) -> Self {
        Self {
            index: ArcSwap::from_pointee(ListenerIndex::default()),
            store,
        }
    }

    /// Re-read every listener from the store and swap the index in.
    ///
    /// On store failure the current index is left untouched and the error
    /// is returned to the caller.
    pub async fn reload(&self) -> SluiceResult<usize> {
        let listeners = match self.store.list().await {
            Ok(listeners) => listeners,
            Err(e) => {
                warn!(error = %e, "Listener reload failed, keeping previous listeners");
                return Err(e);
            }
        };

        let index = ListenerIndex::from_listeners(listeners);
        let count = index.len();
        self.index.store(Arc::new(index));

        info!(count, "Loaded listener(s)");
        Ok(count)
    }

    /// Insert one listener. Returns `true` when its table was not yet
    /// referenced by any listener.
    pub fn add(&self, listener: Listener) -> bool {
        let table = listener.source_table.clone();
        let listener = Arc::new(listener);
        let previous = self.index.rcu(|current| {
            let mut next = ListenerIndex::clone(current);
            next.insert(listener.clone());
            next
        });

        info!(
            name = %listener.name,
            table = %listener.source_table,
            event = %listener.event,
            "Listener added"
        );
        !previous.has_table(&table)
    }

    /// Listeners registered for (table, event), in registration order.
    pub fn matching(&self, table: &str, event: EventType) -> Vec<Arc<Listener>> {
        let matches = self.index.load().matching(table, event).to_vec();
        debug!(table, %event, count = matches.len(), "Resolved listeners");
        matches
    }

    /// A consistent snapshot of the whole index.
    pub fn snapshot(&self) -> Arc<ListenerIndex> {
        self.index.load_full()
    }

    pub fn tables(&self) -> BTreeSet<String> {
        self.index.load().tables()
    }

    pub fn len(&self) -> usize {
        self.index.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
