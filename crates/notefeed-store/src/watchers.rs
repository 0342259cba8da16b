use std::collections::HashMap;
use std::sync::Mutex;

use rusqlite::Connection;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use notefeed_types::{OrderSpec, SnapshotEvent, StoreError};

use crate::queries::query_documents;

/// One live query on a collection.
struct Watcher {
    order: OrderSpec,
    tx: mpsc::UnboundedSender<SnapshotEvent>,
}

/// Live queries by collection. Every mutation re-runs the affected queries
/// and pushes the full result to each watcher; closed watchers are dropped.
#[derive(Default)]
pub(crate) struct Watchers {
    by_collection: Mutex<HashMap<String, Vec<Watcher>>>,
}

impl Watchers {
    /// Send the current result to `tx` and keep it posted on later changes.
    /// The caller holds the connection lock, so no write can slip in between.
    pub(crate) fn add(
        &self,
        conn: &Connection,
        collection: &str,
        order: OrderSpec,
        tx: mpsc::UnboundedSender<SnapshotEvent>,
    ) -> anyhow::Result<()> {
        let docs = query_documents(conn, collection, &order)?;
        let mut watchers = self
            .by_collection
            .lock()
            .map_err(|e| anyhow::anyhow!("watcher lock poisoned: {}", e))?;

        if tx.send(Ok(docs)).is_ok() {
            debug!("Watching {} ordered by {}", collection, order.field);
            watchers
                .entry(collection.to_string())
                .or_default()
                .push(Watcher { order, tx });
        }
        Ok(())
    }

    pub(crate) fn notify(&self, conn: &Connection, collection: &str) {
        let mut watchers = match self.by_collection.lock() {
            Ok(watchers) => watchers,
            Err(e) => {
                error!("watcher lock poisoned: {}", e);
                return;
            }
        };
        let Some(list) = watchers.get_mut(collection) else {
            return;
        };

        let before = list.len();
        list.retain(|watcher| {
            if watcher.tx.is_closed() {
                return false;
            }
            let event = query_documents(conn, collection, &watcher.order).map_err(|e| {
                warn!("Live query on {} failed: {}", collection, e);
                StoreError::Backend(e.to_string())
            });
            watcher.tx.send(event).is_ok()
        });

        let removed = before - list.len();
        if removed > 0 {
            debug!("Dropped {} closed watchers on {}", removed, collection);
        }
        if list.is_empty() {
            watchers.remove(collection);
        }
    }

    pub(crate) fn count(&self, collection: &str) -> usize {
        self.by_collection
            .lock()
            .map(|watchers| watchers.get(collection).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}
