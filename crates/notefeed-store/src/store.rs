use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, error};

use notefeed_types::{
    CollectionKey, Document, DocumentStore, OrderSpec, StoreError, StoreSubscription,
};

use crate::SqliteStore;
use crate::models::WriteOutcome;

impl SqliteStore {
    /// Number of live queries on `collection`.
    pub fn watcher_count(&self, collection: &str) -> usize {
        self.inner.watchers.count(collection)
    }
}

fn backend(e: anyhow::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Run a synchronous store call off the async thread.
async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StoreError::Backend(e.to_string())
        })?
        .map_err(backend)
}

#[async_trait(?Send)]
impl DocumentStore for SqliteStore {
    fn subscribe(
        &self,
        collection: &CollectionKey,
        order: &OrderSpec,
    ) -> Result<StoreSubscription, StoreError> {
        let (tx, subscription) = StoreSubscription::channel();
        self.with_conn(|conn| {
            self.inner
                .watchers
                .add(conn, collection.as_str(), order.clone(), tx)
        })
        .map_err(backend)?;
        Ok(subscription)
    }

    async fn get_one(
        &self,
        collection: &CollectionKey,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        let store = self.clone();
        let (collection, id) = (collection.to_string(), id.to_string());
        blocking(move || store.get_document(&collection, &id)).await
    }

    async fn update_fields(
        &self,
        collection: &CollectionKey,
        id: &str,
        fields: Map<String, Value>,
        expected_revision: Option<u64>,
    ) -> Result<(), StoreError> {
        let store = self.clone();
        let (name, key) = (collection.to_string(), id.to_string());
        let outcome =
            blocking(move || store.update_document(&name, &key, &fields, expected_revision)).await?;

        match outcome {
            WriteOutcome::Written { revision } => {
                debug!("Updated {}/{} to revision {}", collection, id, revision);
                Ok(())
            }
            WriteOutcome::Missing => Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            }),
            WriteOutcome::Conflict { found } => Err(StoreError::Conflict {
                collection: collection.to_string(),
                id: id.to_string(),
                expected: expected_revision.unwrap_or_default(),
                found,
            }),
        }
    }

    /// Deleting a document that is already gone succeeds.
    async fn delete(&self, collection: &CollectionKey, id: &str) -> Result<(), StoreError> {
        let store = self.clone();
        let (name, key) = (collection.to_string(), id.to_string());
        if !blocking(move || store.delete_document(&name, &key)).await? {
            debug!("Delete of missing document {}/{}", collection, id);
        }
        Ok(())
    }
}
