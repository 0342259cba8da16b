//! The document-store capability consumed by the feed core.
//!
//! The store itself (persistence, query engine, access rules) lives elsewhere;
//! this module only fixes the shape of subscribe / read / update / delete.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::models::Document;

/// Name of a remote collection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CollectionKey(String);

impl CollectionKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Store-level ordering of a watched query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSpec {
    pub field: String,
    pub direction: Direction,
}

impl OrderSpec {
    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Descending,
        }
    }

    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Ascending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },
    #[error("revision conflict on {collection}/{id}: expected {expected}, found {found}")]
    Conflict {
        collection: String,
        id: String,
        expected: u64,
        found: u64,
    },
    #[error("store backend error: {0}")]
    Backend(String),
}

/// One delivery on a live query: the full ordered result set, or a failure.
pub type SnapshotEvent = Result<Vec<Document>, StoreError>;

/// Receiving end of a live query. Dropping it (or calling
/// [`StoreSubscription::unsubscribe`]) releases the upstream listener.
#[derive(Debug)]
pub struct StoreSubscription {
    events: mpsc::UnboundedReceiver<SnapshotEvent>,
}

impl StoreSubscription {
    /// Create a connected sender / subscription pair.
    pub fn channel() -> (mpsc::UnboundedSender<SnapshotEvent>, Self) {
        let (tx, events) = mpsc::unbounded_channel();
        (tx, Self { events })
    }

    /// Wait for the next snapshot. `None` once the store side has gone away.
    pub async fn next(&mut self) -> Option<SnapshotEvent> {
        self.events.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.events.close();
    }
}

#[async_trait(?Send)]
pub trait DocumentStore {
    /// Start a live query. The current result set is delivered as the first event.
    fn subscribe(
        &self,
        collection: &CollectionKey,
        order: &OrderSpec,
    ) -> Result<StoreSubscription, StoreError>;

    async fn get_one(
        &self,
        collection: &CollectionKey,
        id: &str,
    ) -> Result<Option<Document>, StoreError>;

    /// Merge `fields` into the top level of a document. With `expected_revision`
    /// set, fails with [`StoreError::Conflict`] unless the stored revision matches.
    async fn update_fields(
        &self,
        collection: &CollectionKey,
        id: &str,
        fields: Map<String, Value>,
        expected_revision: Option<u64>,
    ) -> Result<(), StoreError>;

    async fn delete(&self, collection: &CollectionKey, id: &str) -> Result<(), StoreError>;
}
