//! Scripted in-memory document store for driving the feed in tests.
//!
//! Snapshots are pushed explicitly with `emit`; point reads come from the
//! documents stored with `put`. Every async operation yields once before it
//! touches state, so concurrent callers interleave the way they would against
//! a remote store.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};

use notefeed_types::{
    CollectionKey, Document, DocumentStore, OrderSpec, SnapshotEvent, StoreError,
    StoreSubscription,
};

type Key = (String, String);

#[derive(Default)]
pub struct ScriptedStore {
    docs: RefCell<HashMap<Key, Document>>,
    subscribers: RefCell<HashMap<String, Vec<mpsc::UnboundedSender<SnapshotEvent>>>>,
    gates: RefCell<HashMap<Key, watch::Receiver<bool>>>,
    reads: RefCell<HashMap<Key, usize>>,
    writes: RefCell<Vec<(Key, Map<String, Value>)>>,
    deletes: RefCell<Vec<Key>>,
    fail_reads: RefCell<HashMap<Key, StoreError>>,
    fail_next_write: RefCell<Option<StoreError>>,
    refuse_subscribe: RefCell<Option<StoreError>>,
}

/// Releases a held lookup when opened.
pub struct Gate(watch::Sender<bool>);

impl Gate {
    pub fn open(&self) {
        let _ = self.0.send(true);
    }
}

fn key(collection: &str, id: &str) -> Key {
    (collection.to_string(), id.to_string())
}

pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a document for point reads. Starts at revision 1.
    pub fn put(&self, collection: &str, id: &str, data: Value) {
        self.docs.borrow_mut().insert(
            key(collection, id),
            Document::new(id, object(data)).with_revision(1),
        );
    }

    pub fn doc(&self, collection: &str, id: &str) -> Option<Document> {
        self.docs.borrow().get(&key(collection, id)).cloned()
    }

    /// Push a full snapshot to every live subscriber of `collection`.
    pub fn emit(&self, collection: &str, docs: Vec<(&str, Value)>) {
        let docs: Vec<Document> = docs
            .into_iter()
            .map(|(id, data)| Document::new(id, object(data)))
            .collect();
        self.send(collection, || Ok(docs.clone()));
    }

    /// Push the stored documents of `collection` as a snapshot.
    pub fn emit_stored(&self, collection: &str) {
        let mut docs: Vec<Document> = self
            .docs
            .borrow()
            .iter()
            .filter(|((c, _), _)| c == collection)
            .map(|(_, doc)| doc.clone())
            .collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        self.send(collection, || Ok(docs.clone()));
    }

    pub fn emit_error(&self, collection: &str, error: StoreError) {
        self.send(collection, || Err(error.clone()));
    }

    fn send(&self, collection: &str, event: impl Fn() -> SnapshotEvent) {
        let mut subscribers = self.subscribers.borrow_mut();
        if let Some(senders) = subscribers.get_mut(collection) {
            senders.retain(|tx| tx.send(event()).is_ok());
        }
    }

    pub fn live_subscribers(&self, collection: &str) -> usize {
        self.subscribers
            .borrow()
            .get(collection)
            .map_or(0, |senders| senders.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Make `get_one(collection, id)` wait until the returned gate opens.
    pub fn hold(&self, collection: &str, id: &str) -> Gate {
        let (tx, rx) = watch::channel(false);
        self.gates.borrow_mut().insert(key(collection, id), rx);
        Gate(tx)
    }

    pub fn reads(&self, collection: &str, id: &str) -> usize {
        self.reads
            .borrow()
            .get(&key(collection, id))
            .copied()
            .unwrap_or(0)
    }

    pub fn writes(&self) -> usize {
        self.writes.borrow().len()
    }

    pub fn deletes(&self) -> usize {
        self.deletes.borrow().len()
    }

    pub fn fail_reads_of(&self, collection: &str, id: &str, error: StoreError) {
        self.fail_reads
            .borrow_mut()
            .insert(key(collection, id), error);
    }

    pub fn fail_next_write(&self, error: StoreError) {
        *self.fail_next_write.borrow_mut() = Some(error);
    }

    pub fn refuse_subscriptions(&self, error: StoreError) {
        *self.refuse_subscribe.borrow_mut() = Some(error);
    }
}

#[async_trait(?Send)]
impl DocumentStore for ScriptedStore {
    fn subscribe(
        &self,
        collection: &CollectionKey,
        _order: &OrderSpec,
    ) -> Result<StoreSubscription, StoreError> {
        if let Some(error) = self.refuse_subscribe.borrow().clone() {
            return Err(error);
        }
        let (tx, subscription) = StoreSubscription::channel();
        self.subscribers
            .borrow_mut()
            .entry(collection.as_str().to_string())
            .or_default()
            .push(tx);
        Ok(subscription)
    }

    async fn get_one(
        &self,
        collection: &CollectionKey,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        let k = key(collection.as_str(), id);
        *self.reads.borrow_mut().entry(k.clone()).or_default() += 1;

        let gate = self.gates.borrow().get(&k).cloned();
        match gate {
            Some(mut gate) => {
                let _ = gate.wait_for(|open| *open).await;
            }
            None => tokio::task::yield_now().await,
        }

        if let Some(error) = self.fail_reads.borrow().get(&k).cloned() {
            return Err(error);
        }
        Ok(self.docs.borrow().get(&k).cloned())
    }

    async fn update_fields(
        &self,
        collection: &CollectionKey,
        id: &str,
        fields: Map<String, Value>,
        expected_revision: Option<u64>,
    ) -> Result<(), StoreError> {
        tokio::task::yield_now().await;

        if let Some(error) = self.fail_next_write.borrow_mut().take() {
            return Err(error);
        }

        let k = key(collection.as_str(), id);
        let mut docs = self.docs.borrow_mut();
        let Some(doc) = docs.get_mut(&k) else {
            return Err(StoreError::NotFound {
                collection: k.0,
                id: k.1,
            });
        };

        let found = doc.revision.unwrap_or(0);
        if let Some(expected) = expected_revision {
            if expected != found {
                return Err(StoreError::Conflict {
                    collection: k.0,
                    id: k.1,
                    expected,
                    found,
                });
            }
        }

        for (field, value) in &fields {
            doc.data.insert(field.clone(), value.clone());
        }
        doc.revision = Some(found + 1);
        drop(docs);

        self.writes.borrow_mut().push((k, fields));
        Ok(())
    }

    async fn delete(&self, collection: &CollectionKey, id: &str) -> Result<(), StoreError> {
        tokio::task::yield_now().await;

        if let Some(error) = self.fail_next_write.borrow_mut().take() {
            return Err(error);
        }

        let k = key(collection.as_str(), id);
        self.docs.borrow_mut().remove(&k);
        self.deletes.borrow_mut().push(k);
        Ok(())
    }
}

/// Let every ready local task run to its next suspension point.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}
