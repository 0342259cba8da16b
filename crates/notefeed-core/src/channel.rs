use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use notefeed_types::{
    CollectionKey, Document, DocumentStore, OrderSpec, Origin, Record, SnapshotEvent, StoreError,
};

use crate::error::FeedError;
use crate::resolver::ReferenceResolver;

/// What a channel hands to its consumer.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The full, enriched, store-ordered result set. Replaces any earlier batch.
    Batch(Vec<Record>),
    /// The upstream query failed. The channel stays open and may recover.
    Error(StoreError),
}

pub type ChannelSink = Rc<dyn Fn(Origin, ChannelEvent)>;

/// One live query against one note collection.
///
/// Each upstream snapshot is decoded, enriched through the resolver on its own
/// local task and then published to the sink. Only the most recently started
/// enrichment may publish: every snapshot bumps the channel generation, and a
/// finished enrichment whose generation is no longer current is dropped.
/// Closing bumps the generation as well, so nothing started before `close`
/// can publish after it.
pub struct SubscriptionChannel {
    origin: Origin,
    store: Rc<dyn DocumentStore>,
    resolver: Rc<ReferenceResolver>,
    sink: ChannelSink,
    generation: Rc<Cell<u64>>,
    active: Option<Active>,
}

struct Active {
    live: Rc<Cell<bool>>,
    reader: JoinHandle<()>,
    enrichments: Rc<RefCell<Vec<JoinHandle<()>>>>,
}

impl SubscriptionChannel {
    pub fn new(
        origin: Origin,
        store: Rc<dyn DocumentStore>,
        resolver: Rc<ReferenceResolver>,
        sink: ChannelSink,
    ) -> Self {
        Self {
            origin,
            store,
            resolver,
            sink,
            generation: Rc::new(Cell::new(0)),
            active: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    /// Start watching `collection`. Must be called inside a `LocalSet`.
    pub fn open(&mut self, collection: &CollectionKey, order: &OrderSpec) -> Result<(), FeedError> {
        if self.active.is_some() {
            return Err(FeedError::InvalidState("channel is already open"));
        }

        let mut subscription = self
            .store
            .subscribe(collection, order)
            .map_err(FeedError::Subscribe)?;

        let live = Rc::new(Cell::new(true));
        let enrichments = Rc::new(RefCell::new(Vec::new()));
        let pump = Pump {
            origin: self.origin,
            resolver: Rc::clone(&self.resolver),
            sink: Rc::clone(&self.sink),
            generation: Rc::clone(&self.generation),
            live: Rc::clone(&live),
            enrichments: Rc::clone(&enrichments),
        };

        let reader = tokio::task::spawn_local(async move {
            while let Some(event) = subscription.next().await {
                pump.on_event(event);
            }
            debug!(origin = %pump.origin, "Subscription ended upstream");
        });

        info!(origin = %self.origin, collection = %collection, "Opened channel");
        self.active = Some(Active {
            live,
            reader,
            enrichments,
        });
        Ok(())
    }

    /// Stop watching. Once this returns the sink receives nothing more from
    /// this subscription, including enrichments still waiting on lookups.
    pub fn close(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        active.live.set(false);
        self.generation.set(self.generation.get() + 1);
        active.reader.abort();
        for task in active.enrichments.borrow_mut().drain(..) {
            task.abort();
        }

        info!(origin = %self.origin, "Closed channel");
    }
}

impl Drop for SubscriptionChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// State shared between the reader task and the enrichments it spawns.
#[derive(Clone)]
struct Pump {
    origin: Origin,
    resolver: Rc<ReferenceResolver>,
    sink: ChannelSink,
    generation: Rc<Cell<u64>>,
    live: Rc<Cell<bool>>,
    enrichments: Rc<RefCell<Vec<JoinHandle<()>>>>,
}

impl Pump {
    fn on_event(&self, event: SnapshotEvent) {
        match event {
            Ok(documents) => self.begin_enrichment(&documents),
            Err(e) => {
                warn!(origin = %self.origin, "Subscription error: {}", e);
                if self.live.get() {
                    (self.sink)(self.origin, ChannelEvent::Error(e));
                }
            }
        }
    }

    fn begin_enrichment(&self, documents: &[Document]) {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);

        let records = decode_batch(self.origin, documents);
        debug!(
            origin = %self.origin,
            generation,
            "Enriching {} records",
            records.len()
        );

        let pump = self.clone();
        let task = tokio::task::spawn_local(async move {
            let enriched = pump.resolver.enrich(records).await;
            pump.publish(generation, enriched);
        });

        let mut tasks = self.enrichments.borrow_mut();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    fn publish(&self, generation: u64, batch: Vec<Record>) {
        let current = self.generation.get();
        if !self.live.get() || current != generation {
            debug!(
                origin = %self.origin,
                generation,
                current,
                "Discarding stale enrichment"
            );
            return;
        }
        (self.sink)(self.origin, ChannelEvent::Batch(batch));
    }
}

/// Undecodable documents are skipped; the rest of the batch still goes out.
fn decode_batch(origin: Origin, documents: &[Document]) -> Vec<Record> {
    documents
        .iter()
        .filter_map(|doc| match Record::from_document(origin, doc) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(origin = %origin, id = %doc.id, "Skipping document: {}", e);
                None
            }
        })
        .collect()
}
