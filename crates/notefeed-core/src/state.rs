use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use tokio::sync::watch;
use tracing::debug;

use notefeed_types::{Origin, Reactions, Record};

use crate::channel::ChannelEvent;
use crate::merger::{FeedFilter, FeedMerger};

/// What the presentation layer shows besides the feed itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedStatus {
    /// True until every opened origin has reported a batch or an error.
    pub loading: bool,
    /// Last subscription failure per origin, cleared by that origin's next batch.
    pub subscription_errors: BTreeMap<Origin, String>,
    /// Last failed reaction or deletion, cleared by the next successful write.
    pub write_error: Option<String>,
}

impl FeedStatus {
    /// The message to display, write failures first.
    pub fn message(&self) -> Option<String> {
        self.write_error
            .clone()
            .or_else(|| self.subscription_errors.values().next().cloned())
    }
}

/// Merged feed and status, shared by the channels, the reaction engine and the
/// deletion gate. Lives on the feed's thread; borrows are never held across
/// an await.
pub struct FeedState {
    merger: RefCell<FeedMerger>,
    status: RefCell<FeedStatus>,
    pending: RefCell<BTreeSet<Origin>>,
    version: watch::Sender<u64>,
}

impl Default for FeedState {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedState {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            merger: RefCell::new(FeedMerger::new()),
            status: RefCell::new(FeedStatus::default()),
            pending: RefCell::new(BTreeSet::new()),
            version,
        }
    }

    /// Mark `origins` as awaiting their first delivery and clear old errors.
    pub fn begin_loading(&self, origins: impl IntoIterator<Item = Origin>) {
        let mut pending = self.pending.borrow_mut();
        pending.clear();
        pending.extend(origins);

        let mut status = self.status.borrow_mut();
        status.loading = !pending.is_empty();
        status.subscription_errors.clear();
        status.write_error = None;
        drop(status);
        drop(pending);
        self.bump();
    }

    /// Fold one channel event into the feed.
    pub fn apply(&self, origin: Origin, event: ChannelEvent) {
        match event {
            ChannelEvent::Batch(batch) => {
                debug!(origin = %origin, records = batch.len(), "Batch applied");
                self.merger.borrow_mut().update(origin, batch);
                self.status.borrow_mut().subscription_errors.remove(&origin);
            }
            ChannelEvent::Error(_) => {
                let message = format!("Failed to load {} notes.", origin);
                self.status
                    .borrow_mut()
                    .subscription_errors
                    .insert(origin, message);
            }
        }

        let mut pending = self.pending.borrow_mut();
        pending.remove(&origin);
        self.status.borrow_mut().loading = !pending.is_empty();
        drop(pending);
        self.bump();
    }

    /// Show a reaction mapping the store has confirmed.
    pub fn publish_reactions(&self, origin: Origin, id: &str, reactions: &Reactions) -> bool {
        let replaced = self
            .merger
            .borrow_mut()
            .replace_reactions(origin, id, reactions);
        self.status.borrow_mut().write_error = None;
        self.bump();
        replaced
    }

    /// Drop a record the store has confirmed deleted.
    pub fn remove_local(&self, origin: Origin, id: &str) -> bool {
        let removed = self.merger.borrow_mut().remove(origin, id);
        self.status.borrow_mut().write_error = None;
        self.bump();
        removed
    }

    pub fn record_write_error(&self, message: String) {
        self.status.borrow_mut().write_error = Some(message);
        self.bump();
    }

    pub fn current_feed(&self) -> Vec<Record> {
        self.merger.borrow().current_feed().to_vec()
    }

    pub fn filtered(&self, filter: FeedFilter) -> Vec<Record> {
        self.merger.borrow().filtered(filter)
    }

    pub fn find(&self, origin: Origin, id: &str) -> Option<Record> {
        self.merger.borrow().find(origin, id).cloned()
    }

    pub fn status(&self) -> FeedStatus {
        self.status.borrow().clone()
    }

    /// Bumped on every feed or status change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn bump(&self) {
        self.version.send_modify(|version| *version += 1);
    }
}
