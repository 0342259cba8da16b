use std::rc::Rc;

use tokio::sync::watch;
use tracing::{info, warn};

use notefeed_types::api::{FeedItem, FeedSnapshot};
use notefeed_types::{DocumentStore, Origin, Reactions, Record};

use crate::channel::{ChannelEvent, ChannelSink, SubscriptionChannel};
use crate::config::FeedConfig;
use crate::deletion::DeletionGate;
use crate::error::FeedError;
use crate::merger::FeedFilter;
use crate::reactions::ReactionEngine;
use crate::resolver::ReferenceResolver;
use crate::session::Session;
use crate::state::{FeedState, FeedStatus};

/// The live note feed for one session.
///
/// Owns a personal and a shared [`SubscriptionChannel`] feeding one
/// [`FeedState`]. Every start builds a fresh [`ReferenceResolver`], so a
/// restart is also how stale display names get refreshed.
///
/// Local edits (confirmed reactions, deletions) are overwritten by whatever the
/// next upstream snapshot says; the subscription is the source of truth.
pub struct Feed {
    store: Rc<dyn DocumentStore>,
    config: Rc<FeedConfig>,
    session: Session,
    state: Rc<FeedState>,
    channels: Vec<SubscriptionChannel>,
}

impl Feed {
    pub fn new(store: Rc<dyn DocumentStore>, config: FeedConfig, session: Session) -> Self {
        Self {
            store,
            config: Rc::new(config),
            session,
            state: Rc::new(FeedState::new()),
            channels: Vec::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        !self.channels.is_empty()
    }

    /// Open both channels. Must be called inside a `LocalSet`.
    ///
    /// A channel the store refuses to open is reported in the status and the
    /// first such error is returned; the other channel keeps running.
    pub fn start(&mut self) -> Result<(), FeedError> {
        if self.is_running() {
            return Err(FeedError::InvalidState("feed is already running"));
        }

        let resolver = Rc::new(ReferenceResolver::new(
            Rc::clone(&self.store),
            &self.config,
            &self.session,
        ));
        let sink: ChannelSink = {
            let state = Rc::clone(&self.state);
            Rc::new(move |origin: Origin, event: ChannelEvent| state.apply(origin, event))
        };

        self.state.begin_loading(Origin::ALL);

        let order = self.config.order();
        let mut first_error = None;
        for origin in Origin::ALL {
            let mut channel = SubscriptionChannel::new(
                origin,
                Rc::clone(&self.store),
                Rc::clone(&resolver),
                Rc::clone(&sink),
            );
            match channel.open(self.config.collection(origin), &order) {
                Ok(()) => self.channels.push(channel),
                Err(e) => {
                    warn!(origin = %origin, "Could not open channel: {}", e);
                    if let FeedError::Subscribe(store_error) = &e {
                        self.state
                            .apply(origin, ChannelEvent::Error(store_error.clone()));
                    }
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Close both channels. The last feed stays readable.
    pub fn close(&mut self) {
        for mut channel in self.channels.drain(..) {
            channel.close();
        }
    }

    /// Follow an authentication change: resubscribe with a fresh resolver if
    /// the session differs. Returns whether anything changed.
    pub fn set_session(&mut self, session: Session) -> Result<bool, FeedError> {
        if session == self.session {
            return Ok(false);
        }

        info!(
            "Session changed to {:?} (elevated: {})",
            session.current_user(),
            session.has_elevated_privilege()
        );
        let was_running = self.is_running();
        self.close();
        self.session = session;
        if was_running {
            self.start()?;
        }
        Ok(true)
    }

    pub fn current_feed(&self) -> Vec<Record> {
        self.state.current_feed()
    }

    pub fn filtered_feed(&self, filter: FeedFilter) -> Vec<Record> {
        self.state.filtered(filter)
    }

    pub fn status(&self) -> FeedStatus {
        self.state.status()
    }

    pub fn changes(&self) -> watch::Receiver<u64> {
        self.state.changes()
    }

    /// Presentation view of the feed for the current viewer.
    pub fn snapshot(&self, filter: FeedFilter) -> FeedSnapshot {
        let viewer = self.session.current_user();
        let status = self.status();
        FeedSnapshot {
            items: self
                .filtered_feed(filter)
                .iter()
                .map(|record| FeedItem::from_record(record, &self.config.available_reactions, viewer))
                .collect(),
            loading: status.loading,
            error: status.message(),
        }
    }

    pub fn reactions(&self) -> ReactionEngine {
        ReactionEngine::new(
            Rc::clone(&self.store),
            Rc::clone(&self.state),
            Rc::clone(&self.config),
            self.session.clone(),
        )
    }

    pub fn deletion_gate(&self) -> DeletionGate {
        DeletionGate::new(
            Rc::clone(&self.store),
            Rc::clone(&self.state),
            Rc::clone(&self.config),
            self.session.clone(),
        )
    }

    /// Toggle `symbol` on the feed record `origin`/`id` for the session user.
    pub async fn toggle(&self, origin: Origin, id: &str, symbol: &str) -> Result<Reactions, FeedError> {
        self.session.require_user()?;
        let record = self.record(origin, id)?;
        self.reactions().toggle(&record, symbol).await
    }

    /// Delete the feed record `origin`/`id`. Superadmin only.
    pub async fn remove(&self, origin: Origin, id: &str) -> Result<(), FeedError> {
        self.session.require_elevated()?;
        let record = self.record(origin, id)?;
        self.deletion_gate().remove(&record).await
    }

    /// The current feed record `origin`/`id`.
    pub fn record(&self, origin: Origin, id: &str) -> Result<Record, FeedError> {
        self.state.find(origin, id).ok_or_else(|| FeedError::NotFound {
            origin,
            id: id.to_string(),
        })
    }
}
