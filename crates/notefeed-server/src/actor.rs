//! The feed lives on its own thread.
//!
//! [`Feed`] is single-threaded (`Rc` state, `spawn_local` tasks), so it runs on
//! a current-thread runtime inside a `LocalSet`. Handlers talk to it through
//! [`FeedHandle`], which queues commands and awaits a oneshot reply.
//!
//! Writes name the caller's session; they are refused unless it is the
//! session the feed is currently running as.

use std::rc::Rc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::LocalSet;
use tracing::{debug, error, info, warn};

use notefeed_core::{Feed, FeedConfig, FeedError, FeedFilter, Session};
use notefeed_store::SqliteStore;
use notefeed_types::api::{FeedSnapshot, SessionResponse, ToggleReactionResponse};
use notefeed_types::{DocumentStore, Origin};

#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error("the feed is signed in as another user")]
    SessionMismatch,
    #[error("feed actor has stopped")]
    Stopped,
}

type Reply<T> = oneshot::Sender<Result<T, ActorError>>;

enum FeedCommand {
    Snapshot {
        filter: FeedFilter,
        reply: oneshot::Sender<FeedSnapshot>,
    },
    Toggle {
        caller: Session,
        origin: Origin,
        id: String,
        emoji: String,
        reply: Reply<ToggleReactionResponse>,
    },
    Remove {
        caller: Session,
        origin: Origin,
        id: String,
        reply: Reply<()>,
    },
    SignIn {
        session: Session,
        reply: Reply<SessionResponse>,
    },
    SignOut {
        caller: Session,
        reply: Reply<SessionResponse>,
    },
}

#[derive(Clone)]
pub struct FeedHandle {
    tx: mpsc::UnboundedSender<FeedCommand>,
}

impl FeedHandle {
    /// Start the feed thread with an anonymous session.
    pub fn spawn(store: SqliteStore, config: FeedConfig) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (tx, rx) = mpsc::unbounded_channel();

        std::thread::Builder::new()
            .name("notefeed-feed".into())
            .spawn(move || {
                let local = LocalSet::new();
                local.block_on(&runtime, run(store, config, rx));
                info!("Feed actor stopped");
            })?;

        Ok(Self { tx })
    }

    pub async fn snapshot(&self, filter: FeedFilter) -> Result<FeedSnapshot, ActorError> {
        let (reply, rx) = oneshot::channel();
        self.send(FeedCommand::Snapshot { filter, reply })?;
        rx.await.map_err(|_| ActorError::Stopped)
    }

    pub async fn toggle(
        &self,
        caller: Session,
        origin: Origin,
        id: String,
        emoji: String,
    ) -> Result<ToggleReactionResponse, ActorError> {
        let (reply, rx) = oneshot::channel();
        self.send(FeedCommand::Toggle {
            caller,
            origin,
            id,
            emoji,
            reply,
        })?;
        rx.await.map_err(|_| ActorError::Stopped)?
    }

    pub async fn remove(&self, caller: Session, origin: Origin, id: String) -> Result<(), ActorError> {
        let (reply, rx) = oneshot::channel();
        self.send(FeedCommand::Remove {
            caller,
            origin,
            id,
            reply,
        })?;
        rx.await.map_err(|_| ActorError::Stopped)?
    }

    /// Switch the feed to `session`, resubscribing if it changed.
    pub async fn sign_in(&self, session: Session) -> Result<SessionResponse, ActorError> {
        let (reply, rx) = oneshot::channel();
        self.send(FeedCommand::SignIn { session, reply })?;
        rx.await.map_err(|_| ActorError::Stopped)?
    }

    /// Return the feed to anonymous. Only the active session may do this.
    pub async fn sign_out(&self, caller: Session) -> Result<SessionResponse, ActorError> {
        let (reply, rx) = oneshot::channel();
        self.send(FeedCommand::SignOut { caller, reply })?;
        rx.await.map_err(|_| ActorError::Stopped)?
    }

    fn send(&self, command: FeedCommand) -> Result<(), ActorError> {
        self.tx.send(command).map_err(|_| ActorError::Stopped)
    }
}

fn check_caller(feed: &Feed, caller: &Session) -> Result<(), ActorError> {
    if caller == feed.session() {
        Ok(())
    } else {
        warn!(
            caller = ?caller.current_user(),
            active = ?feed.session().current_user(),
            "Refusing write from a session the feed is not running as"
        );
        Err(ActorError::SessionMismatch)
    }
}

fn switch_session(feed: &mut Feed, session: Session) -> Result<SessionResponse, ActorError> {
    let changed = feed.set_session(session).map_err(|e| {
        warn!("Feed restart after session change failed: {}", e);
        e
    })?;
    if !changed {
        debug!("Session unchanged");
    }
    Ok(SessionResponse {
        user_id: feed.session().current_user().map(str::to_string),
        elevated: feed.session().has_elevated_privilege(),
    })
}

async fn run(store: SqliteStore, config: FeedConfig, mut rx: mpsc::UnboundedReceiver<FeedCommand>) {
    let store: Rc<dyn DocumentStore> = Rc::new(store);
    let mut feed = Feed::new(store, config, Session::anonymous());
    if let Err(e) = feed.start() {
        error!("Feed started with errors: {}", e);
    }
    info!("Feed actor running");

    while let Some(command) = rx.recv().await {
        match command {
            FeedCommand::Snapshot { filter, reply } => {
                let _ = reply.send(feed.snapshot(filter));
            }
            FeedCommand::Toggle {
                caller,
                origin,
                id,
                emoji,
                reply,
            } => {
                // Writes run as their own tasks so a slow store does not hold
                // up snapshots or session changes.
                let engine = feed.reactions();
                let user = feed.session().current_user().map(str::to_string);
                let record = check_caller(&feed, &caller).and_then(|_| {
                    feed.session().require_user()?;
                    Ok(feed.record(origin, &id)?)
                });
                tokio::task::spawn_local(async move {
                    let result = match record {
                        Ok(record) => engine
                            .toggle(&record, &emoji)
                            .await
                            .map(|reactions| ToggleReactionResponse {
                                reacted: user
                                    .as_deref()
                                    .is_some_and(|user| reactions.contains(&emoji, user)),
                                reactions,
                            })
                            .map_err(ActorError::from),
                        Err(e) => Err(e),
                    };
                    let _ = reply.send(result);
                });
            }
            FeedCommand::Remove {
                caller,
                origin,
                id,
                reply,
            } => {
                let gate = feed.deletion_gate();
                let record = check_caller(&feed, &caller).and_then(|_| {
                    feed.session().require_elevated()?;
                    Ok(feed.record(origin, &id)?)
                });
                tokio::task::spawn_local(async move {
                    let result = match record {
                        Ok(record) => gate.remove(&record).await.map_err(ActorError::from),
                        Err(e) => Err(e),
                    };
                    let _ = reply.send(result);
                });
            }
            FeedCommand::SignIn { session, reply } => {
                let _ = reply.send(switch_session(&mut feed, session));
            }
            FeedCommand::SignOut { caller, reply } => {
                let result = check_caller(&feed, &caller)
                    .and_then(|_| switch_session(&mut feed, Session::anonymous()));
                let _ = reply.send(result);
            }
        }
    }

    feed.close();
}
