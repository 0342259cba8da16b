//! Live note feed core.
//!
//! Merges the personal and shared note collections into one sorted feed,
//! resolves owner / community references into display names, and applies
//! reaction toggles and privileged deletions back to the owning collection.
//!
//! Everything here runs on a single thread: build a [`Feed`] inside a
//! `tokio::task::LocalSet` and drive it from there.

pub mod channel;
pub mod config;
pub mod deletion;
pub mod error;
pub mod feed;
pub mod merger;
pub mod reactions;
pub mod resolver;
pub mod session;
pub mod state;

pub use channel::{ChannelEvent, ChannelSink, SubscriptionChannel};
pub use config::{DEFAULT_REACTIONS, FeedConfig};
pub use deletion::DeletionGate;
pub use error::FeedError;
pub use feed::Feed;
pub use merger::{FeedFilter, FeedMerger, merge};
pub use reactions::ReactionEngine;
pub use resolver::{RefKind, ReferenceResolver};
pub use session::Session;
pub use state::{FeedState, FeedStatus};
