pub mod api;
pub mod models;
pub mod store;

pub use models::{
    Content, DecodeError, Document, Field, Origin, ReactionState, Reactions, Record,
    UserId,
};
pub use store::{
    CollectionKey, Direction, DocumentStore, OrderSpec, SnapshotEvent, StoreError,
    StoreSubscription,
};
