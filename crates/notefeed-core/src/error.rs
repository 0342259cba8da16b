use notefeed_types::{Origin, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("sign in to react to notes")]
    Unauthenticated,

    #[error("only a superadmin can delete notes")]
    Forbidden,

    #[error("{origin} note {id} not found")]
    NotFound { origin: Origin, id: String },

    /// A reaction or deletion did not persist.
    #[error("write failed: {0}")]
    Write(#[source] StoreError),

    /// The store refused to start a live query.
    #[error("subscription failed: {0}")]
    Subscribe(#[source] StoreError),
}
