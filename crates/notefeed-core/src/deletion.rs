use std::rc::Rc;

use tracing::{info, warn};

use notefeed_types::{DocumentStore, Record};

use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::session::Session;
use crate::state::FeedState;

/// Superadmin-only removal of notes.
#[derive(Clone)]
pub struct DeletionGate {
    store: Rc<dyn DocumentStore>,
    state: Rc<FeedState>,
    config: Rc<FeedConfig>,
    session: Session,
}

impl DeletionGate {
    pub fn new(
        store: Rc<dyn DocumentStore>,
        state: Rc<FeedState>,
        config: Rc<FeedConfig>,
        session: Session,
    ) -> Self {
        Self {
            store,
            state,
            config,
            session,
        }
    }

    /// Delete `record` from its collection and drop it from the feed right away.
    /// The snapshot that follows upstream agrees with the local removal.
    /// Failures are not retried; the record stays visible.
    pub async fn remove(&self, record: &Record) -> Result<(), FeedError> {
        if let Err(e) = self.session.require_elevated() {
            warn!(
                origin = %record.origin,
                id = %record.id,
                user = ?self.session.current_user(),
                "Delete without privilege"
            );
            return Err(e);
        }

        let collection = self.config.collection(record.origin);
        if let Err(e) = self.store.delete(collection, &record.id).await {
            warn!(origin = %record.origin, id = %record.id, "Error deleting note: {}", e);
            self.state
                .record_write_error(format!("Failed to delete the note: {}", e));
            return Err(FeedError::Write(e));
        }

        info!(origin = %record.origin, id = %record.id, "Deleted note");
        self.state.remove_local(record.origin, &record.id);
        Ok(())
    }
}
