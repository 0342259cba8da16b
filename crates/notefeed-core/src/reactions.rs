use std::rc::Rc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use notefeed_types::{Document, DocumentStore, Reactions, Record, StoreError};

use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::session::Session;
use crate::state::FeedState;

const REACTIONS_FIELD: &str = "reactions";

/// Applies reaction toggles for the session's user.
///
/// The new mapping is shown only after the store accepted it, so a failed
/// write leaves the displayed reactions exactly as they were.
#[derive(Clone)]
pub struct ReactionEngine {
    store: Rc<dyn DocumentStore>,
    state: Rc<FeedState>,
    config: Rc<FeedConfig>,
    session: Session,
}

impl ReactionEngine {
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

    /// Flip the session user's membership in `symbol` on `record` and persist
    /// the whole resulting mapping. Returns the mapping now stored.
    ///
    /// The toggle is applied to the stored document rather than the possibly
    /// stale local copy, and written with the read revision as a precondition.
    /// A concurrent write from another user makes the store reject ours; we
    /// then re-read and try again, up to `max_toggle_attempts` times.
    pub async fn toggle(&self, record: &Record, symbol: &str) -> Result<Reactions, FeedError> {
        let user = self.session.require_user()?;
        let collection = self.config.collection(record.origin);
        let attempts = self.config.max_toggle_attempts.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;

            let doc = match self.store.get_one(collection, &record.id).await {
                Ok(Some(doc)) => doc,
                Ok(None) => {
                    return Err(FeedError::NotFound {
                        origin: record.origin,
                        id: record.id.clone(),
                    });
                }
                Err(e) => return Err(self.fail(record, e)),
            };

            let current = stored_reactions(&doc);
            let (next, state) = current.toggled(symbol, user);

            let mut fields = Map::new();
            fields.insert(REACTIONS_FIELD.to_string(), reactions_value(&next));

            match self
                .store
                .update_fields(collection, &record.id, fields, doc.revision)
                .await
            {
                Ok(()) => {
                    info!(
                        origin = %record.origin,
                        id = %record.id,
                        user,
                        symbol,
                        "Reaction now {:?}",
                        state
                    );
                    self.state.publish_reactions(record.origin, &record.id, &next);
                    return Ok(next);
                }
                Err(StoreError::Conflict { .. }) if attempt < attempts => {
                    debug!(
                        origin = %record.origin,
                        id = %record.id,
                        attempt,
                        attempts,
                        "Reaction write raced, retrying"
                    );
                }
                Err(e) => return Err(self.fail(record, e)),
            }
        }
    }

    fn fail(&self, record: &Record, e: StoreError) -> FeedError {
        warn!(origin = %record.origin, id = %record.id, "Error updating reaction: {}", e);
        self.state
            .record_write_error("Failed to update the reaction.".to_string());
        FeedError::Write(e)
    }
}

fn stored_reactions(doc: &Document) -> Reactions {
    doc.data
        .get(REACTIONS_FIELD)
        .map_or_else(Reactions::new, |value| Reactions::from_stored(&doc.id, value))
}

fn reactions_value(reactions: &Reactions) -> Value {
    Value::Object(
        reactions
            .iter()
            .map(|(symbol, users)| {
                let users = users.iter().cloned().map(Value::String).collect();
                (symbol.clone(), Value::Array(users))
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reactions_value_matches_serde_shape() {
        let mut reactions = Reactions::new();
        reactions.insert("👍", "u2");
        reactions.insert("👍", "u1");
        reactions.insert("😮", "u3");

        let value = reactions_value(&reactions);
        assert_eq!(value, json!({"👍": ["u1", "u2"], "😮": ["u3"]}));
        assert_eq!(value, serde_json::to_value(&reactions).unwrap());
    }

    #[test]
    fn test_stored_reactions_tolerates_missing_and_malformed() {
        let Value::Object(empty) = json!({"uid": "u1"}) else {
            unreachable!()
        };
        assert!(stored_reactions(&Document::new("a", empty)).is_empty());

        let Value::Object(bad) = json!({"reactions": "lots"}) else {
            unreachable!()
        };
        assert!(stored_reactions(&Document::new("b", bad)).is_empty());

        let Value::Object(good) = json!({"reactions": {"😢": ["u1"]}}) else {
            unreachable!()
        };
        assert!(stored_reactions(&Document::new("c", good)).contains("😢", "u1"));
    }
}
