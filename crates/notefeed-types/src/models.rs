use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::api::ReactionGroup;

pub type UserId = String;

/// Which remote collection a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Personal,
    Shared,
}

impl Origin {
    pub const ALL: [Origin; 2] = [Origin::Personal, Origin::Shared];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Shared => "shared",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One labelled value of a structured note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "lowercase")]
pub enum Content {
    Text(String),
    Fields(Vec<Field>),
}

/// Membership of a user in one reaction symbol on one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionState {
    Absent,
    Present,
}

/// Reaction symbol -> users who applied it.
///
/// Symbols with no members are never stored: decoding drops them and
/// [`Reactions::toggled`] removes the key when its last member leaves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, BTreeSet<UserId>>",
    into = "BTreeMap<String, BTreeSet<UserId>>"
)]
pub struct Reactions(BTreeMap<String, BTreeSet<UserId>>);

impl From<BTreeMap<String, BTreeSet<UserId>>> for Reactions {
    fn from(mut map: BTreeMap<String, BTreeSet<UserId>>) -> Self {
        map.retain(|_, users| !users.is_empty());
        Self(map)
    }
}

impl From<Reactions> for BTreeMap<String, BTreeSet<UserId>> {
    fn from(reactions: Reactions) -> Self {
        reactions.0
    }
}

impl Reactions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the `reactions` field of stored document `id`.
    ///
    /// `null` reads as empty and a bare user id as a one-member list. Entries
    /// of any other shape are dropped with a warning; the rest still count.
    pub fn from_stored(id: &str, value: &Value) -> Self {
        let map = match value {
            Value::Null => return Self::new(),
            Value::Object(map) => map,
            other => {
                warn!("Ignoring malformed reactions on {}: {}", id, other);
                return Self::new();
            }
        };

        let mut reactions = Self::new();
        for (symbol, users) in map {
            match users {
                Value::Null => {}
                Value::String(user) => {
                    reactions.insert(symbol, user);
                }
                Value::Array(users) => {
                    for user in users {
                        match user.as_str() {
                            Some(user) => {
                                reactions.insert(symbol, user);
                            }
                            None => warn!("Ignoring reaction member {} on {} {}", user, id, symbol),
                        }
                    }
                }
                other => warn!("Ignoring malformed {} reaction on {}: {}", symbol, id, other),
            }
        }
        reactions
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of distinct symbols with at least one member.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn count(&self, symbol: &str) -> usize {
        self.0.get(symbol).map_or(0, BTreeSet::len)
    }

    pub fn contains(&self, symbol: &str, user: &str) -> bool {
        self.0.get(symbol).is_some_and(|users| users.contains(user))
    }

    /// Add `user` under `symbol`. Returns false if already present.
    pub fn insert(&mut self, symbol: &str, user: &str) -> bool {
        self.0
            .entry(symbol.to_string())
            .or_default()
            .insert(user.to_string())
    }

    /// Remove `user` from `symbol`, dropping the symbol once it is empty.
    /// Returns false if the user was not a member.
    pub fn remove(&mut self, symbol: &str, user: &str) -> bool {
        let Some(users) = self.0.get_mut(symbol) else {
            return false;
        };
        let removed = users.remove(user);
        if users.is_empty() {
            self.0.remove(symbol);
        }
        removed
    }

    /// Flip the membership of `user` under `symbol`.
    /// Returns the resulting mapping and the state the user ends up in.
    pub fn toggled(&self, symbol: &str, user: &str) -> (Reactions, ReactionState) {
        let mut next = self.clone();
        if next.remove(symbol, user) {
            (next, ReactionState::Absent)
        } else {
            next.insert(symbol, user);
            (next, ReactionState::Present)
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<UserId>)> {
        self.0.iter()
    }
}

/// A raw document as held by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: Map<String, Value>,
    /// Store-assigned revision, bumped on every write. `None` when the store
    /// does not track revisions.
    #[serde(default)]
    pub revision: Option<u64>,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            data,
            revision: None,
        }
    }

    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = Some(revision);
        self
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.data.get(name).and_then(Value::as_str)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("document {0} has no owner reference")]
    MissingOwner(String),
    #[error("document {id} is malformed: {source}")]
    Malformed {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Wire shape shared by personal and shared notes.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NoteDocument {
    uid: Option<String>,
    author_id: Option<String>,
    community_id: Option<String>,
    created: Option<Value>,
    text: Option<String>,
    fields: Option<Vec<Field>>,
    reactions: Option<Value>,
}

/// A single feed item, with its denormalized display fields once enriched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub origin: Origin,
    pub owner_ref: UserId,
    /// Owning community; only ever set for shared records.
    pub group_ref: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub content: Content,
    pub reactions: Reactions,
    pub owner_display: Option<String>,
    pub group_display: Option<String>,
}

impl Record {
    pub fn new(
        id: impl Into<String>,
        origin: Origin,
        owner_ref: impl Into<UserId>,
        content: Content,
    ) -> Self {
        Self {
            id: id.into(),
            origin,
            owner_ref: owner_ref.into(),
            group_ref: None,
            created_at: None,
            content,
            reactions: Reactions::new(),
            owner_display: None,
            group_display: None,
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_reactions(mut self, reactions: Reactions) -> Self {
        self.reactions = reactions;
        self
    }

    pub fn key(&self) -> (Origin, &str) {
        (self.origin, &self.id)
    }

    /// Decode a store document into an unenriched record.
    ///
    /// Personal notes name their owner in `uid`, shared notes in `authorId`;
    /// either is accepted as a fallback for the other.
    pub fn from_document(origin: Origin, doc: &Document) -> Result<Self, DecodeError> {
        let note: NoteDocument = serde_json::from_value(Value::Object(doc.data.clone()))
            .map_err(|source| DecodeError::Malformed {
                id: doc.id.clone(),
                source,
            })?;

        let owner_ref = match origin {
            Origin::Personal => note.uid.or(note.author_id),
            Origin::Shared => note.author_id.or(note.uid),
        }
        .filter(|owner| !owner.is_empty())
        .ok_or_else(|| DecodeError::MissingOwner(doc.id.clone()))?;

        let group_ref = match origin {
            Origin::Personal => None,
            Origin::Shared => note.community_id.filter(|group| !group.is_empty()),
        };

        let created_at = note.created.as_ref().and_then(|value| {
            let parsed = parse_timestamp(value);
            if parsed.is_none() && !value.is_null() {
                warn!("Unreadable created timestamp on {} {}: {}", origin, doc.id, value);
            }
            parsed
        });

        let content = match (note.fields, note.text) {
            (Some(fields), _) => Content::Fields(fields),
            (None, Some(text)) => Content::Text(text),
            (None, None) => Content::Text(String::new()),
        };

        Ok(Self {
            id: doc.id.clone(),
            origin,
            owner_ref,
            group_ref,
            created_at,
            content,
            reactions: note
                .reactions
                .as_ref()
                .map_or_else(Reactions::new, |value| Reactions::from_stored(&doc.id, value)),
            owner_display: None,
            group_display: None,
        })
    }

    /// Per-symbol counts for the given reaction palette, in palette order.
    pub fn reaction_groups(&self, available: &[String], viewer: Option<&str>) -> Vec<ReactionGroup> {
        available
            .iter()
            .map(|emoji| ReactionGroup {
                emoji: emoji.clone(),
                count: self.reactions.count(emoji),
                reacted: viewer.is_some_and(|user| self.reactions.contains(emoji, user)),
            })
            .collect()
    }
}

/// Accepts unix milliseconds, RFC 3339 strings and `{seconds, nanoseconds}` objects.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Object(obj) => {
            let seconds = obj.get("seconds").and_then(Value::as_i64)?;
            let nanos = obj
                .get("nanoseconds")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            DateTime::from_timestamp(seconds, u32::try_from(nanos).ok()?)
        }
        _ => None,
    }
}
