use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use futures_util::future::{self, FutureExt, LocalBoxFuture, Shared};
use tracing::{debug, warn};

use notefeed_types::{CollectionKey, DocumentStore, Record};

use crate::config::FeedConfig;
use crate::session::Session;

/// Which foreign reference is being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    /// Note author -> user email.
    Owner,
    /// Shared note -> community name.
    Group,
}

type Lookup = Shared<LocalBoxFuture<'static, String>>;

/// Resolves owner and community references into display values.
///
/// Every (kind, key) pair hits the store at most once per resolver: the memo
/// holds the in-flight lookup itself, so concurrent resolutions of the same key
/// share one read. Nothing is ever evicted; build a new resolver for fresh data.
pub struct ReferenceResolver {
    store: Rc<dyn DocumentStore>,
    users: CollectionKey,
    groups: CollectionKey,
    owner_field: String,
    group_field: String,
    /// The users collection is only readable once signed in.
    owner_lookups: bool,
    memo: RefCell<HashMap<(RefKind, String), Lookup>>,
}

impl ReferenceResolver {
    pub fn new(store: Rc<dyn DocumentStore>, config: &FeedConfig, session: &Session) -> Self {
        Self {
            store,
            users: config.users_collection.clone(),
            groups: config.groups_collection.clone(),
            owner_field: config.owner_display_field.clone(),
            group_field: config.group_display_field.clone(),
            owner_lookups: session.is_authenticated(),
            memo: RefCell::new(HashMap::new()),
        }
    }

    /// Display value for `key`, or `key` itself when it cannot be resolved.
    pub async fn resolve(&self, kind: RefKind, key: &str) -> String {
        if kind == RefKind::Owner && !self.owner_lookups {
            return key.to_string();
        }

        let lookup = self
            .memo
            .borrow_mut()
            .entry((kind, key.to_string()))
            .or_insert_with(|| self.lookup(kind, key))
            .clone();

        lookup.await
    }

    /// Fill in `owner_display` / `group_display` on every record, resolving all
    /// of them concurrently. Completes once every lookup has settled.
    pub async fn enrich(&self, records: Vec<Record>) -> Vec<Record> {
        future::join_all(records.into_iter().map(|record| self.enrich_one(record))).await
    }

    async fn enrich_one(&self, mut record: Record) -> Record {
        let owner = self.resolve(RefKind::Owner, &record.owner_ref);
        let group = async {
            match &record.group_ref {
                Some(group_ref) => Some(self.resolve(RefKind::Group, group_ref).await),
                None => None,
            }
        };

        let (owner_display, group_display) = future::join(owner, group).await;
        record.owner_display = Some(owner_display);
        record.group_display = group_display;
        record
    }

    fn lookup(&self, kind: RefKind, key: &str) -> Lookup {
        let store = Rc::clone(&self.store);
        let (collection, field) = match kind {
            RefKind::Owner => (self.users.clone(), self.owner_field.clone()),
            RefKind::Group => (self.groups.clone(), self.group_field.clone()),
        };
        let key = key.to_string();

        async move {
            match store.get_one(&collection, &key).await {
                Ok(Some(doc)) => match doc.str_field(&field) {
                    Some(display) if !display.is_empty() => display.to_string(),
                    _ => {
                        debug!(collection = %collection, key = %key, field = %field, "No display field, showing raw key");
                        key
                    }
                },
                Ok(None) => {
                    debug!(collection = %collection, key = %key, "Not found, showing raw key");
                    key
                }
                Err(e) => {
                    warn!(collection = %collection, key = %key, "Could not resolve: {}", e);
                    key
                }
            }
        }
        .boxed_local()
        .shared()
    }
}
