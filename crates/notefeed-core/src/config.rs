use notefeed_types::{CollectionKey, OrderSpec, Origin};

/// Reactions offered on every note, in display order.
pub const DEFAULT_REACTIONS: [&str; 6] = ["👍", "❤️", "😂", "😮", "😢", "😠"];

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub personal_collection: CollectionKey,
    pub shared_collection: CollectionKey,
    pub users_collection: CollectionKey,
    pub groups_collection: CollectionKey,
    /// Field both note collections are ordered by, newest first.
    pub order_field: String,
    pub owner_display_field: String,
    pub group_display_field: String,
    pub available_reactions: Vec<String>,
    /// Attempts a toggle makes before giving up on revision conflicts.
    pub max_toggle_attempts: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            personal_collection: CollectionKey::new("notes"),
            shared_collection: CollectionKey::new("sharedNotes"),
            users_collection: CollectionKey::new("users"),
            groups_collection: CollectionKey::new("communities"),
            order_field: "created".into(),
            owner_display_field: "email".into(),
            group_display_field: "name".into(),
            available_reactions: DEFAULT_REACTIONS.iter().map(|r| r.to_string()).collect(),
            max_toggle_attempts: 3,
        }
    }
}

impl FeedConfig {
    /// The collection that owns records of `origin`.
    pub fn collection(&self, origin: Origin) -> &CollectionKey {
        match origin {
            Origin::Personal => &self.personal_collection,
            Origin::Shared => &self.shared_collection,
        }
    }

    pub fn order(&self) -> OrderSpec {
        OrderSpec::descending(self.order_field.clone())
    }
}
