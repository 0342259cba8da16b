use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Content, Origin, Reactions, Record};

// -- Auth --

/// Bearer token claims describing the authenticated user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Grants deletion rights.
    #[serde(default)]
    pub superadmin: bool,
    pub exp: usize,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user_id: Option<String>,
    pub elevated: bool,
}

// -- Feed --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    /// Whether the viewing user is among the members.
    pub reacted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedItem {
    pub id: String,
    pub origin: Origin,
    pub owner_ref: String,
    pub owner_display: String,
    pub group_ref: Option<String>,
    pub group_display: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub content: Content,
    pub reactions: Vec<ReactionGroup>,
}

impl FeedItem {
    pub fn from_record(record: &Record, available: &[String], viewer: Option<&str>) -> Self {
        Self {
            id: record.id.clone(),
            origin: record.origin,
            owner_ref: record.owner_ref.clone(),
            owner_display: record
                .owner_display
                .clone()
                .unwrap_or_else(|| record.owner_ref.clone()),
            group_ref: record.group_ref.clone(),
            group_display: record.group_display.clone(),
            created_at: record.created_at,
            content: record.content.clone(),
            reactions: record.reaction_groups(available, viewer),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedSnapshot {
    pub items: Vec<FeedItem>,
    pub loading: bool,
    pub error: Option<String>,
}

// -- Reactions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Serialize)]
pub struct ToggleReactionResponse {
    pub reacted: bool,
    pub reactions: Reactions,
}
