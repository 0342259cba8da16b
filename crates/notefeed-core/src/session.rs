use notefeed_types::UserId;

use crate::error::FeedError;

/// Snapshot of the authentication context the feed was built for.
///
/// Passed in explicitly; when the signed-in user changes, hand the feed a new
/// session via [`crate::Feed::set_session`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    current_user: Option<UserId>,
    elevated: bool,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn signed_in(user: impl Into<UserId>) -> Self {
        Self {
            current_user: Some(user.into()),
            elevated: false,
        }
    }

    pub fn with_elevated_privilege(mut self, elevated: bool) -> Self {
        self.elevated = elevated;
        self
    }

    pub fn current_user(&self) -> Option<&str> {
        self.current_user.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current_user.is_some()
    }

    pub fn has_elevated_privilege(&self) -> bool {
        self.elevated
    }

    pub fn require_user(&self) -> Result<&str, FeedError> {
        self.current_user().ok_or(FeedError::Unauthenticated)
    }

    pub fn require_elevated(&self) -> Result<(), FeedError> {
        if self.elevated {
            Ok(())
        } else {
            Err(FeedError::Forbidden)
        }
    }
}
