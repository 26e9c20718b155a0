use serde::{Deserialize, Serialize};
use serenity::all::UserId;

/// Immutable description of one playable unit. Produced by the resolver
/// (`crate::audio`), carried through the queue untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// Provider-side id, used for caching and related-track lookups.
    pub source_id: String,
    /// Page URL the user asked for.
    pub url: String,
    /// Resolved playable location (a local file once fetched).
    pub media: String,
    pub title: String,
    pub duration_secs: Option<u64>,
    pub requested_by: UserId,
}

impl Track {
    /// Display form for replies and notifications.
    pub fn display(&self) -> String {
        if self.title.is_empty() {
            self.url.clone()
        } else {
            self.title.clone()
        }
    }
}
