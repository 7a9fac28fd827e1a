//! Core types for Reposter

use serde::{Deserialize, Serialize};

/// A content item harvested from a community.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub title: String,
    pub author: String,
    pub community: String,
    pub url: Option<String>,
    pub is_video: bool,
    pub selftext: Option<String>,
    /// Popularity used for ranking (upvotes).
    pub score: i64,
}

impl Submission {
    pub fn has_self_text(&self) -> bool {
        self.selftext.as_deref().is_some_and(|text| !text.is_empty())
    }

    pub fn media_url(&self) -> Option<&str> {
        self.url.as_deref().filter(|url| !url.is_empty())
    }

    /// Only direct, non-video media without a text body can be republished as
    /// a photo.
    pub fn is_publishable(&self) -> bool {
        self.media_url().is_some() && !self.is_video && !self.has_self_text()
    }
}

/// The poster of a feed item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedUser {
    pub pk: u64,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: String,
    pub user: FeedUser,
}

/// One page of a paginated feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedPage {
    pub items: Vec<FeedItem>,
    pub next_cursor: Option<String>,
}

impl FeedPage {
    pub fn has_next(&self) -> bool {
        self.next_cursor.is_some()
    }
}

/// What happened to a single dequeued submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UploadOutcome {
    Uploaded { media_id: String },
    Ignored,
    Failed { error: String },
}

impl UploadOutcome {
    pub fn is_uploaded(&self) -> bool {
        matches!(self, UploadOutcome::Uploaded { .. })
    }
}
