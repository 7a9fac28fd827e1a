//! Mock platform implementation for testing
//!
//! This module provides a configurable mock platform that can simulate
//! publish, follow and like failures, scripted paginated feeds and network
//! latency. Clones share their script and call log, so a test can keep one
//! handle for assertions while the pipeline owns another.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{PlatformError, Result};
use crate::platforms::SocialPlatform;
use crate::types::{FeedItem, FeedPage, FeedUser};

/// One scripted feed page.
#[derive(Debug, Clone)]
pub enum MockPage {
    Items(Vec<FeedItem>),
    Failure(String),
}

#[derive(Debug, Default)]
struct Script {
    auth_error: Option<String>,
    publish_failures: Vec<String>,
    follow_error: Option<String>,
    like_failures: HashSet<String>,
    user_feeds: HashMap<u64, Vec<MockPage>>,
    tag_feeds: HashMap<String, Vec<MockPage>>,
    feed_delay: Duration,
}

#[derive(Debug, Default)]
struct Calls {
    auth: usize,
    published: Vec<String>,
    publish_attempts: usize,
    followed: Vec<u64>,
    follow_attempts: usize,
    liked: Vec<String>,
    like_attempts: usize,
    user_feed: Vec<(u64, Option<String>)>,
    tag_feed: Vec<(String, Option<String>)>,
}

/// Mock platform for testing
#[derive(Debug, Clone, Default)]
pub struct MockPlatform {
    script: Arc<Mutex<Script>>,
    calls: Arc<Mutex<Calls>>,
    in_flight_feeds: Arc<AtomicUsize>,
    max_in_flight_feeds: Arc<AtomicUsize>,
}

/// Build a feed item posted by `username`/`pk`.
pub fn feed_item(media_id: &str, pk: u64, username: &str) -> FeedItem {
    FeedItem {
        id: media_id.to_string(),
        user: FeedUser {
            pk,
            username: username.to_string(),
        },
    }
}

impl MockPlatform {
    /// Create a mock platform on which every call succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock platform that fails authentication
    pub fn auth_failure(error: &str) -> Self {
        let platform = Self::new();
        platform.script.lock().unwrap().auth_error = Some(error.to_string());
        platform
    }

    /// Fail every publish whose caption contains `needle`
    pub fn fail_publish_when_caption_contains(self, needle: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .publish_failures
            .push(needle.to_string());
        self
    }

    /// Fail every follow call
    pub fn fail_follows(self, error: &str) -> Self {
        self.script.lock().unwrap().follow_error = Some(error.to_string());
        self
    }

    /// Fail likes of the given media id
    pub fn fail_like(self, media_id: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .like_failures
            .insert(media_id.to_string());
        self
    }

    /// Script the pages of a user's feed, first page first
    pub fn with_user_feed(self, user_pk: u64, pages: Vec<MockPage>) -> Self {
        self.script.lock().unwrap().user_feeds.insert(user_pk, pages);
        self
    }

    /// Script the pages of a tag feed, first page first
    pub fn with_tag_feed(self, tag: &str, pages: Vec<MockPage>) -> Self {
        self.set_tag_feed(tag, pages);
        self
    }

    pub fn set_tag_feed(&self, tag: &str, pages: Vec<MockPage>) {
        self.script
            .lock()
            .unwrap()
            .tag_feeds
            .insert(tag.to_string(), pages);
    }

    /// Delay every feed page request (simulates network latency)
    pub fn with_feed_delay(self, delay: Duration) -> Self {
        self.script.lock().unwrap().feed_delay = delay;
        self
    }

    pub fn auth_call_count(&self) -> usize {
        self.calls.lock().unwrap().auth
    }

    /// Captions of successful publishes, in order
    pub fn published_captions(&self) -> Vec<String> {
        self.calls.lock().unwrap().published.clone()
    }

    pub fn publish_attempts(&self) -> usize {
        self.calls.lock().unwrap().publish_attempts
    }

    pub fn followed(&self) -> Vec<u64> {
        self.calls.lock().unwrap().followed.clone()
    }

    pub fn follow_attempts(&self) -> usize {
        self.calls.lock().unwrap().follow_attempts
    }

    /// Media ids of successful likes, in order
    pub fn liked(&self) -> Vec<String> {
        self.calls.lock().unwrap().liked.clone()
    }

    pub fn like_attempts(&self) -> usize {
        self.calls.lock().unwrap().like_attempts
    }

    /// (user pk, cursor) of every user feed request
    pub fn user_feed_calls(&self) -> Vec<(u64, Option<String>)> {
        self.calls.lock().unwrap().user_feed.clone()
    }

    /// (tag, cursor) of every tag feed request
    pub fn tag_feed_calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().unwrap().tag_feed.clone()
    }

    /// Highest number of feed requests that were in progress at once
    pub fn max_concurrent_feed_calls(&self) -> usize {
        self.max_in_flight_feeds.load(Ordering::SeqCst)
    }

    /// Serve page `cursor` of a scripted feed. Cursors are page indexes.
    async fn serve_page(&self, pages: Option<Vec<MockPage>>, cursor: Option<&str>) -> Result<FeedPage> {
        let now = self.in_flight_feeds.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight_feeds.fetch_max(now, Ordering::SeqCst);

        let delay = self.script.lock().unwrap().feed_delay;
        if !delay.is_zero() {
            sleep(delay).await;
        }
        self.in_flight_feeds.fetch_sub(1, Ordering::SeqCst);

        let pages = pages.unwrap_or_default();
        let index = match cursor {
            None => 0,
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| PlatformError::InvalidResponse(format!("Unknown cursor {}", c)))?,
        };

        match pages.get(index) {
            None => Ok(FeedPage::default()),
            Some(MockPage::Failure(error)) => Err(PlatformError::Network(error.clone()).into()),
            Some(MockPage::Items(items)) => Ok(FeedPage {
                items: items.clone(),
                next_cursor: (index + 1 < pages.len()).then(|| (index + 1).to_string()),
            }),
        }
    }
}

#[async_trait]
impl SocialPlatform for MockPlatform {
    async fn authenticate(&mut self) -> Result<()> {
        self.calls.lock().unwrap().auth += 1;

        match self.script.lock().unwrap().auth_error.clone() {
            Some(error) => Err(PlatformError::Authentication(error).into()),
            None => Ok(()),
        }
    }

    async fn publish_photo(&self, jpeg: &[u8], caption: &str) -> Result<String> {
        let mut calls = self.calls.lock().unwrap();
        calls.publish_attempts += 1;

        let failing = self
            .script
            .lock()
            .unwrap()
            .publish_failures
            .iter()
            .any(|needle| caption.contains(needle.as_str()));
        if failing {
            return Err(PlatformError::Posting("Mock publish failed".to_string()).into());
        }
        if jpeg.is_empty() {
            return Err(PlatformError::Posting("Empty image".to_string()).into());
        }

        calls.published.push(caption.to_string());
        Ok(format!("mock-media-{}", calls.published.len()))
    }

    async fn follow(&self, user_pk: u64) -> Result<()> {
        let mut calls = self.calls.lock().unwrap();
        calls.follow_attempts += 1;

        if let Some(error) = self.script.lock().unwrap().follow_error.clone() {
            return Err(PlatformError::Network(error).into());
        }
        calls.followed.push(user_pk);
        Ok(())
    }

    async fn like(&self, media_id: &str, _owner: &FeedUser) -> Result<()> {
        let mut calls = self.calls.lock().unwrap();
        calls.like_attempts += 1;

        if self.script.lock().unwrap().like_failures.contains(media_id) {
            return Err(PlatformError::Posting(format!("Mock like of {} failed", media_id)).into());
        }
        calls.liked.push(media_id.to_string());
        Ok(())
    }

    async fn user_feed_page(&self, user_pk: u64, cursor: Option<&str>) -> Result<FeedPage> {
        self.calls
            .lock()
            .unwrap()
            .user_feed
            .push((user_pk, cursor.map(str::to_string)));
        let pages = self.script.lock().unwrap().user_feeds.get(&user_pk).cloned();
        self.serve_page(pages, cursor).await
    }

    async fn tag_feed_page(&self, tag: &str, cursor: Option<&str>) -> Result<FeedPage> {
        self.calls
            .lock()
            .unwrap()
            .tag_feed
            .push((tag.to_string(), cursor.map(str::to_string)));
        let pages = self.script.lock().unwrap().tag_feeds.get(tag).cloned();
        self.serve_page(pages, cursor).await
    }

    fn name(&self) -> &str {
        "mock"
    }
}
