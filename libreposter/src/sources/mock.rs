//! Mock content source for testing
//!
//! Listings are scripted per community and can be swapped or made to fail
//! between cycles. Clones share their script and call log, so a test can keep
//! one handle while the pipeline owns another.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{Result, SourceError};
use crate::sources::ContentSource;
use crate::types::Submission;

#[derive(Debug, Clone)]
enum Listing {
    Items(Vec<Submission>),
    Failure(String),
}

#[derive(Debug, Clone, Default)]
pub struct MockSource {
    listings: Arc<Mutex<HashMap<String, Listing>>>,
    calls: Arc<Mutex<Vec<(String, usize)>>>,
    latency: Arc<Mutex<Duration>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the listing returned for `community`, in ranked order.
    pub fn with_listing(self, community: &str, items: Vec<Submission>) -> Self {
        self.set_listing(community, items);
        self
    }

    /// Delay every listing request by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock().unwrap() = latency;
        self
    }

    pub fn set_listing(&self, community: &str, items: Vec<Submission>) {
        self.listings
            .lock()
            .unwrap()
            .insert(community.to_string(), Listing::Items(items));
    }

    /// Make every listing of `community` fail with a network error.
    pub fn fail_community(&self, community: &str, error: &str) {
        self.listings
            .lock()
            .unwrap()
            .insert(community.to_string(), Listing::Failure(error.to_string()));
    }

    /// (community, limit) of every listing request, in call order.
    pub fn calls(&self) -> Vec<(String, usize)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

/// Build a publishable image submission for tests.
pub fn image_submission(id: &str, community: &str, score: i64) -> Submission {
    Submission {
        id: id.to_string(),
        title: format!("Post {}", id),
        author: format!("author_{}", id),
        community: community.to_string(),
        url: Some(format!("https://i.redd.it/{}.jpg", id)),
        is_video: false,
        selftext: None,
        score,
    }
}

#[async_trait]
impl ContentSource for MockSource {
    async fn authenticate(&mut self) -> Result<()> {
        Ok(())
    }

    async fn top_submissions(&self, community: &str, limit: usize) -> Result<Vec<Submission>> {
        self.calls
            .lock()
            .unwrap()
            .push((community.to_string(), limit));

        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            sleep(latency).await;
        }

        let listing = self.listings.lock().unwrap().get(community).cloned();
        match listing {
            Some(Listing::Items(items)) => Ok(items.into_iter().take(limit).collect()),
            Some(Listing::Failure(error)) => Err(SourceError::Network(error).into()),
            None => Err(SourceError::NotFound(format!("r/{}", community)).into()),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
