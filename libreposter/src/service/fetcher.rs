//! Fetch cycle: harvest, deduplicate, rank and enqueue submissions

use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::service::events::{BotEvent, EventBus};
use crate::sources::ContentSource;
use crate::state::{CommitReport, SharedState};
use crate::types::Submission;

/// Listings smaller than this rarely leave enough unseen items after
/// deduplication.
pub const MIN_LISTING_SIZE: usize = 25;

pub struct Fetcher {
    source: Arc<dyn ContentSource>,
    state: Arc<SharedState>,
    communities: Vec<String>,
    per_community: usize,
    events: EventBus,
}

impl Fetcher {
    pub fn new(
        source: Arc<dyn ContentSource>,
        state: Arc<SharedState>,
        communities: Vec<String>,
        per_community: usize,
        events: EventBus,
    ) -> Self {
        Self {
            source,
            state,
            communities,
            per_community,
            events,
        }
    }

    /// Run one fetch cycle.
    ///
    /// Each community contributes at most `per_community` unseen items, best
    /// score first. The combined batch is shuffled and committed to the cache
    /// and queue in one step.
    ///
    /// # Errors
    ///
    /// Any community failing aborts the cycle and nothing is committed.
    pub async fn run_cycle(&self) -> Result<CommitReport> {
        info!(
            communities = self.communities.len(),
            "Fetching top {} posts per subreddit", self.per_community
        );

        let mut seen = HashSet::new();
        let mut batch = Vec::new();

        for community in &self.communities {
            let listing = match self.fetch_community(community).await {
                Ok(listing) => listing,
                Err(e) => {
                    debug!(community = %community, "Listing failed, committing nothing");
                    self.events.emit(BotEvent::FetchFailed {
                        error: e.to_string(),
                    });
                    return Err(e);
                }
            };

            let top = self.select_top(listing, &mut seen);
            debug!(community = %community, selected = top.len(), "Selected submissions");
            batch.extend(top);
        }

        batch.shuffle(&mut rand::thread_rng());

        let fetched = batch.len();
        let report = self.state.commit_batch(batch);

        if report.dropped > 0 {
            warn!(dropped = report.dropped, "Queue full, dropped oldest submissions");
        }
        if report.rejected > 0 {
            warn!(rejected = report.rejected, "Queue full, rejected new submissions");
        }
        info!(
            fetched,
            enqueued = report.enqueued,
            queue_len = self.state.queue_len(),
            "Fetch cycle complete"
        );

        self.events.emit(BotEvent::FetchCompleted {
            fetched,
            enqueued: report.enqueued,
            dropped: report.dropped,
            rejected: report.rejected,
        });

        Ok(report)
    }

    async fn fetch_community(&self, community: &str) -> Result<Vec<Submission>> {
        let limit = self.per_community.max(MIN_LISTING_SIZE);
        self.source.top_submissions(community, limit).await
    }

    /// Drop cached and already-collected ids, then keep the best
    /// `per_community` by descending score. Ties keep listing order.
    fn select_top(&self, listing: Vec<Submission>, seen: &mut HashSet<String>) -> Vec<Submission> {
        let mut fresh: Vec<Submission> = listing
            .into_iter()
            .filter(|s| !self.state.is_cached(&s.id))
            .filter(|s| seen.insert(s.id.clone()))
            .collect();

        fresh.sort_by(|a, b| b.score.cmp(&a.score));
        fresh.truncate(self.per_community);
        fresh
    }
}
