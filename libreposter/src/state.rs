//! Shared in-memory pipeline state
//!
//! The submission cache (ids already queued) and the post queue are owned by a
//! single [`SharedState`] that every component receives as an `Arc`. Both
//! collections live behind one mutex so the fetcher's cache-and-queue commit
//! is a single critical section. Nothing here is persisted.

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::types::Submission;

/// Ids of submissions that have already been queued.
#[derive(Debug, Default)]
pub struct SubmissionCache {
    ids: HashSet<String>,
}

impl SubmissionCache {
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.ids.insert(id.into())
    }

    /// Empty the cache, returning how many ids were evicted.
    pub fn clear(&mut self) -> usize {
        let evicted = self.ids.len();
        self.ids = HashSet::new();
        evicted
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// What to do when a push would exceed the queue capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict from the front to make room for the new item.
    #[default]
    DropOldest,
    /// Refuse the new item.
    RejectNew,
}

/// Result of a single push.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting the oldest item.
    Displaced(Submission),
    Rejected(Submission),
}

/// FIFO of submissions awaiting publication.
#[derive(Debug)]
pub struct PostQueue {
    items: VecDeque<Submission>,
    capacity: Option<usize>,
    policy: OverflowPolicy,
}

impl PostQueue {
    pub fn new(capacity: Option<usize>, policy: OverflowPolicy) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
            policy,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None, OverflowPolicy::default())
    }

    pub fn push(&mut self, submission: Submission) -> PushOutcome {
        let full = self
            .capacity
            .is_some_and(|capacity| self.items.len() >= capacity);

        if !full {
            self.items.push_back(submission);
            return PushOutcome::Queued;
        }

        match self.policy {
            OverflowPolicy::RejectNew => PushOutcome::Rejected(submission),
            OverflowPolicy::DropOldest => match self.items.pop_front() {
                Some(oldest) => {
                    self.items.push_back(submission);
                    PushOutcome::Displaced(oldest)
                }
                // capacity of zero
                None => PushOutcome::Rejected(submission),
            },
        }
    }

    /// Remove up to `max` items from the front. A short queue yields a short
    /// batch.
    pub fn pop_batch(&mut self, max: usize) -> Vec<Submission> {
        let take = max.min(self.items.len());
        self.items.drain(..take).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Submission> {
        self.items.iter()
    }
}

/// Counts from committing one fetched batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub enqueued: usize,
    /// Older queued items evicted to make room.
    pub dropped: usize,
    /// New items refused because the queue was full.
    pub rejected: usize,
    /// Items skipped because their id was already cached.
    pub duplicates: usize,
}

#[derive(Debug)]
struct Inner {
    cache: SubmissionCache,
    queue: PostQueue,
}

/// Cache and queue shared by the fetcher, uploader and cache cleaner.
#[derive(Debug)]
pub struct SharedState {
    inner: Mutex<Inner>,
}

impl SharedState {
    pub fn new(queue: PostQueue) -> Self {
        Self {
            inner: Mutex::new(Inner {
                cache: SubmissionCache::default(),
                queue,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The guarded data is plain collections, still usable after a panic.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_cached(&self, id: &str) -> bool {
        self.lock().cache.contains(id)
    }

    /// Append a fetched batch: ids to the cache and items to the queue tail,
    /// in one critical section.
    ///
    /// Ids already present in the cache are skipped. Items refused by the
    /// queue are not cached, so a later fetch may pick them up again.
    pub fn commit_batch(&self, batch: Vec<Submission>) -> CommitReport {
        let mut guard = self.lock();
        let Inner { cache, queue } = &mut *guard;
        let mut report = CommitReport::default();

        for submission in batch {
            if cache.contains(&submission.id) {
                report.duplicates += 1;
                continue;
            }

            let id = submission.id.clone();
            match queue.push(submission) {
                PushOutcome::Queued => report.enqueued += 1,
                PushOutcome::Displaced(_) => {
                    report.enqueued += 1;
                    report.dropped += 1;
                }
                PushOutcome::Rejected(_) => {
                    report.rejected += 1;
                    continue;
                }
            }
            cache.insert(id);
        }

        report
    }

    pub fn dequeue_batch(&self, max: usize) -> Vec<Submission> {
        self.lock().queue.pop_batch(max)
    }

    /// Reset the cache to empty, returning how many ids were evicted.
    pub fn clear_cache(&self) -> usize {
        self.lock().cache.clear()
    }

    pub fn cache_len(&self) -> usize {
        self.lock().cache.len()
    }

    pub fn queue_len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Ids currently queued, front first.
    pub fn queued_ids(&self) -> Vec<String> {
        self.lock().queue.iter().map(|s| s.id.clone()).collect()
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(PostQueue::unbounded())
    }
}
