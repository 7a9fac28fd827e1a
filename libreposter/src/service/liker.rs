//! Liking a followed user's recent posts
//!
//! [`Liker`] does the work for one user. [`LikerPool`] accepts jobs from the
//! follower without blocking it and runs a bounded number of them at once.

use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::platforms::SocialPlatform;
use crate::service::events::{BotEvent, EventBus};
use crate::types::{FeedItem, FeedUser};

/// What one liker job achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LikeReport {
    /// Feed items collected (after truncation to the quota)
    pub fetched: usize,
    pub liked: usize,
    /// A like failed and the remaining items were skipped
    pub aborted: bool,
}

pub struct Liker {
    platform: Arc<dyn SocialPlatform>,
    quota: usize,
    events: EventBus,
}

impl Liker {
    pub fn new(platform: Arc<dyn SocialPlatform>, quota: usize, events: EventBus) -> Self {
        Self {
            platform,
            quota,
            events,
        }
    }

    /// Like up to `quota` of the user's most recent posts.
    ///
    /// Never fails: feed errors keep what was already collected and a like
    /// error stops the remaining likes.
    pub async fn run(&self, user: &FeedUser) -> LikeReport {
        if self.quota == 0 {
            return LikeReport::default();
        }

        let mut items = self.collect(user).await;
        items.truncate(self.quota);

        let total = items.len();
        let mut report = LikeReport {
            fetched: total,
            ..LikeReport::default()
        };

        for (index, item) in items.iter().enumerate() {
            if let Err(e) = self.platform.like(&item.id, &item.user).await {
                error!("[{}/{}] Failed to like post {}: {}", index + 1, total, item.id, e);
                report.aborted = true;
                break;
            }
            report.liked += 1;
            info!("[{}/{}] Liked post {} of {}", index + 1, total, item.id, user.username);
        }

        self.events.emit(BotEvent::LikerFinished {
            username: user.username.clone(),
            fetched: report.fetched,
            liked: report.liked,
            aborted: report.aborted,
        });

        report
    }

    /// Page through the user's feed until the quota is covered or the feed
    /// ends.
    async fn collect(&self, user: &FeedUser) -> Vec<FeedItem> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = match self.platform.user_feed_page(user.pk, cursor.as_deref()).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(user = %user.username, error = %e, "Feed page failed, keeping {} items", items.len());
                    break;
                }
            };

            let next = page.next_cursor;
            items.extend(page.items);

            match next {
                Some(next) if items.len() < self.quota => cursor = Some(next),
                _ => break,
            }
        }

        debug!(user = %user.username, count = items.len(), "Collected feed items");
        items
    }
}

/// Bounded executor for liker jobs.
///
/// At most `max_concurrent` jobs run at once and at most `backlog` wait
/// behind them. Submitting to a full backlog drops the job. A job leaves the
/// backlog only once a permit is free, so nothing waits outside it.
pub struct LikerPool {
    sender: mpsc::Sender<FeedUser>,
    dispatcher: JoinHandle<()>,
    events: EventBus,
}

impl LikerPool {
    /// Start the dispatcher task. Must be called inside a tokio runtime.
    pub fn spawn(
        liker: Arc<Liker>,
        max_concurrent: usize,
        backlog: usize,
        cancel: CancellationToken,
    ) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let events = liker.events.clone();
        let (sender, receiver) = mpsc::channel(backlog.max(1));
        let dispatcher = tokio::spawn(dispatch(liker, receiver, max_concurrent, cancel));

        Self {
            sender,
            dispatcher,
            events,
        }
    }

    /// Queue a job for `user` without waiting. Returns false when the job was
    /// dropped.
    pub fn submit(&self, user: FeedUser) -> bool {
        match self.sender.try_send(user) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(user)) => {
                warn!(user = %user.username, "Liker backlog full, dropping job");
                self.events.emit(BotEvent::LikerJobDropped {
                    username: user.username,
                });
                false
            }
            Err(mpsc::error::TrySendError::Closed(user)) => {
                warn!(user = %user.username, "Liker pool stopped, dropping job");
                false
            }
        }
    }

    /// Stop accepting jobs and wait for queued and running ones to finish.
    /// If the pool's token is cancelled, running jobs are aborted instead.
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(e) = self.dispatcher.await {
            error!("Liker dispatcher failed: {}", e);
        }
    }
}

async fn dispatch(
    liker: Arc<Liker>,
    mut receiver: mpsc::Receiver<FeedUser>,
    max_concurrent: usize,
    cancel: CancellationToken,
) {
    let permits = Arc::new(Semaphore::new(max_concurrent));
    let mut running = JoinSet::new();

    loop {
        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let user = tokio::select! {
            _ = cancel.cancelled() => break,
            user = receiver.recv() => match user {
                Some(user) => user,
                None => break,
            },
        };

        while running.try_join_next().is_some() {}

        let liker = liker.clone();
        let span = info_span!("liker", user = %user.username);
        running.spawn(
            async move {
                liker.run(&user).await;
                drop(permit);
            }
            .instrument(span),
        );
    }

    if cancel.is_cancelled() {
        running.shutdown().await;
    } else {
        while running.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock::{feed_item, MockPage, MockPlatform};
    use std::time::Duration;

    fn user(pk: u64) -> FeedUser {
        FeedUser {
            pk,
            username: format!("user{}", pk),
        }
    }

    fn items(pk: u64, ids: &[&str]) -> MockPage {
        MockPage::Items(ids.iter().map(|id| feed_item(id, pk, "u")).collect())
    }

    fn liker(platform: &MockPlatform, quota: usize) -> Liker {
        Liker::new(Arc::new(platform.clone()), quota, EventBus::default())
    }

    #[tokio::test]
    async fn test_zero_quota_makes_no_calls() {
        let platform = MockPlatform::new().with_user_feed(1, vec![items(1, &["a"])]);

        let report = liker(&platform, 0).run(&user(1)).await;

        assert_eq!(report, LikeReport::default());
        assert!(platform.user_feed_calls().is_empty());
        assert_eq!(platform.like_attempts(), 0);
    }

    #[tokio::test]
    async fn test_pages_until_quota_then_truncates() {
        let platform = MockPlatform::new().with_user_feed(
            1,
            vec![items(1, &["a", "b"]), items(1, &["c", "d"]), items(1, &["e"])],
        );

        let report = liker(&platform, 3).run(&user(1)).await;

        assert_eq!(report, LikeReport { fetched: 3, liked: 3, aborted: false });
        assert_eq!(platform.liked(), vec!["a", "b", "c"]);
        assert_eq!(platform.user_feed_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_short_feed_likes_everything() {
        let platform = MockPlatform::new().with_user_feed(1, vec![items(1, &["a"])]);

        let report = liker(&platform, 5).run(&user(1)).await;

        assert_eq!(report.liked, 1);
        assert_eq!(platform.user_feed_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_page_error_keeps_partial_results() {
        let platform = MockPlatform::new().with_user_feed(
            1,
            vec![items(1, &["a"]), MockPage::Failure("timeout".to_string())],
        );

        let report = liker(&platform, 4).run(&user(1)).await;

        assert_eq!(report.fetched, 1);
        assert_eq!(platform.liked(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_like_error_aborts_remaining() {
        let platform = MockPlatform::new()
            .with_user_feed(1, vec![items(1, &["a", "b", "c"])])
            .fail_like("b");

        let report = liker(&platform, 3).run(&user(1)).await;

        assert_eq!(report, LikeReport { fetched: 3, liked: 1, aborted: true });
        assert_eq!(platform.like_attempts(), 2);
    }

    #[tokio::test]
    async fn test_pool_runs_submitted_jobs() {
        let platform = MockPlatform::new()
            .with_user_feed(1, vec![items(1, &["a"])])
            .with_user_feed(2, vec![items(2, &["b"])]);
        let pool = LikerPool::spawn(Arc::new(liker(&platform, 1)), 2, 8, CancellationToken::new());

        assert!(pool.submit(user(1)));
        assert!(pool.submit(user(2)));
        pool.shutdown().await;

        let mut liked = platform.liked();
        liked.sort();
        assert_eq!(liked, vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_bounds_concurrency() {
        let mut platform = MockPlatform::new().with_feed_delay(Duration::from_secs(1));
        for pk in 0..6 {
            platform = platform.with_user_feed(pk, vec![items(pk, &["x"])]);
        }
        let pool = LikerPool::spawn(Arc::new(liker(&platform, 1)), 2, 16, CancellationToken::new());

        for pk in 0..6 {
            assert!(pool.submit(user(pk)));
        }
        pool.shutdown().await;

        assert_eq!(platform.like_attempts(), 6);
        assert_eq!(platform.max_concurrent_feed_calls(), 2);
    }

    #[tokio::test]
    async fn test_full_backlog_drops_jobs() {
        let platform = MockPlatform::new();
        let events = EventBus::default();
        let mut received = events.subscribe();
        let liker = Liker::new(Arc::new(platform.clone()), 1, events);
        let pool = LikerPool::spawn(Arc::new(liker), 1, 1, CancellationToken::new());

        // The dispatcher has not run yet on this single-threaded runtime, so
        // only the first job fits in the backlog.
        let accepted = (0..3).filter(|pk| pool.submit(user(*pk))).count();
        assert_eq!(accepted, 1);
        assert!(matches!(
            received.try_recv(),
            Ok(BotEvent::LikerJobDropped { username }) if username == "user1"
        ));

        pool.shutdown().await;
        assert_eq!(platform.user_feed_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_admits_running_plus_backlog() {
        let mut platform = MockPlatform::new().with_feed_delay(Duration::from_secs(3600));
        for pk in 0..4 {
            platform = platform.with_user_feed(pk, vec![items(pk, &["x"])]);
        }
        let cancel = CancellationToken::new();
        let pool = LikerPool::spawn(Arc::new(liker(&platform, 1)), 1, 1, cancel.clone());

        // Let the dispatcher start each accepted job before the next submit.
        let mut accepted = 0;
        for pk in 0..4 {
            if pool.submit(user(pk)) {
                accepted += 1;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        // One running, one waiting in the backlog.
        assert_eq!(accepted, 2);
        assert_eq!(platform.user_feed_calls().len(), 1);

        cancel.cancel();
        pool.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_running_jobs() {
        let platform = MockPlatform::new()
            .with_feed_delay(Duration::from_secs(3600))
            .with_user_feed(1, vec![items(1, &["a"])]);
        let cancel = CancellationToken::new();
        let pool = LikerPool::spawn(Arc::new(liker(&platform, 1)), 1, 4, cancel.clone());

        pool.submit(user(1));
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        pool.shutdown().await;

        assert_eq!(platform.like_attempts(), 0);
    }
}
