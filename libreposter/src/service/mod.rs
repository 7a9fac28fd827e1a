//! Pipeline services and the scheduler that drives them
//!
//! # Architecture
//!
//! [`Bot`] owns the shared cache and queue, the configuration and the
//! platform collaborators, and hands them to the components:
//!
//! - [`Fetcher`](fetcher::Fetcher): harvest and enqueue new submissions
//! - [`Uploader`](uploader::Uploader): publish a batch from the queue
//! - [`CacheCleaner`](cleaner::CacheCleaner): forget seen ids
//! - [`TagFollower`](follower::TagFollower) and
//!   [`LikerPool`](liker::LikerPool): optional follow/like loop
//! - [`EventBus`](events::EventBus): what happened, for subscribers
//!
//! # Example
//!
//! ```no_run
//! use libreposter::service::Bot;
//! use libreposter::Config;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> libreposter::Result<()> {
//! let bot = Bot::connect(Config::load()?).await?;
//!
//! let cancel = CancellationToken::new();
//! bot.run(cancel).await;
//! # Ok(())
//! # }
//! ```

pub mod cleaner;
pub mod events;
pub mod fetcher;
pub mod follower;
pub mod liker;
pub mod uploader;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use self::cleaner::CacheCleaner;
use self::events::{EventBus, EventReceiver};
use self::fetcher::Fetcher;
use self::follower::TagFollower;
use self::liker::{Liker, LikerPool};
use self::uploader::{UploadReport, Uploader};
use crate::imaging::{ImageTransform, SquarePadTransform};
use crate::platforms::instagram::InstagramClient;
use crate::platforms::SocialPlatform;
use crate::sources::reddit::RedditSource;
use crate::sources::ContentSource;
use crate::state::{PostQueue, SharedState};
use crate::{Config, Result};

/// Scheduler facade for the whole pipeline.
pub struct Bot {
    config: Arc<Config>,
    state: Arc<SharedState>,
    source: Arc<dyn ContentSource>,
    platform: Arc<dyn SocialPlatform>,
    transform: Arc<dyn ImageTransform>,
    events: EventBus,
}

impl Bot {
    /// Create the real collaborators and log in to both platforms.
    ///
    /// # Errors
    ///
    /// Fails if either platform rejects the credentials. This is the only
    /// fatal error of the bot.
    pub async fn connect(config: Config) -> Result<Self> {
        let mut source = RedditSource::new(&config.reddit)?;
        source.authenticate().await?;
        info!(source = source.name(), "Authenticated");

        let mut platform = InstagramClient::new(&config.instagram)?;
        platform.authenticate().await?;
        info!(
            platform = platform.name(),
            username = %config.instagram.username,
            "Authenticated"
        );

        let transform = SquarePadTransform::new()?;

        Ok(Self::with_collaborators(
            config,
            Arc::new(source),
            Arc::new(platform),
            Arc::new(transform),
        ))
    }

    /// Assemble a bot from already authenticated collaborators.
    pub fn with_collaborators(
        config: Config,
        source: Arc<dyn ContentSource>,
        platform: Arc<dyn SocialPlatform>,
        transform: Arc<dyn ImageTransform>,
    ) -> Self {
        let queue = PostQueue::new(
            config.schedule.queue_capacity,
            config.schedule.overflow_policy,
        );

        Self {
            config: Arc::new(config),
            state: Arc::new(SharedState::new(queue)),
            source,
            platform,
            transform,
            events: EventBus::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> Arc<SharedState> {
        Arc::clone(&self.state)
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn fetcher(&self) -> Fetcher {
        Fetcher::new(
            Arc::clone(&self.source),
            Arc::clone(&self.state),
            self.config.subreddits(),
            self.config.reddit.posts_per_subreddit,
            self.events.clone(),
        )
    }

    pub fn uploader(&self) -> Uploader {
        Uploader::new(
            Arc::clone(&self.platform),
            Arc::clone(&self.transform),
            Arc::clone(&self.state),
            self.config.schedule.posts_per_upload,
            self.config.hashtags(),
            self.events.clone(),
        )
    }

    pub fn cache_cleaner(&self) -> CacheCleaner {
        CacheCleaner::new(Arc::clone(&self.state), self.events.clone())
    }

    /// The follower, if a follow tag is configured. Spawns its liker pool,
    /// so it must be called inside a tokio runtime.
    pub fn tag_follower(&self, cancel: &CancellationToken) -> Option<TagFollower> {
        let follow = self.config.follow.as_ref()?;

        let liker = Liker::new(
            Arc::clone(&self.platform),
            follow.likes_per_user,
            self.events.clone(),
        );
        let pool = LikerPool::spawn(
            Arc::new(liker),
            follow.max_concurrent_likers,
            follow.liker_backlog,
            cancel.clone(),
        );

        Some(TagFollower::new(
            Arc::clone(&self.platform),
            follow.tag.trim_start_matches('#'),
            follow.follow_delay,
            follow.cooldown,
            pool,
            self.events.clone(),
        ))
    }

    /// One fetch cycle followed by one upload cycle. A failed fetch is
    /// logged and the upload still runs on whatever is queued.
    pub async fn run_once(&self) -> UploadReport {
        fetch_and_log(&self.fetcher())
            .instrument(info_span!("fetcher"))
            .await;
        self.uploader()
            .run_cycle()
            .instrument(info_span!("uploader"))
            .await
    }

    /// Run the initial fetch and upload, then every timer, until `cancel`
    /// fires. The follower starts alongside the initial cycle.
    pub async fn run(&self, cancel: CancellationToken) {
        self.log_settings();

        let schedule = &self.config.schedule;
        let fetcher = &self.fetcher();
        let uploader = &self.uploader();
        let cleaner = &self.cache_cleaner();
        let follower = self.tag_follower(&cancel);

        let fetching = every(schedule.fetch_interval, &cancel, move || fetch_and_log(fetcher))
            .instrument(info_span!("fetcher"));
        let uploading = every(schedule.upload_interval, &cancel, move || async move {
            uploader.run_cycle().await;
        })
        .instrument(info_span!("uploader"));
        let cleaning = every(schedule.cache_clear_interval, &cancel, move || async move {
            cleaner.run_cycle();
        })
        .instrument(info_span!("cache_cleaner"));
        let following = async {
            if let Some(follower) = follower {
                follower.run(cancel.clone()).await;
            }
        }
        .instrument(info_span!("follower"));

        let scheduled = async {
            self.run_once().await;
            tokio::join!(fetching, uploading, cleaning);
        };

        tokio::join!(scheduled, following);
        info!("All loops stopped");
    }

    /// Log the effective settings once. Credentials are left out.
    fn log_settings(&self) {
        let config = &self.config;
        let schedule = &config.schedule;

        info!("Subreddits: {}", config.subreddits().join(", "));
        info!("Posts per subreddit: {}", config.reddit.posts_per_subreddit);
        info!("Hashtags: {}", config.hashtags().join(" "));
        info!(
            "Fetch every {}, upload {} posts every {}, clear cache every {}",
            humantime::format_duration(schedule.fetch_interval),
            schedule.posts_per_upload,
            humantime::format_duration(schedule.upload_interval),
            humantime::format_duration(schedule.cache_clear_interval),
        );
        match schedule.queue_capacity {
            Some(capacity) => info!(
                "Queue capacity: {} ({:?} on overflow)",
                capacity, schedule.overflow_policy
            ),
            None => info!("Queue capacity: unbounded"),
        }
        match &config.follow {
            Some(follow) => info!(
                "Following #{}, liking {} posts per user with up to {} likers",
                follow.tag.trim_start_matches('#'),
                follow.likes_per_user,
                follow.max_concurrent_likers
            ),
            None => info!("Tag following disabled"),
        }
    }
}

async fn fetch_and_log(fetcher: &Fetcher) {
    match fetcher.run_cycle().await {
        Ok(_) => {}
        Err(e) if e.is_transient() => warn!("Fetch cycle failed, retrying next tick: {}", e),
        Err(e) => error!("Fetch cycle failed: {}", e),
    }
}

/// Call `cycle` every `period`, first one period from now, until cancelled.
/// A slow cycle delays the following ticks rather than bunching them up.
async fn every<F, Fut>(period: Duration, cancel: &CancellationToken, mut cycle: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let Some(start) = Instant::now().checked_add(period) else {
        warn!(?period, "Interval out of range, loop disabled");
        cancel.cancelled().await;
        return;
    };
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => cycle().await,
        }
    }
}
