//! Tag follower: follow the posters of a tag feed and hand them to the likers

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::platforms::SocialPlatform;
use crate::service::events::{BotEvent, EventBus};
use crate::service::liker::LikerPool;
use crate::types::FeedItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowerState {
    /// Working through the tag feed
    Polling,
    /// Backing off after an error
    Cooldown,
}

pub struct TagFollower {
    platform: Arc<dyn SocialPlatform>,
    tag: String,
    follow_delay: Duration,
    cooldown: Duration,
    pool: LikerPool,
    events: EventBus,
    cursor: Option<String>,
    state: FollowerState,
}

/// Sleep for `duration` unless cancelled first. Returns false on cancel.
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleep(duration) => true,
    }
}

impl TagFollower {
    pub fn new(
        platform: Arc<dyn SocialPlatform>,
        tag: impl Into<String>,
        follow_delay: Duration,
        cooldown: Duration,
        pool: LikerPool,
        events: EventBus,
    ) -> Self {
        Self {
            platform,
            tag: tag.into(),
            follow_delay,
            cooldown,
            pool,
            events,
            cursor: None,
            state: FollowerState::Polling,
        }
    }

    pub fn state(&self) -> FollowerState {
        self.state
    }

    /// Cursor of the next tag-feed page, `None` when starting from the top.
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Alternate between polling and cooldown until `cancel` fires, then
    /// stop the liker pool.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(tag = %self.tag, "Following posters of #{}", self.tag);

        while !cancel.is_cancelled() {
            self.step(&cancel).await;
        }

        debug!("Follower stopped, waiting for likers");
        self.pool.shutdown().await;
    }

    /// Perform the work of the current state and move to the next one.
    pub async fn step(&mut self, cancel: &CancellationToken) -> FollowerState {
        self.state = match self.state {
            FollowerState::Polling => match self.poll(cancel).await {
                Ok(()) => FollowerState::Polling,
                Err(e) => {
                    error!(error = %e, "Follower error, cooling down for {:?}", self.cooldown);
                    self.events.emit(BotEvent::FollowerCooldown {
                        error: e.to_string(),
                    });
                    FollowerState::Cooldown
                }
            },
            FollowerState::Cooldown => {
                pause(self.cooldown, cancel).await;
                FollowerState::Polling
            }
        };
        self.state
    }

    /// Follow everyone on the next tag-feed page.
    async fn poll(&mut self, cancel: &CancellationToken) -> Result<()> {
        let page = self
            .platform
            .tag_feed_page(&self.tag, self.cursor.as_deref())
            .await?;
        debug!(items = page.items.len(), cursor = ?self.cursor, "Fetched tag feed page");

        // No next page means start again from the top.
        self.cursor = page.next_cursor;

        if page.items.is_empty() {
            pause(self.follow_delay, cancel).await;
            return Ok(());
        }

        for item in page.items {
            self.follow(item).await?;
            if !pause(self.follow_delay, cancel).await {
                break;
            }
        }
        Ok(())
    }

    async fn follow(&self, item: FeedItem) -> Result<()> {
        let user = item.user;
        self.platform.follow(user.pk).await?;

        info!("Followed user {}", user.username);
        self.events.emit(BotEvent::UserFollowed {
            user_pk: user.pk,
            username: user.username.clone(),
        });

        self.pool.submit(user);
        Ok(())
    }
}
