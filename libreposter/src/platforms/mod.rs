//! Platform abstraction and implementations
//!
//! This module provides the trait the pipeline uses to publish photos and to
//! follow and like other accounts on the image-sharing platform.
//!
//! # Examples
//!
//! ```no_run
//! use libreposter::platforms::{SocialPlatform, instagram::InstagramClient};
//! use libreposter::config::InstagramConfig;
//!
//! # async fn example() -> libreposter::error::Result<()> {
//! let config = InstagramConfig {
//!     username: "bot".to_string(),
//!     password: "hunter2".to_string(),
//!     tags: vec!["memes".to_string()],
//! };
//!
//! let mut platform = InstagramClient::new(&config)?;
//! platform.authenticate().await?;
//!
//! let page = platform.tag_feed_page("memes", None).await?;
//! for item in &page.items {
//!     platform.follow(item.user.pk).await?;
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{FeedPage, FeedUser};

pub mod instagram;

// Mock platform is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Unified interface to the image-sharing platform.
///
/// Every method except [`authenticate`](SocialPlatform::authenticate)
/// requires an authenticated session.
#[async_trait]
pub trait SocialPlatform: Send + Sync {
    /// Log in and establish a session.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Authentication` for bad credentials and
    /// `PlatformError::ChallengeRequired` when the platform asks for an
    /// extra verification step.
    async fn authenticate(&mut self) -> Result<()>;

    /// Publish a JPEG photo with a caption, returning the platform media id.
    async fn publish_photo(&self, jpeg: &[u8], caption: &str) -> Result<String>;

    /// Follow the user with the given numeric id. Following an already
    /// followed user is a no-op on the platform side.
    async fn follow(&self, user_pk: u64) -> Result<()>;

    /// Like a media item. `owner` is the account that posted it.
    async fn like(&self, media_id: &str, owner: &FeedUser) -> Result<()>;

    /// One page of a user's own posts. `cursor` is the `next_cursor` of the
    /// previous page, or `None` for the first page.
    async fn user_feed_page(&self, user_pk: u64, cursor: Option<&str>) -> Result<FeedPage>;

    /// One page of posts carrying `tag` (without '#').
    async fn tag_feed_page(&self, tag: &str, cursor: Option<&str>) -> Result<FeedPage>;

    /// Lowercase identifier, e.g. "instagram".
    fn name(&self) -> &str;
}
