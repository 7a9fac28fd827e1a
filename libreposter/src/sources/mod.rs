//! Content sources
//!
//! A content source lists the top-ranked submissions of a community. The
//! fetcher only depends on the [`ContentSource`] trait; [`reddit`] provides the
//! production implementation and [`mock`] a scriptable one for tests.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Submission;

pub mod reddit;

// Available in all builds so integration tests can drive the pipeline
pub mod mock;

#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Obtain whatever session the source needs before listing.
    async fn authenticate(&mut self) -> Result<()>;

    /// List up to `limit` top-ranked submissions of `community`, in the
    /// order the source ranks them.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::Network` for transient failures and
    /// `SourceError::NotFound` when the community does not exist.
    async fn top_submissions(&self, community: &str, limit: usize) -> Result<Vec<Submission>>;

    /// Lowercase identifier, e.g. "reddit".
    fn name(&self) -> &str;
}
