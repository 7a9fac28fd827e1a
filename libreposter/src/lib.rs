//! Reposter - republish top Reddit posts to Instagram on a schedule
//!
//! The library holds the whole pipeline: a fetcher that harvests and
//! deduplicates submissions, a bounded queue, an uploader that letterboxes and
//! publishes them, a cache cleaner, and an optional tag follower that follows
//! and likes other accounts. `reposter-bot` is a thin binary around
//! [`service::Bot`].

pub mod config;
pub mod error;
pub mod imaging;
pub mod logging;
pub mod platforms;
pub mod service;
pub mod sources;
pub mod state;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{ReposterError, Result};
pub use service::Bot;
pub use state::{CommitReport, OverflowPolicy, PostQueue, SharedState, SubmissionCache};
pub use types::{FeedItem, FeedPage, FeedUser, Submission, UploadOutcome};
