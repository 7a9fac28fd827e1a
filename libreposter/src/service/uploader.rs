//! Upload cycle: dequeue a batch and republish each publishable submission

use std::sync::Arc;
use tracing::{error, info};

use crate::error::Result;
use crate::imaging::ImageTransform;
use crate::platforms::SocialPlatform;
use crate::service::events::{BotEvent, EventBus};
use crate::state::SharedState;
use crate::types::{Submission, UploadOutcome};

const FALLBACK_TITLE: &str = "Title goes here..";

/// Invisible separator that keeps the platform from collapsing blank lines.
const SPACER: char = '\u{2063}';

/// Build the photo caption for a submission.
///
/// ```
/// use libreposter::service::uploader::build_caption;
/// # use libreposter::types::Submission;
/// # let submission = Submission {
/// #     id: "1".into(), title: "Cat".into(), author: "alice".into(),
/// #     community: "aww".into(), url: None, is_video: false,
/// #     selftext: None, score: 0,
/// # };
/// let caption = build_caption(&submission, &["#cats".to_string()]);
/// assert!(caption.starts_with("Cat "));
/// assert!(caption.contains("Uploaded to r/aww by u/alice"));
/// assert!(caption.ends_with("#cats"));
/// ```
pub fn build_caption(submission: &Submission, hashtags: &[String]) -> String {
    let title = if submission.title.is_empty() {
        FALLBACK_TITLE
    } else {
        submission.title.as_str()
    };

    format!(
        "{title} \n{s}\n{s}\n{s}\nUploaded to r/{community} by u/{author}\n{s}\n{tags}",
        s = SPACER,
        community = submission.community,
        author = submission.author,
        tags = hashtags.join(" "),
    )
}

/// Per-cycle totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub uploaded: usize,
    pub ignored: usize,
    pub failed: usize,
}

impl UploadReport {
    fn record(&mut self, outcome: &UploadOutcome) {
        match outcome {
            UploadOutcome::Uploaded { .. } => self.uploaded += 1,
            UploadOutcome::Ignored => self.ignored += 1,
            UploadOutcome::Failed { .. } => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.uploaded + self.ignored + self.failed
    }
}

pub struct Uploader {
    platform: Arc<dyn SocialPlatform>,
    transform: Arc<dyn ImageTransform>,
    state: Arc<SharedState>,
    batch_size: usize,
    hashtags: Vec<String>,
    events: EventBus,
}

impl Uploader {
    pub fn new(
        platform: Arc<dyn SocialPlatform>,
        transform: Arc<dyn ImageTransform>,
        state: Arc<SharedState>,
        batch_size: usize,
        hashtags: Vec<String>,
        events: EventBus,
    ) -> Self {
        Self {
            platform,
            transform,
            state,
            batch_size,
            hashtags,
            events,
        }
    }

    /// Dequeue up to `batch_size` submissions and handle each in order.
    ///
    /// Items are consumed whatever their outcome; a failed item is never put
    /// back on the queue.
    pub async fn run_cycle(&self) -> UploadReport {
        let batch = self.state.dequeue_batch(self.batch_size);
        let total = batch.len();
        info!(batch = total, "Uploading {} posts", total);

        let mut report = UploadReport::default();
        for (index, submission) in batch.iter().enumerate() {
            let position = index + 1;
            let outcome = self.process(submission, position, total).await;
            report.record(&outcome);
            self.events.emit(BotEvent::ItemProcessed {
                submission_id: submission.id.clone(),
                outcome,
            });
        }

        info!(
            uploaded = report.uploaded,
            ignored = report.ignored,
            failed = report.failed,
            "Upload cycle complete"
        );
        self.events.emit(BotEvent::UploadCompleted {
            uploaded: report.uploaded,
            ignored: report.ignored,
            failed: report.failed,
        });

        report
    }

    async fn process(&self, submission: &Submission, position: usize, total: usize) -> UploadOutcome {
        let media_url = match submission.media_url() {
            Some(url) if submission.is_publishable() => url,
            _ => {
                info!("[{}/{}] Ignoring submission {}", position, total, submission.id);
                return UploadOutcome::Ignored;
            }
        };

        match self.publish(submission, media_url).await {
            Ok(media_id) => {
                info!(
                    "[{}/{}] Uploaded submission {} as {}",
                    position, total, submission.id, media_id
                );
                UploadOutcome::Uploaded { media_id }
            }
            Err(e) => {
                error!(
                    "[{}/{}] Failed to upload submission {}: {}",
                    position, total, submission.id, e
                );
                UploadOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn publish(&self, submission: &Submission, media_url: &str) -> Result<String> {
        let jpeg = self.transform.square_pad(media_url).await?;
        let caption = build_caption(submission, &self.hashtags);
        self.platform.publish_photo(&jpeg, &caption).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::mock::MockTransform;
    use crate::platforms::mock::MockPlatform;
    use crate::sources::mock::image_submission;

    fn uploader(platform: MockPlatform, transform: MockTransform, state: Arc<SharedState>, n: usize) -> Uploader {
        Uploader::new(
            Arc::new(platform),
            Arc::new(transform),
            state,
            n,
            vec!["#memes".to_string(), "#funny".to_string()],
            EventBus::default(),
        )
    }

    #[test]
    fn test_caption_layout() {
        let submission = image_submission("abc", "aww", 1);
        let caption = build_caption(&submission, &["#a".to_string(), "#b".to_string()]);

        assert_eq!(
            caption,
            "Post abc \n\u{2063}\n\u{2063}\n\u{2063}\nUploaded to r/aww by u/author_abc\n\u{2063}\n#a #b"
        );
    }

    #[test]
    fn test_caption_falls_back_on_empty_title() {
        let submission = Submission {
            title: String::new(),
            ..image_submission("abc", "aww", 1)
        };
        assert!(build_caption(&submission, &[]).starts_with("Title goes here.. \n"));
    }

    #[tokio::test]
    async fn test_uploads_at_most_batch_size_in_queue_order() {
        let state = Arc::new(SharedState::default());
        state.commit_batch((1..=5).map(|i| image_submission(&i.to_string(), "pics", i)).collect());
        let platform = MockPlatform::new();

        let report = uploader(platform.clone(), MockTransform::new(), state.clone(), 3)
            .run_cycle()
            .await;

        assert_eq!(report.uploaded, 3);
        assert_eq!(platform.published_captions().len(), 3);
        assert!(platform.published_captions()[0].starts_with("Post 1 "));
        assert_eq!(state.queued_ids(), vec!["4", "5"]);
    }

    #[tokio::test]
    async fn test_unpublishable_items_are_ignored_without_transform() {
        let state = Arc::new(SharedState::default());
        let video = Submission {
            is_video: true,
            ..image_submission("v", "pics", 1)
        };
        let text = Submission {
            selftext: Some("story".to_string()),
            ..image_submission("t", "pics", 1)
        };
        let no_url = Submission {
            url: None,
            ..image_submission("n", "pics", 1)
        };
        state.commit_batch(vec![video, text, no_url]);
        let transform = MockTransform::new();
        let platform = MockPlatform::new();

        let report = uploader(platform.clone(), transform.clone(), state, 3).run_cycle().await;

        assert_eq!(report.ignored, 3);
        assert!(transform.requested().is_empty());
        assert_eq!(platform.publish_attempts(), 0);
    }

    #[tokio::test]
    async fn test_transform_failure_is_per_item() {
        let state = Arc::new(SharedState::default());
        state.commit_batch(vec![
            image_submission("a", "pics", 1),
            image_submission("b", "pics", 1),
        ]);
        let transform = MockTransform::new().fail_url("https://i.redd.it/a.jpg");
        let platform = MockPlatform::new();

        let report = uploader(platform.clone(), transform, state.clone(), 5).run_cycle().await;

        assert_eq!(report, UploadReport { uploaded: 1, ignored: 0, failed: 1 });
        assert_eq!(state.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_empty_queue_is_an_empty_batch() {
        let state = Arc::new(SharedState::default());
        let platform = MockPlatform::new();

        let report = uploader(platform.clone(), MockTransform::new(), state, 3).run_cycle().await;

        assert_eq!(report.total(), 0);
        assert_eq!(platform.publish_attempts(), 0);
    }
}
