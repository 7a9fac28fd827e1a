//! End-to-end pipeline tests against the mock collaborators

use libreposter::config::FollowConfig;
use libreposter::imaging::mock::MockTransform;
use libreposter::platforms::mock::{feed_item, MockPage, MockPlatform};
use libreposter::service::events::BotEvent;
use libreposter::sources::mock::{image_submission, MockSource};
use libreposter::{Bot, Config, OverflowPolicy, Submission, UploadOutcome};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn config(communities: &[&str], per_community: usize, per_upload: usize) -> Config {
    let subreddits = communities
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(", ");

    let config = Config::from_toml(&format!(
        r##"
[reddit]
user_agent = "reposter-tests"
client_id = "id"
client_secret = "secret"
refresh_token = "token"
subreddits = [{subreddits}]
posts_per_subreddit = {per_community}

[instagram]
username = "bot"
password = "pw"
tags = ["memes", "#funny"]

[schedule]
posts_per_upload = {per_upload}
"##
    ))
    .unwrap();
    config.validate().unwrap();
    config
}

fn ranked(community: &str, count: i64) -> Vec<Submission> {
    (0..count)
        .map(|i| image_submission(&format!("{}{}", community, i), community, 100 - i))
        .collect()
}

fn bot(config: Config, source: &MockSource, platform: &MockPlatform, transform: &MockTransform) -> Bot {
    Bot::with_collaborators(
        config,
        Arc::new(source.clone()),
        Arc::new(platform.clone()),
        Arc::new(transform.clone()),
    )
}

#[tokio::test]
async fn test_two_community_scenario() {
    let source = MockSource::new()
        .with_listing("a", ranked("a", 5))
        .with_listing("b", ranked("b", 3));
    let bot = bot(config(&["a", "b"], 2, 3), &source, &MockPlatform::new(), &MockTransform::new());
    let state = bot.state();

    let report = bot.fetcher().run_cycle().await.unwrap();
    assert_eq!(report.enqueued, 4);

    let queued: HashSet<String> = state.queued_ids().into_iter().collect();
    let expected: HashSet<String> = ["a0", "a1", "b0", "b1"].iter().map(|s| s.to_string()).collect();
    assert_eq!(queued, expected);
    assert_eq!(state.cache_len(), 4);

    // Same source data again: cached ids are skipped and the next best
    // unseen items take their place.
    let report = bot.fetcher().run_cycle().await.unwrap();
    assert_eq!(report.enqueued, 3);

    let queued: HashSet<String> = state.queued_ids().into_iter().collect();
    let expected: HashSet<String> = ["a0", "a1", "b0", "b1", "a2", "a3", "b2"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(queued, expected);
    assert_eq!(state.cache_len(), 7);
}

#[tokio::test]
async fn test_repeat_cycle_over_seen_listings_adds_nothing() {
    let source = MockSource::new()
        .with_listing("a", ranked("a", 2))
        .with_listing("b", ranked("b", 2));
    let bot = bot(config(&["a", "b"], 2, 3), &source, &MockPlatform::new(), &MockTransform::new());
    let state = bot.state();

    assert_eq!(bot.fetcher().run_cycle().await.unwrap().enqueued, 4);

    let report = bot.fetcher().run_cycle().await.unwrap();
    assert_eq!(report.enqueued, 0);
    assert_eq!(state.queue_len(), 4);
}

#[tokio::test]
async fn test_fetch_order_is_shuffled() {
    let source = MockSource::new().with_listing("a", ranked("a", 40));
    let bot = bot(config(&["a"], 40, 3), &source, &MockPlatform::new(), &MockTransform::new());

    bot.fetcher().run_cycle().await.unwrap();

    let ranked_ids: Vec<String> = (0..40).map(|i| format!("a{}", i)).collect();
    // 40! orderings; matching rank order by chance is not a concern.
    assert_ne!(bot.state().queued_ids(), ranked_ids);
}

#[tokio::test]
async fn test_dedup_holds_across_cycles_with_new_items() {
    let source = MockSource::new().with_listing("a", ranked("a", 3));
    let bot = bot(config(&["a"], 2, 3), &source, &MockPlatform::new(), &MockTransform::new());
    let state = bot.state();

    bot.fetcher().run_cycle().await.unwrap();
    source.set_listing("a", ranked("a", 6));
    bot.fetcher().run_cycle().await.unwrap();

    let ids = state.queued_ids();
    let unique: HashSet<&String> = ids.iter().collect();
    assert_eq!(ids.len(), unique.len());
    assert_eq!(ids.len(), 4);
}

#[tokio::test]
async fn test_cache_clear_allows_refetch() {
    let source = MockSource::new().with_listing("a", ranked("a", 2));
    let bot = bot(config(&["a"], 2, 3), &source, &MockPlatform::new(), &MockTransform::new());
    let state = bot.state();

    bot.fetcher().run_cycle().await.unwrap();
    state.dequeue_batch(10);

    assert_eq!(bot.cache_cleaner().run_cycle(), 2);
    assert_eq!(state.cache_len(), 0);

    let report = bot.fetcher().run_cycle().await.unwrap();
    assert_eq!(report.enqueued, 2);
}

#[tokio::test]
async fn test_short_queue_is_partial_batch() {
    let source = MockSource::new().with_listing("a", ranked("a", 2));
    let platform = MockPlatform::new();
    let bot = bot(config(&["a"], 2, 3), &source, &platform, &MockTransform::new());

    bot.fetcher().run_cycle().await.unwrap();
    let report = bot.uploader().run_cycle().await;

    assert_eq!(report.uploaded, 2);
    assert_eq!(platform.publish_attempts(), 2);
    assert_eq!(bot.state().queue_len(), 0);
}

#[tokio::test]
async fn test_failing_item_does_not_stop_batch() {
    let source = MockSource::new().with_listing("a", ranked("a", 3));
    let platform = MockPlatform::new().fail_publish_when_caption_contains("Post a1 ");
    let bot = bot(config(&["a"], 3, 3), &source, &platform, &MockTransform::new());
    let mut events = bot.subscribe();

    bot.fetcher().run_cycle().await.unwrap();
    let report = bot.uploader().run_cycle().await;

    assert_eq!(report.uploaded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(platform.publish_attempts(), 3);

    let mut outcomes = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let BotEvent::ItemProcessed { submission_id, outcome } = event {
            outcomes.push((submission_id, outcome));
        }
    }
    assert_eq!(outcomes.len(), 3);
    let failed: Vec<&String> = outcomes
        .iter()
        .filter(|(_, outcome)| matches!(outcome, UploadOutcome::Failed { .. }))
        .map(|(id, _)| id)
        .collect();
    assert_eq!(failed, vec!["a1"]);
}

#[tokio::test]
async fn test_skip_rule_never_publishes() {
    let video = Submission {
        is_video: true,
        ..image_submission("video", "a", 30)
    };
    let text = Submission {
        selftext: Some("read me".to_string()),
        ..image_submission("text", "a", 20)
    };
    let link = Submission {
        url: None,
        ..image_submission("nolink", "a", 10)
    };
    let source = MockSource::new().with_listing("a", vec![video, text, link]);
    let platform = MockPlatform::new();
    let transform = MockTransform::new();
    let bot = bot(config(&["a"], 3, 3), &source, &platform, &transform);

    bot.fetcher().run_cycle().await.unwrap();
    let report = bot.uploader().run_cycle().await;

    assert_eq!(report.ignored, 3);
    assert_eq!(platform.publish_attempts(), 0);
    assert!(transform.requested().is_empty());
}

#[tokio::test]
async fn test_captions_carry_attribution_and_hashtags() {
    let source = MockSource::new().with_listing("a", ranked("a", 1));
    let platform = MockPlatform::new();
    let bot = bot(config(&["r/a"], 1, 1), &source, &platform, &MockTransform::new());

    bot.run_once().await;

    let caption = &platform.published_captions()[0];
    assert!(caption.starts_with("Post a0 "));
    assert!(caption.contains("Uploaded to r/a by u/author_a0"));
    assert!(caption.ends_with("#memes #funny"));
}

#[tokio::test]
async fn test_drop_oldest_keeps_newest() {
    let mut config = config(&["a"], 5, 3);
    config.schedule.queue_capacity = Some(3);
    config.schedule.overflow_policy = OverflowPolicy::DropOldest;
    let source = MockSource::new().with_listing("a", ranked("a", 2));
    let bot = bot(config, &source, &MockPlatform::new(), &MockTransform::new());
    let state = bot.state();

    bot.fetcher().run_cycle().await.unwrap();
    source.set_listing("a", ranked("b", 2));
    let report = bot.fetcher().run_cycle().await.unwrap();

    assert_eq!(report.dropped, 1);
    assert_eq!(state.queue_len(), 3);
    let queued = state.queued_ids();
    assert!(queued.contains(&"b0".to_string()));
    assert!(queued.contains(&"b1".to_string()));
}

#[tokio::test]
async fn test_reject_new_leaves_items_uncached() {
    let mut config = config(&["a"], 5, 3);
    config.schedule.queue_capacity = Some(2);
    config.schedule.overflow_policy = OverflowPolicy::RejectNew;
    let source = MockSource::new().with_listing("a", ranked("a", 4));
    let bot = bot(config, &source, &MockPlatform::new(), &MockTransform::new());
    let state = bot.state();

    let report = bot.fetcher().run_cycle().await.unwrap();

    assert_eq!(report.enqueued, 2);
    assert_eq!(report.rejected, 2);
    assert_eq!(state.cache_len(), 2);

    // Once there is room the rejected items come back.
    state.dequeue_batch(2);
    let report = bot.fetcher().run_cycle().await.unwrap();
    assert_eq!(report.enqueued, 2);
}

#[tokio::test]
async fn test_failed_community_commits_nothing() {
    let source = MockSource::new().with_listing("a", ranked("a", 3));
    source.fail_community("b", "503");
    let bot = bot(config(&["a", "b"], 2, 3), &source, &MockPlatform::new(), &MockTransform::new());

    assert!(bot.fetcher().run_cycle().await.is_err());
    assert_eq!(bot.state().queue_len(), 0);
    assert_eq!(bot.state().cache_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_follow_and_like_quota() {
    let mut config = config(&["a"], 1, 1);
    config.follow = Some(FollowConfig::new("memes", 2));

    let platform = MockPlatform::new()
        .with_tag_feed("memes", vec![MockPage::Items(vec![feed_item("t1", 7, "alice")])])
        .with_user_feed(
            7,
            vec![MockPage::Items(vec![
                feed_item("p1", 7, "alice"),
                feed_item("p2", 7, "alice"),
                feed_item("p3", 7, "alice"),
            ])],
        );
    let bot = bot(config, &MockSource::new(), &platform, &MockTransform::new());
    let cancel = CancellationToken::new();
    let follower = bot.tag_follower(&cancel).unwrap();

    let handle = tokio::spawn(follower.run(cancel.clone()));
    tokio::time::sleep(Duration::from_secs(10)).await;
    cancel.cancel();
    handle.await.unwrap();

    assert_eq!(platform.followed(), vec![7]);
    assert_eq!(platform.liked(), vec!["p1", "p2"]);
}

#[tokio::test(start_paused = true)]
async fn test_zero_quota_never_reads_user_feeds() {
    let mut config = config(&["a"], 1, 1);
    config.follow = Some(FollowConfig::new("memes", 0));

    let platform = MockPlatform::new()
        .with_tag_feed("memes", vec![MockPage::Items(vec![feed_item("t1", 7, "alice")])])
        .with_user_feed(7, vec![MockPage::Items(vec![feed_item("p1", 7, "alice")])]);
    let bot = bot(config, &MockSource::new(), &platform, &MockTransform::new());
    let cancel = CancellationToken::new();
    let follower = bot.tag_follower(&cancel).unwrap();

    let handle = tokio::spawn(follower.run(cancel.clone()));
    tokio::time::sleep(Duration::from_secs(10)).await;
    cancel.cancel();
    handle.await.unwrap();

    assert_eq!(platform.followed(), vec![7]);
    assert!(platform.user_feed_calls().is_empty());
    assert_eq!(platform.like_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_bot_run_stops_on_cancel() {
    let source = MockSource::new().with_listing("a", ranked("a", 10));
    let platform = MockPlatform::new();
    let mut config = config(&["a"], 2, 1);
    config.follow = Some(FollowConfig::new("memes", 1));
    let bot = bot(config, &source, &platform, &MockTransform::new());
    let cancel = CancellationToken::new();

    let run = bot.run(cancel.clone());
    let stop = async {
        // Initial upload plus the ones at 1h and 2h.
        tokio::time::sleep(Duration::from_secs(2 * 3600 + 60)).await;
        cancel.cancel();
    };
    tokio::join!(run, stop);

    assert_eq!(platform.publish_attempts(), 3);
}
