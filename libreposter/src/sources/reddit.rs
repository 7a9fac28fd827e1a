//! Reddit content source
//!
//! Uses the OAuth "installed script" refresh-token grant and the `hot` listing
//! of each subreddit.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::RedditConfig;
use crate::error::{Result, SourceError};
use crate::sources::ContentSource;
use crate::types::Submission;

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_BASE: &str = "https://oauth.reddit.com";

/// Refresh the token this long before Reddit would expire it.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Tokens are refreshed at least this often, whatever lifetime Reddit claims.
const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Reddit caps listing pages at 100 items.
const MAX_LISTING_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

impl AccessToken {
    fn new(value: String, expires_in: u64) -> Self {
        let lifetime = Duration::from_secs(expires_in).min(MAX_TOKEN_LIFETIME);
        Self {
            value,
            expires_at: Instant::now() + lifetime,
        }
    }

    fn is_fresh(&self) -> bool {
        Instant::now() + TOKEN_EXPIRY_MARGIN < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<ListingChild>,
}

#[derive(Debug, Deserialize)]
struct ListingChild {
    data: PostData,
}

#[derive(Debug, Deserialize)]
struct PostData {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    subreddit: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    is_video: bool,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    ups: i64,
}

impl From<PostData> for Submission {
    fn from(post: PostData) -> Self {
        Submission {
            id: post.id,
            title: post.title,
            author: post.author,
            community: post.subreddit,
            url: post.url.filter(|url| !url.is_empty()),
            is_video: post.is_video,
            selftext: Some(post.selftext).filter(|text| !text.is_empty()),
            score: post.ups,
        }
    }
}

/// Parse a subreddit listing body into submissions, preserving Reddit's order.
pub fn parse_listing(body: &str) -> Result<Vec<Submission>> {
    let listing: Listing = serde_json::from_str(body)
        .map_err(|e| SourceError::InvalidResponse(format!("Malformed listing: {}", e)))?;

    Ok(listing
        .data
        .children
        .into_iter()
        .map(|child| child.data.into())
        .collect())
}

/// Map a non-success HTTP status to a source error.
fn status_error(status: StatusCode, context: &str) -> SourceError {
    match status.as_u16() {
        401 | 403 => SourceError::Authentication(format!("{} rejected with {}", context, status)),
        404 => SourceError::NotFound(context.to_string()),
        429 => SourceError::RateLimit(format!("{} rate limited", context)),
        _ => SourceError::Network(format!("{} failed with {}", context, status)),
    }
}

pub struct RedditSource {
    http: Client,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    token: Mutex<Option<AccessToken>>,
}

impl RedditSource {
    pub fn new(config: &RedditConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SourceError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            refresh_token: config.refresh_token.clone(),
            token: Mutex::new(None),
        })
    }

    async fn request_token(&self) -> Result<AccessToken> {
        let response = self
            .http
            .post(TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", self.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SourceError::Network(format!("Token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, "Token refresh").into());
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SourceError::InvalidResponse(format!("Malformed token response: {}", e)))?;

        debug!("Obtained Reddit access token valid for {}s", token.expires_in);

        Ok(AccessToken::new(token.access_token, token.expires_in))
    }

    /// Return a fresh access token, refreshing it when close to expiry.
    async fn access_token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }

        let token = self.request_token().await?;
        let value = token.value.clone();
        *guard = Some(token);
        Ok(value)
    }
}

#[async_trait]
impl ContentSource for RedditSource {
    async fn authenticate(&mut self) -> Result<()> {
        self.access_token().await.map(|_| ())
    }

    async fn top_submissions(&self, community: &str, limit: usize) -> Result<Vec<Submission>> {
        let token = self.access_token().await?;
        let url = format!("{}/r/{}/hot", API_BASE, community);
        let limit = limit.clamp(1, MAX_LISTING_LIMIT).to_string();

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(&[("limit", limit.as_str()), ("raw_json", "1")])
            .send()
            .await
            .map_err(|e| SourceError::Network(format!("r/{}: {}", community, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, &format!("r/{}", community)).into());
        }

        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Network(format!("r/{}: {}", community, e)))?;

        parse_listing(&body)
    }

    fn name(&self) -> &str {
        "reddit"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReposterError;

    const LISTING: &str = r#"{
        "kind": "Listing",
        "data": {
            "after": "t3_ccc",
            "children": [
                {"kind": "t3", "data": {
                    "id": "aaa", "title": "Cat", "author": "alice", "subreddit": "aww",
                    "url": "https://i.redd.it/cat.jpg", "is_video": false,
                    "selftext": "", "ups": 120, "stickied": false
                }},
                {"kind": "t3", "data": {
                    "id": "bbb", "title": "Story time", "author": "bob", "subreddit": "aww",
                    "url": "https://www.reddit.com/r/aww/comments/bbb/", "is_video": false,
                    "selftext": "Once upon a time", "ups": 80
                }},
                {"kind": "t3", "data": {
                    "id": "ccc", "title": "Dog video", "author": "carol", "subreddit": "aww",
                    "url": "https://v.redd.it/xyz", "is_video": true, "selftext": "", "ups": 300
                }}
            ]
        }
    }"#;

    #[test]
    fn test_parse_listing_preserves_order_and_fields() {
        let submissions = parse_listing(LISTING).unwrap();
        let ids: Vec<&str> = submissions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["aaa", "bbb", "ccc"]);

        let cat = &submissions[0];
        assert_eq!(cat.community, "aww");
        assert_eq!(cat.author, "alice");
        assert_eq!(cat.score, 120);
        assert_eq!(cat.selftext, None);
        assert!(cat.is_publishable());

        assert!(submissions[1].has_self_text());
        assert!(submissions[2].is_video);
    }

    #[test]
    fn test_parse_listing_tolerates_missing_fields() {
        let body = r#"{"data": {"children": [{"data": {"id": "x"}}]}}"#;
        let submissions = parse_listing(body).unwrap();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].url, None);
        assert!(!submissions[0].is_publishable());
    }

    #[test]
    fn test_parse_listing_rejects_garbage() {
        let result = parse_listing("<html>oops</html>");
        assert!(matches!(
            result,
            Err(ReposterError::Source(SourceError::InvalidResponse(_)))
        ));
    }

    #[test]
    fn test_status_error_mapping() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, "r/aww"),
            SourceError::Authentication(_)
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, "r/aww"),
            SourceError::NotFound(name) if name == "r/aww"
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, "r/aww"),
            SourceError::RateLimit(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, "r/aww"),
            SourceError::Network(_)
        ));
    }

    #[test]
    fn test_access_token_freshness() {
        let stale = AccessToken {
            value: "t".to_string(),
            expires_at: Instant::now() + Duration::from_secs(30),
        };
        let fresh = AccessToken {
            value: "t".to_string(),
            expires_at: Instant::now() + Duration::from_secs(3600),
        };
        assert!(!stale.is_fresh());
        assert!(fresh.is_fresh());
    }

    #[test]
    fn test_huge_token_lifetime_is_capped() {
        let token = AccessToken::new("t".to_string(), u64::MAX);

        assert!(token.is_fresh());
        assert!(token.expires_at <= Instant::now() + MAX_TOKEN_LIFETIME);
    }
}
