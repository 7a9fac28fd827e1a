//! Configuration management for Reposter
//!
//! Configuration is read once at startup from a TOML file. Credentials may be
//! supplied through the environment instead of the file; the environment wins.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::state::OverflowPolicy;

/// Environment variables that override credentials from the config file.
pub const ENV_IG_USERNAME: &str = "IG_USERNAME";
pub const ENV_IG_PASSWORD: &str = "IG_PASSWORD";
pub const ENV_RD_USER_AGENT: &str = "RD_USER_AGENT";
pub const ENV_RD_CLIENT_ID: &str = "RD_CLIENT_ID";
pub const ENV_RD_CLIENT_SECRET: &str = "RD_CLIENT_SECRET";
pub const ENV_RD_REFRESH_TOKEN: &str = "RD_REFRESH_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub reddit: RedditConfig,
    pub instagram: InstagramConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    pub follow: Option<FollowConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditConfig {
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub refresh_token: String,
    pub subreddits: Vec<String>,
    #[serde(default = "default_posts_per_subreddit")]
    pub posts_per_subreddit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstagramConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Hashtags appended to every caption, without the leading '#'.
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(with = "humantime_serde", default = "default_fetch_interval")]
    pub fetch_interval: Duration,
    #[serde(with = "humantime_serde", default = "default_upload_interval")]
    pub upload_interval: Duration,
    #[serde(default = "default_posts_per_upload")]
    pub posts_per_upload: usize,
    #[serde(with = "humantime_serde", default = "default_cache_clear_interval")]
    pub cache_clear_interval: Duration,
    /// Maximum queued submissions; `None` leaves the queue unbounded.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: Option<usize>,
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            fetch_interval: default_fetch_interval(),
            upload_interval: default_upload_interval(),
            posts_per_upload: default_posts_per_upload(),
            cache_clear_interval: default_cache_clear_interval(),
            queue_capacity: default_queue_capacity(),
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowConfig {
    /// Tag whose posters are followed, without the leading '#'.
    pub tag: String,
    #[serde(default)]
    pub likes_per_user: usize,
    #[serde(default = "default_max_concurrent_likers")]
    pub max_concurrent_likers: usize,
    #[serde(default = "default_liker_backlog")]
    pub liker_backlog: usize,
    #[serde(with = "humantime_serde", default = "default_follow_delay")]
    pub follow_delay: Duration,
    #[serde(with = "humantime_serde", default = "default_cooldown")]
    pub cooldown: Duration,
}

impl FollowConfig {
    pub fn new(tag: impl Into<String>, likes_per_user: usize) -> Self {
        Self {
            tag: tag.into(),
            likes_per_user,
            max_concurrent_likers: default_max_concurrent_likers(),
            liker_backlog: default_liker_backlog(),
            follow_delay: default_follow_delay(),
            cooldown: default_cooldown(),
        }
    }
}

fn default_posts_per_subreddit() -> usize {
    5
}

fn default_fetch_interval() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_upload_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_posts_per_upload() -> usize {
    3
}

fn default_cache_clear_interval() -> Duration {
    Duration::from_secs(2 * 24 * 60 * 60)
}

fn default_queue_capacity() -> Option<usize> {
    Some(1000)
}

fn default_max_concurrent_likers() -> usize {
    4
}

fn default_liker_backlog() -> usize {
    64
}

fn default_follow_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_cooldown() -> Duration {
    Duration::from_secs(10 * 60)
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path, apply environment overrides
    /// and validate the result.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Replace credentials with values found through `lookup`.
    ///
    /// Empty values are ignored so an exported-but-blank variable does not
    /// wipe out the file's value.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let overrides: [(&str, &mut String); 6] = [
            (ENV_IG_USERNAME, &mut self.instagram.username),
            (ENV_IG_PASSWORD, &mut self.instagram.password),
            (ENV_RD_USER_AGENT, &mut self.reddit.user_agent),
            (ENV_RD_CLIENT_ID, &mut self.reddit.client_id),
            (ENV_RD_CLIENT_SECRET, &mut self.reddit.client_secret),
            (ENV_RD_REFRESH_TOKEN, &mut self.reddit.refresh_token),
        ];

        for (key, slot) in overrides {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *slot = value;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("reddit.user_agent", &self.reddit.user_agent),
            ("reddit.client_id", &self.reddit.client_id),
            ("reddit.client_secret", &self.reddit.client_secret),
            ("reddit.refresh_token", &self.reddit.refresh_token),
            ("instagram.username", &self.instagram.username),
            ("instagram.password", &self.instagram.password),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(field.to_string()).into());
            }
        }

        if self.reddit.subreddits.iter().all(|s| s.trim().is_empty()) {
            return Err(invalid("reddit.subreddits", "at least one subreddit is required"));
        }
        if self.reddit.posts_per_subreddit == 0 {
            return Err(invalid("reddit.posts_per_subreddit", "must be greater than zero"));
        }

        let schedule = &self.schedule;
        if schedule.posts_per_upload == 0 {
            return Err(invalid("schedule.posts_per_upload", "must be greater than zero"));
        }
        for (field, interval) in [
            ("schedule.fetch_interval", schedule.fetch_interval),
            ("schedule.upload_interval", schedule.upload_interval),
            ("schedule.cache_clear_interval", schedule.cache_clear_interval),
        ] {
            if interval.is_zero() {
                return Err(invalid(field, "must be a non-zero duration"));
            }
            if interval > MAX_INTERVAL {
                return Err(invalid(field, "must be at most 365 days"));
            }
        }
        if schedule.queue_capacity == Some(0) {
            return Err(invalid("schedule.queue_capacity", "must be greater than zero"));
        }

        if let Some(follow) = &self.follow {
            if follow.tag.trim().trim_start_matches('#').is_empty() {
                return Err(invalid("follow.tag", "must not be empty"));
            }
            if follow.max_concurrent_likers == 0 {
                return Err(invalid("follow.max_concurrent_likers", "must be greater than zero"));
            }
            if follow.liker_backlog == 0 {
                return Err(invalid("follow.liker_backlog", "must be greater than zero"));
            }
        }

        Ok(())
    }

    /// Subreddit names with any `r/` prefix and surrounding whitespace removed.
    pub fn subreddits(&self) -> Vec<String> {
        self.reddit
            .subreddits
            .iter()
            .map(|s| s.trim().trim_start_matches("r/").to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Caption hashtags, each prefixed with '#'.
    pub fn hashtags(&self) -> Vec<String> {
        self.instagram
            .tags
            .iter()
            .map(|t| t.trim().trim_start_matches('#'))
            .filter(|t| !t.is_empty())
            .map(|t| format!("#{}", t))
            .collect()
    }
}

/// Longest schedule interval accepted.
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

fn invalid(field: &str, reason: &str) -> crate::error::ReposterError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Resolve the configuration file path: `REPOSTER_CONFIG`, else the user config directory
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("REPOSTER_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("reposter").join("config.toml"))
}

/// Serde adapter for humantime duration strings such as "30m" or "2d".
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}
