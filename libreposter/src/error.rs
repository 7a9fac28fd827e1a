//! Error types for Reposter

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReposterError>;

#[derive(Error, Debug)]
pub enum ReposterError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Content source error: {0}")]
    Source(#[from] SourceError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Image error: {0}")]
    Image(#[from] ImageError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReposterError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ReposterError::InvalidInput(_) => 3,
            ReposterError::Platform(PlatformError::Authentication(_))
            | ReposterError::Platform(PlatformError::ChallengeRequired(_))
            | ReposterError::Source(SourceError::Authentication(_)) => 2,
            ReposterError::Platform(_) => 1,
            ReposterError::Source(_) => 1,
            ReposterError::Image(_) => 1,
            ReposterError::Config(_) => 1,
            ReposterError::Io(_) => 1,
        }
    }

    /// Whether the next scheduled cycle has a reasonable chance of succeeding
    /// where this one failed.
    pub fn is_transient(&self) -> bool {
        match self {
            ReposterError::Source(e) => matches!(
                e,
                SourceError::Network(_) | SourceError::RateLimit(_)
            ),
            ReposterError::Platform(e) => matches!(
                e,
                PlatformError::Network(_) | PlatformError::RateLimit(_)
            ),
            ReposterError::Image(ImageError::Download(_)) => true,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug, Clone)]
pub enum SourceError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Community not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Additional verification required: {0}")]
    ChallengeRequired(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Error, Debug, Clone)]
pub enum ImageError {
    #[error("Failed to download media: {0}")]
    Download(String),

    #[error("Failed to decode media: {0}")]
    Decode(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),
}
