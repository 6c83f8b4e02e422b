use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Reddit API error: {0}")]
    RedditApi(#[from] RedditApiError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Operation timeout after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RedditApiError {
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    #[error("Rate limit exceeded. Retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    #[error("Forbidden access to resource: {resource}")]
    Forbidden { resource: String },

    #[error("Subreddit not found: {subreddit}")]
    SubredditNotFound { subreddit: String },

    #[error("Invalid OAuth token")]
    InvalidToken,

    #[error("Request timeout")]
    RequestTimeout,

    #[error("Invalid API response: {details}")]
    InvalidResponse { details: String },

    #[error("Server error: {status_code}")]
    ServerError { status_code: u16 },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Configuration parsing error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Why a subreddit did not make it into a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The session was rejected by the API.
    AuthFailure,
    /// The API kept answering 429 after all retry attempts.
    RateLimited,
    /// Connection failures, timeouts and 5xx responses.
    TransientNetwork,
    /// A listing page could not be parsed into posts.
    MalformedResponse,
    /// The subreddit does not exist or is private.
    NotFound,
    /// The run was cancelled before the subreddit finished.
    Cancelled,
    /// The run was aborted before the subreddit was started.
    Skipped,
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::AuthFailure => "auth_failure",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::TransientNetwork => "transient_network",
            FailureKind::MalformedResponse => "malformed_response",
            FailureKind::NotFound => "not_found",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Skipped => "skipped",
            FailureKind::Other => "other",
        };
        f.write_str(name)
    }
}

impl CoreError {
    /// Classifies the error for the report's failure manifest.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            CoreError::RedditApi(e) => e.failure_kind(),
            CoreError::Network(_) | CoreError::Timeout { .. } => FailureKind::TransientNetwork,
            CoreError::Serialization(_) => FailureKind::MalformedResponse,
            _ => FailureKind::Other,
        }
    }

    /// True if the error means the session itself is unusable.
    pub fn is_auth_failure(&self) -> bool {
        self.failure_kind() == FailureKind::AuthFailure
    }
}

impl RedditApiError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            RedditApiError::AuthenticationFailed { .. } | RedditApiError::InvalidToken => {
                FailureKind::AuthFailure
            }
            RedditApiError::RateLimitExceeded { .. } => FailureKind::RateLimited,
            RedditApiError::RequestTimeout | RedditApiError::ServerError { .. } => {
                FailureKind::TransientNetwork
            }
            RedditApiError::InvalidResponse { .. } => FailureKind::MalformedResponse,
            // Private and quarantined subreddits answer 403 to valid tokens.
            RedditApiError::SubredditNotFound { .. } | RedditApiError::Forbidden { .. } => {
                FailureKind::NotFound
            }
        }
    }
}
