use crate::error::*;
use std::time::Duration;
use tracing::{debug, error, warn, Level};

/// Logging and retry classification shared by every crate in the workspace.
pub trait ErrorExt {
    fn log_error(&self) -> &Self;
    fn log_warn(&self) -> &Self;
    /// Whether repeating the same request may succeed.
    fn is_retryable(&self) -> bool;
    /// Delay the server asked for before the next attempt, if any.
    fn retry_after(&self) -> Option<Duration>;
    fn error_code(&self) -> &'static str;
}

impl ErrorExt for CoreError {
    fn log_error(&self) -> &Self {
        error!(code = self.error_code(), "{}", self);
        if let CoreError::RedditApi(e) = self {
            debug!("Reddit API error details: {:?}", e);
        }
        self
    }

    fn log_warn(&self) -> &Self {
        warn!(code = self.error_code(), "{}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            CoreError::RedditApi(e) => e.is_retryable(),
            CoreError::Network(e) => !(e.is_builder() || e.is_redirect()),
            CoreError::Timeout { .. } => true,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CoreError::RedditApi(e) => e.retry_after(),
            _ => None,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            CoreError::RedditApi(e) => e.error_code(),
            CoreError::Config(_) => "CONFIG",
            CoreError::Io(_) => "IO",
            CoreError::Serialization(_) => "SERIALIZATION",
            CoreError::Network(_) => "NETWORK",
            CoreError::InvalidInput { .. } => "INVALID_INPUT",
            CoreError::Timeout { .. } => "TIMEOUT",
            CoreError::Internal { .. } => "INTERNAL",
        }
    }
}

impl ErrorExt for RedditApiError {
    fn log_error(&self) -> &Self {
        error!(code = self.error_code(), "{}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!(code = self.error_code(), "{}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        // A page that failed to parse will fail the same way again.
        matches!(
            self,
            RedditApiError::RateLimitExceeded { .. }
                | RedditApiError::RequestTimeout
                | RedditApiError::ServerError { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            RedditApiError::RateLimitExceeded { retry_after } => {
                Some(Duration::from_secs(*retry_after))
            }
            _ => None,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            RedditApiError::AuthenticationFailed { .. } => "REDDIT_AUTH_FAILED",
            RedditApiError::RateLimitExceeded { .. } => "REDDIT_RATE_LIMIT",
            RedditApiError::Forbidden { .. } => "REDDIT_FORBIDDEN",
            RedditApiError::SubredditNotFound { .. } => "REDDIT_SUBREDDIT_NOT_FOUND",
            RedditApiError::InvalidToken => "REDDIT_INVALID_TOKEN",
            RedditApiError::RequestTimeout => "REDDIT_TIMEOUT",
            RedditApiError::InvalidResponse { .. } => "REDDIT_INVALID_RESPONSE",
            RedditApiError::ServerError { .. } => "REDDIT_SERVER_ERROR",
        }
    }
}

/// Logs pipeline errors once they have settled a subreddit's outcome.
///
/// Session failures are logged as errors; anything a later run could get
/// past (rate limits, network trouble, missing subreddits) as warnings.
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    verbose: bool,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self { verbose: false }
    }

    /// Also log the error's debug representation.
    pub fn verbose(mut self, enabled: bool) -> Self {
        self.verbose = enabled;
        self
    }

    /// The level a settled failure of this kind is logged at.
    pub fn level(error: &CoreError) -> Level {
        match error.failure_kind() {
            FailureKind::AuthFailure | FailureKind::Other => Level::ERROR,
            _ => Level::WARN,
        }
    }

    pub fn report_error(&self, error: &CoreError) {
        if Self::level(error) == Level::ERROR {
            error.log_error();
        } else {
            warn!(kind = %error.failure_kind(), code = error.error_code(), "{}", error);
        }
        if self.verbose {
            debug!("{:?}", error);
        }
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new()
    }
}
