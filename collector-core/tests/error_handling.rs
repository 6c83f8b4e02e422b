use collector_core::{
    ConfigError, CoreError, ErrorExt, ErrorReporter, FailureKind, RedditApiError,
};
use std::time::Duration;
use tracing::Level;

#[test]
fn test_error_codes() {
    let reddit_error = CoreError::RedditApi(RedditApiError::InvalidToken);
    assert_eq!(reddit_error.error_code(), "REDDIT_INVALID_TOKEN");

    let config_error = CoreError::Config(ConfigError::MissingField {
        field: "reddit.client_id".to_string(),
    });
    assert_eq!(config_error.error_code(), "CONFIG");

    let timeout_error = CoreError::Timeout { seconds: 30 };
    assert_eq!(timeout_error.error_code(), "TIMEOUT");
}

#[test]
fn test_retryable_errors() {
    let retryable_error =
        CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after: 60 });
    assert!(retryable_error.is_retryable());

    let server_error = CoreError::RedditApi(RedditApiError::ServerError { status_code: 502 });
    assert!(server_error.is_retryable());

    let auth_error = CoreError::RedditApi(RedditApiError::InvalidToken);
    assert!(!auth_error.is_retryable());

    let malformed = CoreError::RedditApi(RedditApiError::InvalidResponse {
        details: "missing field `created_utc`".to_string(),
    });
    assert!(!malformed.is_retryable());

    let non_retryable_error = CoreError::Config(ConfigError::MissingField {
        field: "subreddits".to_string(),
    });
    assert!(!non_retryable_error.is_retryable());
}

#[test]
fn test_retry_after_only_for_rate_limits() {
    let rate_limit_error =
        CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after: 60 });
    assert_eq!(
        rate_limit_error.retry_after(),
        Some(Duration::from_secs(60))
    );

    let timeout_error = CoreError::Timeout { seconds: 30 };
    assert!(timeout_error.is_retryable());
    assert_eq!(timeout_error.retry_after(), None);

    let auth_error = CoreError::RedditApi(RedditApiError::InvalidToken);
    assert_eq!(auth_error.retry_after(), None);
}

#[test]
fn test_reddit_error_codes_pass_through() {
    let error = CoreError::RedditApi(RedditApiError::SubredditNotFound {
        subreddit: "gone".to_string(),
    });
    assert_eq!(error.error_code(), "REDDIT_SUBREDDIT_NOT_FOUND");
}

#[test]
fn test_failure_kinds_for_listing_errors() {
    let cases = [
        (
            CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after: 1 }),
            FailureKind::RateLimited,
        ),
        (
            CoreError::RedditApi(RedditApiError::RequestTimeout),
            FailureKind::TransientNetwork,
        ),
        (
            CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                reason: "invalid_grant".to_string(),
            }),
            FailureKind::AuthFailure,
        ),
        (
            CoreError::Internal {
                message: "boom".to_string(),
            },
            FailureKind::Other,
        ),
    ];

    for (error, expected) in cases {
        assert_eq!(error.failure_kind(), expected, "{error}");
    }
}

#[test]
fn test_error_reporter() {
    let reporter = ErrorReporter::new().verbose(true);

    // Only checks that reporting every kind of failure is safe.
    reporter.report_error(&CoreError::RedditApi(RedditApiError::InvalidToken));
    reporter.report_error(&CoreError::RedditApi(RedditApiError::ServerError {
        status_code: 503,
    }));
    reporter.report_error(&CoreError::Internal {
        message: "boom".to_string(),
    });
}

#[test]
fn test_reporter_levels() {
    let error_level: [CoreError; 2] = [
        RedditApiError::AuthenticationFailed {
            reason: "invalid_grant".to_string(),
        }
        .into(),
        CoreError::Internal {
            message: "boom".to_string(),
        },
    ];
    for error in &error_level {
        assert_eq!(ErrorReporter::level(error), Level::ERROR, "{error}");
    }

    let warn_level: [CoreError; 4] = [
        RedditApiError::RateLimitExceeded { retry_after: 5 }.into(),
        RedditApiError::ServerError { status_code: 503 }.into(),
        RedditApiError::SubredditNotFound {
            subreddit: "gone".to_string(),
        }
        .into(),
        RedditApiError::InvalidResponse {
            details: "missing ups".to_string(),
        }
        .into(),
    ];
    for error in &warn_level {
        assert_eq!(ErrorReporter::level(error), Level::WARN, "{error}");
    }
}
