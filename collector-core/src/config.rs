//! Run configuration, loaded from an optional TOML file and overridden by
//! the command line.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default age threshold: one day.
pub const DEFAULT_MAX_AGE_SECONDS: u64 = 3600 * 24;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RedditCredentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Credentials with every field present.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
}

impl RedditCredentials {
    /// Resolves the credentials, failing on the first missing field.
    pub fn resolve(&self) -> Result<Credentials, ConfigError> {
        fn require(value: &Option<String>, field: &str) -> Result<String, ConfigError> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| ConfigError::MissingField {
                    field: field.to_string(),
                })
        }

        Ok(Credentials {
            client_id: require(&self.client_id, "reddit.client_id")?,
            client_secret: require(&self.client_secret, "reddit.client_secret")?,
            username: require(&self.username, "reddit.username")?,
            password: require(&self.password, "reddit.password")?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub requests_per_minute: u32,
    pub burst: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        // Reddit asks API clients to stay at or below one request per second.
        Self {
            requests_per_minute: 60,
            burst: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            max_delay_ms: 60000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub reddit: RedditCredentials,
    pub subreddits: Vec<String>,
    /// `None` or `0` disables the age filter.
    pub max_age_seconds: Option<u64>,
    pub out_dir: PathBuf,
    pub token_cache: PathBuf,
    pub concurrency: usize,
    pub run_timeout_seconds: Option<u64>,
    /// Fetch each commented post's comment tree for the comment stats.
    pub collect_comments: bool,
    pub rate_limit: RateLimitSettings,
    pub retry: RetrySettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            reddit: RedditCredentials::default(),
            subreddits: Vec::new(),
            max_age_seconds: Some(DEFAULT_MAX_AGE_SECONDS),
            out_dir: PathBuf::from("/tmp/reddit_collector"),
            token_cache: PathBuf::from("/tmp/reddit.token.json"),
            concurrency: 1,
            run_timeout_seconds: None,
            collect_comments: true,
            rate_limit: RateLimitSettings::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// The age threshold the pipeline should apply.
    pub fn max_age(&self) -> Option<u64> {
        self.max_age_seconds.filter(|seconds| *seconds > 0)
    }

    /// Checks the settings the collection run depends on. Credentials are
    /// checked separately by [`RedditCredentials::resolve`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.subreddits.is_empty() {
            return Err(ConfigError::MissingField {
                field: "subreddits".to_string(),
            });
        }
        for name in &self.subreddits {
            if !is_valid_subreddit_name(name) {
                return Err(ConfigError::InvalidValue {
                    field: "subreddits".to_string(),
                    value: name.clone(),
                });
            }
        }
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "concurrency".to_string(),
                value: "0".to_string(),
            });
        }
        if self.rate_limit.requests_per_minute == 0 || self.rate_limit.burst == 0 {
            return Err(ConfigError::ValidationFailed {
                reason: "rate_limit.requests_per_minute and rate_limit.burst must be positive"
                    .to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_attempts".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

/// Subreddit names are non-empty runs of ASCII letters, digits and
/// underscores. A leading `r/` is not accepted here; strip it first.
pub fn is_valid_subreddit_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_the_hourly_collector() {
        let config = AppConfig::default();
        assert_eq!(config.max_age_seconds, Some(86400));
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.rate_limit.requests_per_minute, 60);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_parse_toml() {
        let config = AppConfig::from_toml_str(
            r#"
            subreddits = ["rust", "programming"]
            max_age_seconds = 3600
            out_dir = "/var/lib/reddit_collector"
            concurrency = 2
            collect_comments = false

            [reddit]
            client_id = "abc"
            client_secret = "def"

            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.subreddits, vec!["rust", "programming"]);
        assert_eq!(config.max_age(), Some(3600));
        assert_eq!(config.out_dir, PathBuf::from("/var/lib/reddit_collector"));
        assert_eq!(config.concurrency, 2);
        assert!(!config.collect_comments);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 2000);
        assert_eq!(config.reddit.client_id.as_deref(), Some("abc"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_max_age_disables_the_filter() {
        let config = AppConfig::from_toml_str("max_age_seconds = 0").unwrap();
        assert_eq!(config.max_age(), None);
    }

    #[test]
    fn test_parse_error_is_reported() {
        let result = AppConfig::from_toml_str("subreddits = 12");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = AppConfig::load(Path::new("/nonexistent/reddit_collector.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collector.toml");
        std::fs::write(&path, "subreddits = [\"rust\"]\n").unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.subreddits, vec!["rust"]);
    }

    #[test]
    fn test_validation() {
        let mut config = AppConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField { .. })
        ));

        config.subreddits = vec!["rust".to_string(), "r/bad".to_string()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));

        config.subreddits = vec!["rust".to_string()];
        config.concurrency = 0;
        assert!(config.validate().is_err());

        config.concurrency = 4;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_credentials_resolution() {
        let mut credentials = RedditCredentials {
            client_id: Some("id".to_string()),
            client_secret: Some("secret".to_string()),
            username: Some("bot".to_string()),
            password: Some("  ".to_string()),
        };
        match credentials.resolve() {
            Err(ConfigError::MissingField { field }) => assert_eq!(field, "reddit.password"),
            other => panic!("Expected missing password, got {:?}", other),
        }

        credentials.password = Some("hunter2".to_string());
        let resolved = credentials.resolve().unwrap();
        assert_eq!(resolved.username, "bot");
    }
}
