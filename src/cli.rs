//! Command-line arguments and how they layer over the config file.

use clap::Parser;
use collector_core::{AppConfig, ConfigError};
use std::path::PathBuf;

/// Collects per-subreddit post statistics and appends them to TSV history files.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subreddits to collect, without the leading r/
    pub subreddits: Vec<String>,

    /// TOML config file; command-line flags take precedence over it
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Reddit app client id
    #[arg(long, env = "REDDIT_CLIENT_ID", hide_env_values = true)]
    pub id: Option<String>,

    /// Reddit app client secret
    #[arg(long, env = "REDDIT_CLIENT_SECRET", hide_env_values = true)]
    pub secret: Option<String>,

    /// Reddit username
    #[arg(long, env = "REDDIT_USERNAME")]
    pub user: Option<String>,

    /// Reddit password
    #[arg(long, env = "REDDIT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Only count posts at most this many seconds old (use --no-max-age for no limit)
    #[arg(
        long,
        value_name = "SECONDS",
        conflicts_with = "no_max_age",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub max_age: Option<u64>,

    /// Count every post in the listing
    #[arg(long, default_value_t = false)]
    pub no_max_age: bool,

    /// Skip fetching comment trees; the comment stats are then zero
    #[arg(long, default_value_t = false)]
    pub no_comments: bool,

    /// Directory the stat files are appended to
    #[arg(short, long, value_name = "DIR")]
    pub out_dir: Option<PathBuf>,

    /// Where the access token is cached between runs
    #[arg(long, value_name = "FILE")]
    pub token_cache: Option<PathBuf>,

    /// Number of subreddits collected at once
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Cancel the run after this many seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Also write the whole report as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

impl Cli {
    /// Loads the config file, if any, and applies the flags over it.
    pub fn into_config(self) -> Result<AppConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load(path)?,
            None => AppConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(self, config: &mut AppConfig) {
        if !self.subreddits.is_empty() {
            config.subreddits = self
                .subreddits
                .into_iter()
                .map(|name| name.trim_start_matches("r/").to_string())
                .collect();
        }

        let reddit = &mut config.reddit;
        reddit.client_id = self.id.or(reddit.client_id.take());
        reddit.client_secret = self.secret.or(reddit.client_secret.take());
        reddit.username = self.user.or(reddit.username.take());
        reddit.password = self.password.or(reddit.password.take());

        if self.no_max_age {
            config.max_age_seconds = None;
        } else if let Some(seconds) = self.max_age {
            config.max_age_seconds = Some(seconds);
        }
        if self.no_comments {
            config.collect_comments = false;
        }
        if let Some(out_dir) = self.out_dir {
            config.out_dir = out_dir;
        }
        if let Some(token_cache) = self.token_cache {
            config.token_cache = token_cache;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(timeout) = self.timeout {
            config.run_timeout_seconds = Some(timeout);
        }
    }
}
