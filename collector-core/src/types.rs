use crate::error::FailureKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One entry of a subreddit listing, reduced to the fields the
/// statistics need.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub num_comments: u64,
    pub num_crossposts: u64,
    pub ups: i64,
    pub url: String,
    pub is_selftext: bool,
    pub total_awards_received: u64,
}

/// Sums over the comment tree of one post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CommentTally {
    pub comments: u64,
    pub ups: i64,
    pub awards: u64,
}

impl CommentTally {
    pub fn add(&mut self, ups: i64, awards: u64) {
        self.comments += 1;
        self.ups += ups;
        self.awards += awards;
    }
}

/// Aggregated statistics for one subreddit in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubredditStats {
    pub subreddit: String,
    pub num_posts: u64,
    pub num_comments: u64,
    pub num_crossposts: u64,
    pub num_ups: i64,
    pub num_awards: u64,
    /// Sum of `ups` over the comment trees of the counted posts.
    pub num_comment_ups: i64,
    pub num_comment_awards: u64,
    pub num_selftexts: u64,
    pub num_urls: u64,
    /// Mean post age at fetch time. `0.0` when no post qualified.
    pub avg_age_seconds: f64,
}

impl SubredditStats {
    /// Statistics for a subreddit with no qualifying posts.
    pub fn empty(subreddit: impl Into<String>) -> Self {
        Self {
            subreddit: subreddit.into(),
            num_posts: 0,
            num_comments: 0,
            num_crossposts: 0,
            num_ups: 0,
            num_awards: 0,
            num_comment_ups: 0,
            num_comment_awards: 0,
            num_selftexts: 0,
            num_urls: 0,
            avg_age_seconds: 0.0,
        }
    }

    /// Names of the exported statistics, in the order they are written.
    pub const STAT_NAMES: [&'static str; 10] = [
        "avg_age_seconds",
        "num_awards",
        "num_comment_awards",
        "num_comment_ups",
        "num_comments",
        "num_crossposts",
        "num_posts",
        "num_selftexts",
        "num_ups",
        "num_urls",
    ];

    /// The value of a statistic by name, rendered for tabular output.
    pub fn value_of(&self, stat: &str) -> Option<String> {
        let value = match stat {
            "avg_age_seconds" => self.avg_age_seconds.to_string(),
            "num_awards" => self.num_awards.to_string(),
            "num_comment_awards" => self.num_comment_awards.to_string(),
            "num_comment_ups" => self.num_comment_ups.to_string(),
            "num_comments" => self.num_comments.to_string(),
            "num_crossposts" => self.num_crossposts.to_string(),
            "num_posts" => self.num_posts.to_string(),
            "num_selftexts" => self.num_selftexts.to_string(),
            "num_ups" => self.num_ups.to_string(),
            "num_urls" => self.num_urls.to_string(),
            _ => return None,
        };
        Some(value)
    }
}

/// A subreddit that produced no statistics, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubredditFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Posts consumed before the failure. They are not part of any stats.
    pub posts_seen: u64,
}

/// The result of one collection run.
///
/// Every requested subreddit ends up in exactly one of `stats` or
/// `failures`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub requested: Vec<String>,
    pub stats: BTreeMap<String, SubredditStats>,
    pub failures: BTreeMap<String, SubredditFailure>,
    pub aborted: bool,
}

impl Report {
    pub fn new(requested: Vec<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: None,
            requested,
            stats: BTreeMap::new(),
            failures: BTreeMap::new(),
            aborted: false,
        }
    }

    pub fn record_success(&mut self, stats: SubredditStats) {
        self.failures.remove(&stats.subreddit);
        self.stats.insert(stats.subreddit.clone(), stats);
    }

    pub fn record_failure(&mut self, subreddit: impl Into<String>, failure: SubredditFailure) {
        let subreddit = subreddit.into();
        if !self.stats.contains_key(&subreddit) {
            self.failures.insert(subreddit, failure);
        }
    }

    /// True once the subreddit has either stats or a failure entry.
    pub fn is_settled(&self, subreddit: &str) -> bool {
        self.stats.contains_key(subreddit) || self.failures.contains_key(subreddit)
    }

    /// Requested subreddits that have neither stats nor a failure yet.
    pub fn unsettled(&self) -> Vec<String> {
        self.requested
            .iter()
            .filter(|name| !self.is_settled(name))
            .cloned()
            .collect()
    }

    /// Records every unsettled subreddit as failed with `kind` and seals
    /// the report.
    pub fn finish(&mut self, finished_at: DateTime<Utc>, unsettled_kind: FailureKind) {
        for subreddit in self.unsettled() {
            self.failures.insert(
                subreddit,
                SubredditFailure {
                    kind: unsettled_kind,
                    message: format!("not collected ({unsettled_kind})"),
                    posts_seen: 0,
                },
            );
        }
        self.finished_at = Some(finished_at);
    }

    /// True when every requested subreddit produced statistics.
    pub fn is_complete(&self) -> bool {
        !self.aborted && self.failures.is_empty()
    }
}
