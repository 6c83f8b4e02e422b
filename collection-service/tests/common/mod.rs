#![allow(dead_code)]

use collector_core::{
    CommentTally, CoreError, DateTime, FrozenClock, ListingPage, ListingSource, Post, Utc,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

pub const NOW: i64 = 1_700_000_000;

pub fn clock() -> FrozenClock {
    FrozenClock::at_timestamp(NOW)
}

pub fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(NOW, 0).unwrap()
}

/// A post `age` seconds old at [`NOW`].
pub fn post(id: &str, age: i64) -> Post {
    Post {
        id: id.to_string(),
        created_at: DateTime::from_timestamp(NOW - age, 0).unwrap(),
        num_comments: 0,
        num_crossposts: 0,
        ups: 1,
        url: format!("https://example.com/{id}"),
        is_selftext: false,
        total_awards_received: 0,
    }
}

pub fn with_comments(mut post: Post, num_comments: u64) -> Post {
    post.num_comments = num_comments;
    post
}

pub fn selftext(mut post: Post) -> Post {
    post.is_selftext = true;
    post
}

pub fn page(posts: Vec<Post>, after: Option<&str>) -> Result<ListingPage, CoreError> {
    Ok(ListingPage::new(posts, after.map(str::to_string)))
}

pub fn tally(comments: u64, ups: i64, awards: u64) -> CommentTally {
    CommentTally {
        comments,
        ups,
        awards,
    }
}

/// Serves scripted pages per subreddit, in order, and records every request.
/// A subreddit with no script left serves an empty page, and a post with no
/// scripted comment tree has no comments.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<String, VecDeque<Result<ListingPage, CoreError>>>>,
    comment_trees: Mutex<HashMap<String, Result<CommentTally, CoreError>>>,
    stalled: HashSet<String>,
    requests: Mutex<Vec<(String, Option<String>)>>,
    comment_requests: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(
        self,
        subreddit: &str,
        pages: impl IntoIterator<Item = Result<ListingPage, CoreError>>,
    ) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(subreddit.to_string(), pages.into_iter().collect());
        self
    }

    /// The comment tree served for `post_id`, once.
    pub fn comments(self, post_id: &str, tree: Result<CommentTally, CoreError>) -> Self {
        self.comment_trees
            .lock()
            .unwrap()
            .insert(post_id.to_string(), tree);
        self
    }

    /// Post ids whose comment tree was requested, in order.
    pub fn comment_requests(&self) -> Vec<String> {
        self.comment_requests.lock().unwrap().clone()
    }

    /// Requests for `subreddit` never complete.
    pub fn stall(mut self, subreddit: &str) -> Self {
        self.stalled.insert(subreddit.to_string());
        self
    }

    pub fn requests(&self) -> Vec<(String, Option<String>)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, subreddit: &str) -> usize {
        self.requests()
            .iter()
            .filter(|(name, _)| name == subreddit)
            .count()
    }
}

impl ListingSource for ScriptedSource {
    async fn fetch_page(
        &self,
        subreddit: &str,
        after: Option<&str>,
    ) -> Result<ListingPage, CoreError> {
        self.requests
            .lock()
            .unwrap()
            .push((subreddit.to_string(), after.map(str::to_string)));

        if self.stalled.contains(subreddit) {
            std::future::pending::<()>().await;
        }

        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(subreddit)
            .and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| Ok(ListingPage::default()))
    }

    async fn fetch_comments(
        &self,
        _subreddit: &str,
        post_id: &str,
    ) -> Result<CommentTally, CoreError> {
        self.comment_requests
            .lock()
            .unwrap()
            .push(post_id.to_string());

        let tree = self.comment_trees.lock().unwrap().remove(post_id);
        tree.unwrap_or_else(|| Ok(CommentTally::default()))
    }
}
