//! The seam between the collection pipeline and whatever serves listings.

use crate::error::CoreError;
use crate::types::{CommentTally, Post};
use std::future::Future;

/// One page of a subreddit listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingPage {
    /// Posts in the order the API returned them, newest first.
    pub posts: Vec<Post>,
    /// Cursor for the next page; `None` at the end of the listing.
    pub after: Option<String>,
}

impl ListingPage {
    pub fn new(posts: Vec<Post>, after: Option<String>) -> Self {
        Self { posts, after }
    }

    /// True if no further page should be requested after this one.
    pub fn is_last(&self) -> bool {
        self.after.is_none() || self.posts.is_empty()
    }
}

/// Serves listing pages and comment trees for subreddits.
///
/// Implementations must surface rate limiting, authentication failures and
/// unparseable pages as distinguishable errors rather than empty pages.
pub trait ListingSource: Send + Sync {
    /// Fetches the page of `subreddit` that follows `after`, or the first
    /// page when `after` is `None`.
    fn fetch_page(
        &self,
        subreddit: &str,
        after: Option<&str>,
    ) -> impl Future<Output = Result<ListingPage, CoreError>> + Send;

    /// Tallies every comment under post `post_id`, replies included.
    fn fetch_comments(
        &self,
        subreddit: &str,
        post_id: &str,
    ) -> impl Future<Output = Result<CommentTally, CoreError>> + Send;
}

impl<S: ListingSource> ListingSource for &S {
    fn fetch_page(
        &self,
        subreddit: &str,
        after: Option<&str>,
    ) -> impl Future<Output = Result<ListingPage, CoreError>> + Send {
        (**self).fetch_page(subreddit, after)
    }

    fn fetch_comments(
        &self,
        subreddit: &str,
        post_id: &str,
    ) -> impl Future<Output = Result<CommentTally, CoreError>> + Send {
        (**self).fetch_comments(subreddit, post_id)
    }
}
