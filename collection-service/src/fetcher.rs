use collector_core::{age_seconds, CoreError, DateTime, ListingSource, Post, Utc};
use futures::{stream, Stream};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

struct FetchState<S> {
    source: S,
    subreddit: String,
    max_age: Option<i64>,
    now: DateTime<Utc>,
    after: Option<String>,
    buffered: VecDeque<Post>,
    seen_ids: HashSet<String>,
    seen_cursors: HashSet<String>,
    exhausted: bool,
    pages: u32,
}

impl<S: ListingSource> FetchState<S> {
    /// Returns the next post to yield, fetching pages as needed. `None`
    /// ends the listing.
    async fn next_post(&mut self) -> Result<Option<Post>, CoreError> {
        loop {
            if let Some(post) = self.buffered.pop_front() {
                if !self.seen_ids.insert(post.id.clone()) {
                    debug!("Skipping duplicate post {} in r/{}", post.id, self.subreddit);
                    continue;
                }
                if let Some(max_age) = self.max_age {
                    let age = age_seconds(post.created_at, self.now);
                    if age > max_age {
                        debug!(
                            "Post {} in r/{} is {}s old, stopping after {} page(s)",
                            post.id, self.subreddit, age, self.pages
                        );
                        self.exhausted = true;
                        self.buffered.clear();
                        return Ok(None);
                    }
                }
                return Ok(Some(post));
            }

            if self.exhausted {
                return Ok(None);
            }

            let page = self
                .source
                .fetch_page(&self.subreddit, self.after.as_deref())
                .await?;
            self.pages += 1;

            if page.is_last() {
                self.exhausted = true;
            } else if let Some(cursor) = &page.after {
                if self.seen_cursors.insert(cursor.clone()) {
                    self.after = Some(cursor.clone());
                } else {
                    warn!(
                        "Listing for r/{} returned cursor {} twice, ending it",
                        self.subreddit, cursor
                    );
                    self.exhausted = true;
                }
            }
            self.buffered.extend(page.posts);
        }
    }
}

/// Lazily walks the `new` listing of `subreddit`, newest first.
///
/// Pages are requested only as the stream is polled. The stream ends at the
/// end of the listing, or at the first post older than `max_age` seconds
/// relative to `now`; no page past that post is requested. Posts already
/// yielded are skipped if a later page repeats them. After an error the
/// stream ends.
pub fn fetch<S: ListingSource>(
    source: S,
    subreddit: &str,
    max_age: Option<u64>,
    now: DateTime<Utc>,
) -> impl Stream<Item = Result<Post, CoreError>> {
    let state = FetchState {
        source,
        subreddit: subreddit.to_string(),
        max_age: max_age.map(|seconds| i64::try_from(seconds).unwrap_or(i64::MAX)),
        now,
        after: None,
        buffered: VecDeque::new(),
        seen_ids: HashSet::new(),
        seen_cursors: HashSet::new(),
        exhausted: false,
        pages: 0,
    };

    stream::try_unfold(state, |mut state| async move {
        Ok(state.next_post().await?.map(|post| (post, state)))
    })
}
