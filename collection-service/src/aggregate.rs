use collector_core::{age_seconds, CommentTally, CoreError, DateTime, Post, SubredditStats, Utc};
use futures::{future, TryStream, TryStreamExt};

/// Running totals for one subreddit, folded over its posts in listing
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsAccumulator {
    now: DateTime<Utc>,
    num_posts: u64,
    num_comments: u64,
    num_crossposts: u64,
    num_ups: i64,
    num_awards: u64,
    num_comment_ups: i64,
    num_comment_awards: u64,
    num_selftexts: u64,
    num_urls: u64,
    age_sum: i64,
}

impl StatsAccumulator {
    /// An empty accumulator measuring ages against `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            num_posts: 0,
            num_comments: 0,
            num_crossposts: 0,
            num_ups: 0,
            num_awards: 0,
            num_comment_ups: 0,
            num_comment_awards: 0,
            num_selftexts: 0,
            num_urls: 0,
            age_sum: 0,
        }
    }

    pub fn add(mut self, post: &Post) -> Self {
        self.num_posts += 1;
        self.num_comments += post.num_comments;
        self.num_crossposts += post.num_crossposts;
        self.num_ups += post.ups;
        self.num_awards += post.total_awards_received;
        self.num_urls += 1;
        if post.is_selftext {
            self.num_selftexts += 1;
        }
        self.age_sum += age_seconds(post.created_at, self.now);
        self
    }

    /// Folds in the comment tree of a post already added.
    pub fn add_comments(mut self, comments: &CommentTally) -> Self {
        self.num_comment_ups += comments.ups;
        self.num_comment_awards += comments.awards;
        self
    }

    pub fn num_posts(&self) -> u64 {
        self.num_posts
    }

    pub fn finish(self, subreddit: impl Into<String>) -> SubredditStats {
        let avg_age_seconds = if self.num_posts == 0 {
            0.0
        } else {
            self.age_sum as f64 / self.num_posts as f64
        };

        SubredditStats {
            subreddit: subreddit.into(),
            num_posts: self.num_posts,
            num_comments: self.num_comments,
            num_crossposts: self.num_crossposts,
            num_ups: self.num_ups,
            num_awards: self.num_awards,
            num_comment_ups: self.num_comment_ups,
            num_comment_awards: self.num_comment_awards,
            num_selftexts: self.num_selftexts,
            num_urls: self.num_urls,
            avg_age_seconds,
        }
    }
}

/// Folds already-fetched posts into statistics.
pub fn aggregate<'a>(
    subreddit: &str,
    posts: impl IntoIterator<Item = &'a Post>,
    now: DateTime<Utc>,
) -> SubredditStats {
    posts
        .into_iter()
        .fold(StatsAccumulator::new(now), StatsAccumulator::add)
        .finish(subreddit)
}

/// Folds a fallible post stream into statistics, stopping at the first
/// error.
pub async fn try_aggregate<St>(
    subreddit: &str,
    posts: St,
    now: DateTime<Utc>,
) -> Result<SubredditStats, CoreError>
where
    St: TryStream<Ok = Post, Error = CoreError>,
{
    let accumulator = posts
        .try_fold(StatsAccumulator::new(now), |acc, post| {
            future::ready(Ok(acc.add(&post)))
        })
        .await?;
    Ok(accumulator.finish(subreddit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use collector_core::RedditApiError;
    use futures::stream;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn post(id: &str, age: i64, num_comments: u64, is_selftext: bool) -> Post {
        Post {
            id: id.to_string(),
            created_at: DateTime::from_timestamp(now().timestamp() - age, 0).unwrap(),
            num_comments,
            num_crossposts: 1,
            ups: 10,
            url: format!("https://example.com/{id}"),
            is_selftext,
            total_awards_received: 2,
        }
    }

    #[test]
    fn test_empty_input_has_zero_average() {
        let stats = aggregate("rust", &[], now());
        assert_eq!(stats, SubredditStats::empty("rust"));
        assert_eq!(stats.avg_age_seconds, 0.0);
    }

    #[test]
    fn test_sums_are_order_independent() {
        let forward = [post("a", 10, 3, false), post("b", 20, 5, true)];
        let backward = [post("b", 20, 5, true), post("a", 10, 3, false)];

        let a = aggregate("rust", &forward, now());
        let b = aggregate("rust", &backward, now());
        assert_eq!(a.num_comments, 8);
        assert_eq!(a, b);
    }

    #[test]
    fn test_every_counter() {
        let posts = [post("a", 10, 1, false), post("b", 20, 2, true)];
        let stats = aggregate("rust", &posts, now());

        assert_eq!(stats.subreddit, "rust");
        assert_eq!(stats.num_posts, 2);
        assert_eq!(stats.num_comments, 3);
        assert_eq!(stats.num_crossposts, 2);
        assert_eq!(stats.num_ups, 20);
        assert_eq!(stats.num_awards, 4);
        assert_eq!(stats.num_selftexts, 1);
        assert_eq!(stats.num_urls, 2);
        assert_eq!(stats.avg_age_seconds, 15.0);
    }

    #[test]
    fn test_comment_tallies_are_summed() {
        let post = post("a", 10, 4, false);
        let stats = StatsAccumulator::new(now())
            .add(&post)
            .add_comments(&CommentTally {
                comments: 4,
                ups: 9,
                awards: 1,
            })
            .add_comments(&CommentTally {
                comments: 1,
                ups: -2,
                awards: 0,
            })
            .finish("rust");

        assert_eq!(stats.num_comment_ups, 7);
        assert_eq!(stats.num_comment_awards, 1);
        assert_eq!(stats.num_comments, 4);
    }

    #[test]
    fn test_stream_fold_matches_iterator_fold() {
        let posts = vec![post("a", 10, 1, false), post("b", 30, 2, true)];
        let expected = aggregate("rust", &posts, now());

        let stream = stream::iter(posts.into_iter().map(Ok::<_, CoreError>));
        let actual = tokio_test::block_on(try_aggregate("rust", stream, now())).unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_stream_fold_fails_on_first_error() {
        let items: Vec<Result<Post, CoreError>> = vec![
            Ok(post("a", 10, 1, false)),
            Err(RedditApiError::RateLimitExceeded { retry_after: 1 }.into()),
            Ok(post("b", 20, 2, false)),
        ];
        let result = tokio_test::block_on(try_aggregate("rust", stream::iter(items), now()));
        assert!(result.is_err());
    }
}
