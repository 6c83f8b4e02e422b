use crate::metrics::{ApiMetrics, MetricsCollector, RequestMetrics, RequestOutcome, SubredditTraffic};
use crate::rate_limiter::{RateLimitConfig, RateLimitStatus, RateLimiter};
use collector_core::{CommentTally, CoreError, DateTime, ListingPage, Post, RedditApiError};
use reqwest::header::{HeaderValue, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const REDDIT_API_BASE: &str = "https://oauth.reddit.com";

/// Posts requested per listing page; the most the API serves.
pub const PAGE_LIMIT: u32 = 100;

/// Comments requested per post. Threads past this are cut off with `more`
/// stubs, which are not expanded.
pub const COMMENT_LIMIT: u32 = 500;

/// Wait applied to a 429 that carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListing<T> {
    pub kind: String,
    pub data: RedditListingData<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingData<T> {
    pub children: Vec<RedditListingChild<T>>,
    pub after: Option<String>,
    pub before: Option<String>,
    pub dist: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingChild<T> {
    pub kind: String,
    pub data: T,
}

/// The fields of a `t3` listing child that the collector reads. Fields the
/// statistics cannot do without have no default, so a page missing them
/// fails to parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditPostData {
    pub id: String,
    pub created_utc: f64,
    pub num_comments: u64,
    pub num_crossposts: u64,
    pub ups: i64,
    pub url: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub total_awards_received: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub permalink: String,
}

impl TryFrom<RedditPostData> for Post {
    type Error = RedditApiError;

    fn try_from(post_data: RedditPostData) -> Result<Self, Self::Error> {
        let created_at = if post_data.created_utc.is_finite() {
            DateTime::from_timestamp(post_data.created_utc.trunc() as i64, 0)
        } else {
            None
        }
        .ok_or_else(|| RedditApiError::InvalidResponse {
            details: format!(
                "post {} has an invalid created_utc: {}",
                post_data.id, post_data.created_utc
            ),
        })?;

        Ok(Self {
            is_selftext: !post_data.selftext.is_empty(),
            id: post_data.id,
            created_at,
            num_comments: post_data.num_comments,
            num_crossposts: post_data.num_crossposts,
            ups: post_data.ups,
            url: post_data.url,
            total_awards_received: post_data.total_awards_received,
        })
    }
}

impl RedditListing<RedditPostData> {
    /// Converts the listing into a page of posts, keeping the API's order.
    pub fn into_page(self) -> Result<ListingPage, RedditApiError> {
        if self.kind != "Listing" {
            return Err(RedditApiError::InvalidResponse {
                details: format!("expected a Listing, got {}", self.kind),
            });
        }

        let posts = self
            .data
            .children
            .into_iter()
            .map(|child| {
                if child.kind != "t3" {
                    return Err(RedditApiError::InvalidResponse {
                        details: format!("expected t3 listing children, got {}", child.kind),
                    });
                }
                Post::try_from(child.data)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ListingPage::new(posts, self.data.after))
    }
}

/// A `t1` comment, or a `more` stub parsed the same way and skipped.
#[derive(Debug, Clone, Deserialize)]
pub struct RedditCommentData {
    #[serde(default)]
    pub ups: i64,
    #[serde(default)]
    pub total_awards_received: u64,
    #[serde(default)]
    pub replies: Option<RedditReplies>,
}

/// `replies` is a listing, or an empty string for a comment without any.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RedditReplies {
    Thread(Box<RedditListing<RedditCommentData>>),
    Empty(IgnoredAny),
}

impl RedditListing<RedditCommentData> {
    /// Sums every comment in the tree, walking replies depth first.
    pub fn tally(&self) -> CommentTally {
        let mut tally = CommentTally::default();
        let mut pending: Vec<&RedditListingChild<RedditCommentData>> =
            self.data.children.iter().collect();

        while let Some(child) = pending.pop() {
            if child.kind != "t1" {
                continue;
            }
            tally.add(child.data.ups, child.data.total_awards_received);
            if let Some(RedditReplies::Thread(replies)) = &child.data.replies {
                pending.extend(replies.data.children.iter());
            }
        }
        tally
    }
}

/// Parses the body of a post's comments page: the post itself, then its
/// comment listing.
pub fn parse_comments(
    body: &str,
    post_id: &str,
) -> Result<RedditListing<RedditCommentData>, RedditApiError> {
    serde_json::from_str::<(IgnoredAny, RedditListing<RedditCommentData>)>(body)
        .map(|(_, comments)| comments)
        .map_err(|e| RedditApiError::InvalidResponse {
            details: format!("failed to parse comments of post {}: {}", post_id, e),
        })
}

/// Parses a listing body, reporting serde's location of the first problem.
pub fn parse_listing(
    body: &str,
    subreddit: &str,
) -> Result<RedditListing<RedditPostData>, RedditApiError> {
    serde_json::from_str(body).map_err(|e| RedditApiError::InvalidResponse {
        details: format!("failed to parse posts for r/{}: {}", subreddit, e),
    })
}

/// Maps a non-success HTTP status to the error it stands for. Returns `None`
/// for success statuses.
pub fn classify_status(
    status: StatusCode,
    retry_after: Option<&HeaderValue>,
    subreddit: &str,
) -> Option<RedditApiError> {
    if status.is_success() {
        return None;
    }

    let error = match status {
        StatusCode::UNAUTHORIZED => RedditApiError::InvalidToken,
        StatusCode::FORBIDDEN => RedditApiError::Forbidden {
            resource: format!("r/{}", subreddit),
        },
        StatusCode::NOT_FOUND => RedditApiError::SubredditNotFound {
            subreddit: subreddit.to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS => RedditApiError::RateLimitExceeded {
            retry_after: parse_retry_after(retry_after),
        },
        status if status.is_server_error() => RedditApiError::ServerError {
            status_code: status.as_u16(),
        },
        status => RedditApiError::InvalidResponse {
            details: format!("unexpected status {} for r/{}", status, subreddit),
        },
    };
    Some(error)
}

fn parse_retry_after(value: Option<&HeaderValue>) -> u64 {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
        .map(|seconds| seconds.ceil() as u64)
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

fn transport_error_type(error: &reqwest::Error) -> &'static str {
    if error.is_timeout() {
        "timeout"
    } else if error.is_connect() {
        "connect"
    } else if error.is_body() || error.is_decode() {
        "body"
    } else {
        "network"
    }
}

#[derive(Debug)]
pub struct RedditApiClient {
    http_client: Client,
    rate_limiter: Arc<RateLimiter>,
    metrics: Arc<MetricsCollector>,
    user_agent: String,
    base_url: String,
}

impl RedditApiClient {
    pub fn new(user_agent: String, rate_config: RateLimitConfig) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .user_agent(&user_agent)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http_client,
            rate_limiter: Arc::new(RateLimiter::new(rate_config)),
            metrics: Arc::new(MetricsCollector::new()),
            user_agent,
            base_url: REDDIT_API_BASE.to_string(),
        })
    }

    /// Points the client at another API host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Sends one rate-limited request and returns the response body.
    ///
    /// Every attempt is recorded in the metrics, whatever its outcome.
    pub async fn make_request(
        &self,
        method: Method,
        endpoint: &str,
        subreddit: &str,
        access_token: &str,
        query_params: &[(&str, &str)],
    ) -> Result<String, CoreError> {
        let url = format!("{}{}", self.base_url, endpoint);

        let permit = self.rate_limiter.acquire_permit().await?;
        debug!(
            "Acquired rate limit permit for {} {} after {:?}",
            method, endpoint, permit.queue_wait_time
        );

        let request_builder = self
            .http_client
            .request(method.clone(), &url)
            .bearer_auth(access_token)
            .query(query_params);

        debug!("Making Reddit API request: {} {}", method, endpoint);
        let start_time = Instant::now();
        let result = match request_builder.send().await {
            Ok(response) => {
                let status = response.status();
                match classify_status(status, response.headers().get(RETRY_AFTER), subreddit) {
                    None => match response.text().await {
                        Ok(body) => (Some(status), Ok(body)),
                        Err(e) => (Some(status), Err(CoreError::Network(e))),
                    },
                    Some(api_error) => {
                        warn!("Request failed with status {} for {}", status, endpoint);
                        (Some(status), Err(CoreError::RedditApi(api_error)))
                    }
                }
            }
            Err(e) => {
                warn!("Network error for {} {}: {}", method, endpoint, e);
                if e.is_timeout() {
                    (None, Err(CoreError::RedditApi(RedditApiError::RequestTimeout)))
                } else {
                    (None, Err(CoreError::Network(e)))
                }
            }
        };
        let response_time = start_time.elapsed();
        drop(permit);

        let (status, outcome) = result;
        let recorded = match (status, &outcome) {
            (Some(status), _) => RequestOutcome::Response {
                status: status.as_u16(),
                ok: outcome.is_ok(),
            },
            (None, Err(CoreError::Network(e))) => RequestOutcome::Transport(transport_error_type(e)),
            (None, _) => RequestOutcome::Transport("timeout"),
        };

        self.rate_limiter
            .record_outcome(recorded.is_ok(), recorded.is_rate_limited())
            .await;
        self.metrics
            .record_request(RequestMetrics {
                subreddit: subreddit.to_string(),
                response_time,
                outcome: recorded,
            })
            .await;

        outcome
    }

    /// Fetches one page of the subreddit's `new` listing.
    pub async fn get_new_posts(
        &self,
        access_token: &str,
        subreddit: &str,
        after: Option<&str>,
    ) -> Result<RedditListing<RedditPostData>, CoreError> {
        let endpoint = format!("/r/{}/new", subreddit);
        let limit = PAGE_LIMIT.to_string();
        let mut params = vec![("limit", limit.as_str()), ("show", "all"), ("raw_json", "1")];
        if let Some(after_val) = after {
            params.push(("after", after_val));
        }

        let body = self
            .make_request(Method::GET, &endpoint, subreddit, access_token, &params)
            .await?;
        let listing = parse_listing(&body, subreddit)?;

        info!(
            "Retrieved {} posts from r/{}",
            listing.data.children.len(),
            subreddit
        );
        Ok(listing)
    }

    /// Fetches the comment tree of one post and tallies it.
    pub async fn get_post_comments(
        &self,
        access_token: &str,
        subreddit: &str,
        post_id: &str,
    ) -> Result<CommentTally, CoreError> {
        let endpoint = format!("/r/{}/comments/{}", subreddit, post_id);
        let limit = COMMENT_LIMIT.to_string();
        let params = [("limit", limit.as_str()), ("raw_json", "1")];

        let body = self
            .make_request(Method::GET, &endpoint, subreddit, access_token, &params)
            .await?;
        let tally = parse_comments(&body, post_id)?.tally();

        debug!(
            "Tallied {} comments on post {} in r/{}",
            tally.comments, post_id, subreddit
        );
        Ok(tally)
    }

    pub async fn get_metrics(&self) -> ApiMetrics {
        self.metrics.get_metrics().await
    }

    pub async fn get_subreddit_traffic(&self, subreddit: &str) -> Option<SubredditTraffic> {
        self.metrics.get_subreddit_traffic(subreddit).await
    }

    pub async fn get_rate_limit_status(&self) -> RateLimitStatus {
        self.rate_limiter.get_rate_limit_status().await
    }
}
