pub mod api;
pub mod auth;
pub mod client;
pub mod metrics;
pub mod rate_limiter;
pub mod retry;


pub use api::{RedditApiClient, RedditCommentData, RedditListing, RedditPostData};
pub use auth::{AuthState, RedditOAuth2Config, RedditToken, TokenCache};
pub use client::RedditClient;
pub use metrics::{ApiMetrics, SubredditTraffic};
pub use rate_limiter::{RateLimitConfig, RateLimitStatus};
pub use retry::{RetryConfig, RetryMetrics};
