use crate::api::RedditApiClient;
use crate::auth::{
    build_oauth_client, request_password_token, AuthState, RedditOAuth2Config, RedditToken,
    TokenCache,
};
use crate::metrics::ApiMetrics;
use crate::rate_limiter::{RateLimitConfig, RateLimitStatus};
use crate::retry::{RetryConfig, RetryExecutor, RetryMetrics};
use collector_core::{
    CommentTally, CoreError, ErrorExt, ListingPage, ListingSource, RedditApiError,
};
use oauth2::basic::BasicClient;
use reqwest::redirect::Policy;
use reqwest::Client;
use std::future::Future;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// An authenticated, rate-limited view of Reddit's listing API.
///
/// A token the API rejects with 401 is replaced once through the password
/// grant and the request repeated.
#[derive(Debug)]
pub struct RedditClient {
    config: RedditOAuth2Config,
    oauth_client: BasicClient,
    auth_http_client: Client,
    api_client: RedditApiClient,
    retry: RetryExecutor,
    auth_state: RwLock<AuthState>,
    refresh: Mutex<()>,
}

impl RedditClient {
    pub fn new(
        config: RedditOAuth2Config,
        rate_config: RateLimitConfig,
        retry_config: RetryConfig,
    ) -> Result<Self, CoreError> {
        let oauth_client = build_oauth_client(&config)?;
        let auth_http_client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(30))
            .redirect(Policy::none())
            .build()?;
        let api_client = RedditApiClient::new(config.user_agent.clone(), rate_config)?;

        Ok(Self {
            config,
            oauth_client,
            auth_http_client,
            api_client,
            retry: RetryExecutor::new(retry_config),
            auth_state: RwLock::new(AuthState::NotAuthenticated),
            refresh: Mutex::new(()),
        })
    }

    /// Points listing requests at another API host.
    pub fn with_api_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api_client = self.api_client.with_base_url(base_url);
        self
    }

    fn state(&self) -> RwLockReadGuard<'_, AuthState> {
        self.auth_state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(&*self.state(), AuthState::Authenticated { token } if !token.is_expired())
    }

    pub fn needs_refresh(&self) -> bool {
        match &*self.state() {
            AuthState::Authenticated { token } => token.is_expired(),
            AuthState::TokenExpired { .. } => true,
            AuthState::NotAuthenticated => false,
        }
    }

    pub fn get_auth_state(&self) -> AuthState {
        self.state().clone()
    }

    pub fn set_token(&self, token: RedditToken) {
        *self.auth_state.write().unwrap_or_else(PoisonError::into_inner) =
            AuthState::from_token(token);
    }

    /// Requests a fresh token with the password grant.
    pub async fn authenticate(&self) -> Result<RedditToken, CoreError> {
        let token =
            request_password_token(&self.oauth_client, &self.auth_http_client, &self.config)
                .await?;
        self.set_token(token.clone());
        info!("Authenticated as /u/{}", self.config.username);
        Ok(token)
    }

    /// Makes sure a usable token is held, trying the cache before the token
    /// endpoint. A failure to write the cache is logged and otherwise ignored.
    pub async fn ensure_authenticated(&self, cache: Option<&TokenCache>) -> Result<(), CoreError> {
        if self.is_authenticated() {
            return Ok(());
        }

        if let Some(token) = cache.and_then(|cache| cache.load(&self.config)) {
            if !token.is_expired() {
                debug!("Reusing cached access token");
                self.set_token(token);
                return Ok(());
            }
            debug!("Cached access token has expired");
        }

        let token = self.authenticate().await?;
        if let Some(cache) = cache {
            if let Err(e) = cache.store(&self.config, &token) {
                e.log_warn();
            }
        }
        Ok(())
    }

    fn access_token(&self) -> Result<String, CoreError> {
        match &*self.state() {
            AuthState::Authenticated { token } | AuthState::TokenExpired { token } => {
                Ok(token.access_token.clone())
            }
            AuthState::NotAuthenticated => Err(RedditApiError::AuthenticationFailed {
                reason: "Not authenticated".to_string(),
            }
            .into()),
        }
    }

    /// Replaces a token the API rejected. Pipelines that hit the same 401
    /// concurrently share one token request.
    async fn replace_rejected(&self, rejected: &str) -> Result<String, CoreError> {
        let _refresh = self.refresh.lock().await;
        let current = self.access_token()?;
        if current != rejected {
            return Ok(current);
        }

        warn!("Access token was rejected, requesting a new one");
        Ok(self.authenticate().await?.access_token)
    }

    /// Runs `request` with the current token under the retry executor. On a
    /// 401 the token is replaced and the request run once more; if no new
    /// token can be had, the 401 stands.
    async fn with_token<T, F, Fut>(&self, operation: &str, request: F) -> Result<T, CoreError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let token = self.access_token()?;
        let result = self
            .retry
            .execute(operation, || request(token.clone()))
            .await;

        if !matches!(result, Err(CoreError::RedditApi(RedditApiError::InvalidToken))) {
            return result;
        }
        let token = match self.replace_rejected(&token).await {
            Ok(token) => token,
            Err(e) => {
                e.log_warn();
                return result;
            }
        };
        self.retry
            .execute(operation, || request(token.clone()))
            .await
    }

    pub async fn get_api_metrics(&self) -> ApiMetrics {
        self.api_client.get_metrics().await
    }

    pub async fn get_rate_limit_status(&self) -> RateLimitStatus {
        self.api_client.get_rate_limit_status().await
    }

    pub fn get_retry_metrics(&self) -> RetryMetrics {
        self.retry.get_metrics()
    }
}

impl ListingSource for RedditClient {
    async fn fetch_page(
        &self,
        subreddit: &str,
        after: Option<&str>,
    ) -> Result<ListingPage, CoreError> {
        let operation = format!("r/{} after {}", subreddit, after.unwrap_or("<start>"));

        self.with_token(&operation, |token| async move {
            let listing = self
                .api_client
                .get_new_posts(&token, subreddit, after)
                .await?;
            Ok(listing.into_page()?)
        })
        .await
    }

    async fn fetch_comments(
        &self,
        subreddit: &str,
        post_id: &str,
    ) -> Result<CommentTally, CoreError> {
        let operation = format!("comments of {} in r/{}", post_id, subreddit);

        self.with_token(&operation, |token| async move {
            self.api_client
                .get_post_comments(&token, subreddit, post_id)
                .await
        })
        .await
    }
}
