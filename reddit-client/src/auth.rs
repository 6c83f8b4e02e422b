use collector_core::{ConfigError, CoreError, Credentials, ErrorExt, RedditApiError};
use oauth2::basic::{BasicClient, BasicErrorResponse, BasicTokenResponse};
use oauth2::{
    AuthUrl, ClientId, ClientSecret, HttpRequest, HttpResponse, RequestTokenError,
    ResourceOwnerPassword, ResourceOwnerUsername, TokenResponse, TokenUrl,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

pub const REDDIT_AUTH_URL: &str = "https://www.reddit.com/api/v1/authorize";
pub const REDDIT_TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";

/// Tokens this close to expiry are treated as expired.
pub const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct RedditOAuth2Config {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub user_agent: String,
    pub token_url: String,
}

impl RedditOAuth2Config {
    pub fn new(credentials: Credentials, user_agent: String) -> Self {
        Self {
            client_id: credentials.client_id,
            client_secret: credentials.client_secret,
            username: credentials.username,
            password: credentials.password,
            user_agent,
            token_url: REDDIT_TOKEN_URL.to_string(),
        }
    }

    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    /// The user agent Reddit's API rules ask script clients to send.
    pub fn default_user_agent(username: &str) -> String {
        format!(
            "{}:reddit-collector:v{} (by /u/{})",
            std::env::consts::OS,
            env!("CARGO_PKG_VERSION"),
            username
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedditToken {
    pub access_token: String,
    pub expires_at: SystemTime,
    pub scope: Vec<String>,
}

impl RedditToken {
    pub fn from_response(response: &BasicTokenResponse, issued_at: SystemTime) -> Self {
        let lifetime = response.expires_in().unwrap_or(DEFAULT_TOKEN_LIFETIME);
        Self {
            access_token: response.access_token().secret().clone(),
            expires_at: issued_at + lifetime,
            scope: response
                .scopes()
                .map(|scopes| scopes.iter().map(|scope| scope.to_string()).collect())
                .unwrap_or_default(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }

    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        now + EXPIRY_MARGIN >= self.expires_at
    }
}

#[derive(Debug, Clone)]
pub enum AuthState {
    NotAuthenticated,
    Authenticated { token: RedditToken },
    TokenExpired { token: RedditToken },
}

impl AuthState {
    pub fn from_token(token: RedditToken) -> Self {
        if token.is_expired() {
            AuthState::TokenExpired { token }
        } else {
            AuthState::Authenticated { token }
        }
    }
}

/// A token cache entry. The token is only reused for the same app and user.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedToken {
    client_id: String,
    username: String,
    token: RedditToken,
}

/// Keeps the last access token on disk so consecutive runs inside the
/// token's lifetime skip the token endpoint.
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the cached token for this app and user, if any. An unreadable
    /// cache is treated as empty.
    pub fn load(&self, config: &RedditOAuth2Config) -> Option<RedditToken> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(_) => {
                debug!("No token cache at {}", self.path.display());
                return None;
            }
        };

        match serde_json::from_str::<CachedToken>(&content) {
            Ok(cached) if cached.client_id == config.client_id && cached.username == config.username => {
                Some(cached.token)
            }
            Ok(_) => {
                debug!("Token cache at {} belongs to another account", self.path.display());
                None
            }
            Err(e) => {
                warn!("Ignoring unreadable token cache {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub fn store(&self, config: &RedditOAuth2Config, token: &RedditToken) -> Result<(), CoreError> {
        let cached = CachedToken {
            client_id: config.client_id.clone(),
            username: config.username.clone(),
            token: token.clone(),
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec(&cached)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }

        debug!("Stored access token in {}", self.path.display());
        Ok(())
    }
}

pub fn build_oauth_client(config: &RedditOAuth2Config) -> Result<BasicClient, CoreError> {
    let auth_url = AuthUrl::new(REDDIT_AUTH_URL.to_string()).map_err(|e| CoreError::Internal {
        message: format!("Invalid authorization URL: {}", e),
    })?;
    let token_url = TokenUrl::new(config.token_url.clone()).map_err(|e| {
        CoreError::Config(ConfigError::InvalidValue {
            field: "token_url".to_string(),
            value: format!("{} ({})", config.token_url, e),
        })
    })?;

    Ok(BasicClient::new(
        ClientId::new(config.client_id.clone()),
        Some(ClientSecret::new(config.client_secret.clone())),
        auth_url,
        Some(token_url),
    ))
}

/// Runs the OAuth2 token request through our own reqwest client, so it
/// carries the configured user agent.
async fn send_oauth_request(
    http_client: &Client,
    request: HttpRequest,
) -> Result<HttpResponse, reqwest::Error> {
    let response = http_client
        .request(request.method, request.url.as_str())
        .headers(request.headers)
        .body(request.body)
        .send()
        .await?;

    let status_code = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?.to_vec();

    Ok(HttpResponse {
        status_code,
        headers,
        body,
    })
}

fn map_token_error(error: RequestTokenError<reqwest::Error, BasicErrorResponse>) -> CoreError {
    match error {
        RequestTokenError::ServerResponse(response) => {
            let mut reason = response.error().to_string();
            if let Some(description) = response.error_description() {
                reason = format!("{}: {}", reason, description);
            }
            RedditApiError::AuthenticationFailed { reason }.into()
        }
        RequestTokenError::Request(e) if e.is_timeout() => RedditApiError::RequestTimeout.into(),
        RequestTokenError::Request(e) => CoreError::Network(e),
        // Reddit answers a bad password with 200 and an error body
        RequestTokenError::Parse(e, body) => {
            let reason = error_body_reason(&body)
                .unwrap_or_else(|| format!("unexpected token response: {}", e));
            RedditApiError::AuthenticationFailed { reason }.into()
        }
        RequestTokenError::Other(message) => {
            RedditApiError::AuthenticationFailed { reason: message }.into()
        }
    }
}

fn error_body_reason(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<BasicErrorResponse>(body)
        .ok()
        .map(|response| response.error().to_string())
}

/// Exchanges the account's username and password for an access token
/// (the OAuth2 password grant Reddit offers script apps).
pub async fn request_password_token(
    oauth_client: &BasicClient,
    http_client: &Client,
    config: &RedditOAuth2Config,
) -> Result<RedditToken, CoreError> {
    info!("Requesting access token for /u/{}", config.username);

    let username = ResourceOwnerUsername::new(config.username.clone());
    let password = ResourceOwnerPassword::new(config.password.clone());
    let issued_at = SystemTime::now();

    let response = oauth_client
        .exchange_password(&username, &password)
        .request_async(|request| send_oauth_request(http_client, request))
        .await
        .map_err(|e| {
            let error = map_token_error(e);
            error.log_error();
            error
        })?;

    let token = RedditToken::from_response(&response, issued_at);
    debug!("Access token valid until {:?}", token.expires_at);
    Ok(token)
}
