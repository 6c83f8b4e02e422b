use collector_core::{CoreError, RateLimitSettings};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::sleep;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub time_window: Duration,
    /// Requests that may start back to back, and the number in flight.
    pub burst_allowance: u32,
}

impl RateLimitConfig {
    /// One request per second, one at a time.
    pub fn reddit_oauth() -> Self {
        Self::from_settings(&RateLimitSettings::default())
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self {
            max_requests: settings.requests_per_minute,
            time_window: Duration::from_secs(60),
            burst_allowance: settings.burst,
        }
    }

    fn tokens_per_second(&self) -> f64 {
        self.max_requests.max(1) as f64 / self.time_window.as_secs_f64()
    }
}

/// Refills continuously at `max_requests / time_window`, holding at most
/// `burst_allowance` tokens.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    per_second: f64,
    level: Mutex<(f64, Instant)>,
}

impl TokenBucket {
    pub fn new(config: &RateLimitConfig) -> Self {
        let capacity = config.burst_allowance.max(1) as f64;
        Self {
            capacity,
            per_second: config.tokens_per_second(),
            level: Mutex::new((capacity, Instant::now())),
        }
    }

    fn refilled(&self, tokens: f64, since: Instant, now: Instant) -> f64 {
        let earned = now.duration_since(since).as_secs_f64() * self.per_second;
        (tokens + earned).min(self.capacity)
    }

    /// Takes one token, or says how long until one is available.
    pub async fn try_take(&self) -> Result<(), Duration> {
        let mut level = self.level.lock().await;
        let now = Instant::now();
        let tokens = self.refilled(level.0, level.1, now);

        if tokens >= 1.0 {
            *level = (tokens - 1.0, now);
            Ok(())
        } else {
            *level = (tokens, now);
            Err(Duration::from_secs_f64((1.0 - tokens) / self.per_second))
        }
    }

    pub async fn available(&self) -> f64 {
        let level = self.level.lock().await;
        self.refilled(level.0, level.1, Instant::now())
    }
}

/// Request counters for the current fixed window.
#[derive(Debug, Clone)]
pub struct RequestWindow {
    pub started: SystemTime,
    pub requests: u32,
    pub successes: u32,
    pub rate_limited: u32,
}

impl RequestWindow {
    fn new(started: SystemTime) -> Self {
        Self {
            started,
            requests: 0,
            successes: 0,
            rate_limited: 0,
        }
    }

    /// Starts a fresh window once `length` has passed.
    fn roll(&mut self, length: Duration) -> &mut Self {
        let now = SystemTime::now();
        if now.duration_since(self.started).unwrap_or_default() >= length {
            *self = Self::new(now);
        }
        self
    }
}

/// Paces requests with a [`TokenBucket`] and caps the number in flight at
/// the burst allowance.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    bucket: TokenBucket,
    in_flight: Arc<Semaphore>,
    window: Mutex<RequestWindow>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            bucket: TokenBucket::new(&config),
            in_flight: Arc::new(Semaphore::new(config.burst_allowance.max(1) as usize)),
            window: Mutex::new(RequestWindow::new(SystemTime::now())),
            config,
        }
    }

    /// Waits for a free slot and a token. The slot is held until the permit
    /// is dropped.
    pub async fn acquire_permit(&self) -> Result<RateLimitPermit, CoreError> {
        let queued_at = Instant::now();
        let slot = self
            .in_flight
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CoreError::Internal {
                message: "rate limiter closed".to_string(),
            })?;

        while let Err(wait) = self.bucket.try_take().await {
            debug!("Rate limit reached, waiting {:?}", wait);
            sleep(wait).await;
        }

        self.window
            .lock()
            .await
            .roll(self.config.time_window)
            .requests += 1;

        Ok(RateLimitPermit {
            _slot: slot,
            queue_wait_time: queued_at.elapsed(),
        })
    }

    /// Records how a request that held a permit turned out.
    pub async fn record_outcome(&self, success: bool, rate_limited: bool) {
        let mut window = self.window.lock().await;
        let window = window.roll(self.config.time_window);
        if success {
            window.successes += 1;
        }
        if rate_limited {
            window.rate_limited += 1;
        }
    }

    pub async fn get_rate_limit_status(&self) -> RateLimitStatus {
        let tokens = self.bucket.available().await;
        let window = self.window.lock().await.roll(self.config.time_window).clone();
        let max_permits = self.config.burst_allowance.max(1);

        RateLimitStatus {
            available_tokens: tokens.floor() as u32,
            max_tokens: max_permits,
            available_permits: self.in_flight.available_permits(),
            max_permits: max_permits as usize,
            requests_per_window: self.config.max_requests,
            current_window_requests: window.requests,
            rate_limited_in_window: window.rate_limited,
            window_start_time: window.started,
            estimated_wait_time: (tokens < 1.0).then(|| {
                Duration::from_secs_f64((1.0 - tokens) / self.config.tokens_per_second())
            }),
        }
    }
}

#[derive(Debug)]
pub struct RateLimitPermit {
    _slot: OwnedSemaphorePermit,
    pub queue_wait_time: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub available_tokens: u32,
    pub max_tokens: u32,
    pub available_permits: usize,
    pub max_permits: usize,
    pub requests_per_window: u32,
    pub current_window_requests: u32,
    pub rate_limited_in_window: u32,
    pub window_start_time: SystemTime,
    pub estimated_wait_time: Option<Duration>,
}

impl RateLimitStatus {
    /// Share of the current window's request budget already spent.
    pub fn utilization_percentage(&self) -> f64 {
        if self.requests_per_window == 0 {
            return 100.0;
        }
        let used = self.current_window_requests.min(self.requests_per_window);
        used as f64 / self.requests_per_window as f64 * 100.0
    }

    pub fn requests_remaining_in_window(&self) -> u32 {
        self.requests_per_window
            .saturating_sub(self.current_window_requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(per_minute: u32, burst: u32) -> RateLimitConfig {
        RateLimitConfig::from_settings(&RateLimitSettings {
            requests_per_minute: per_minute,
            burst,
        })
    }

    #[tokio::test]
    async fn test_bucket_allows_burst_then_refuses() {
        let bucket = TokenBucket::new(&config(60, 5));

        for _ in 0..5 {
            assert!(bucket.try_take().await.is_ok());
        }
        let wait = bucket.try_take().await.unwrap_err();
        assert!(wait <= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_bucket_refills_over_time() {
        // One token every 100ms.
        let bucket = TokenBucket::new(&config(600, 1));

        assert!(bucket.try_take().await.is_ok());
        assert!(bucket.try_take().await.is_err());

        sleep(Duration::from_millis(150)).await;
        assert!(bucket.try_take().await.is_ok());
    }

    #[test]
    fn test_config_from_settings() {
        let config = config(30, 3);
        assert_eq!(config.max_requests, 30);
        assert_eq!(config.burst_allowance, 3);
        assert_eq!(config.time_window, Duration::from_secs(60));

        let reddit = RateLimitConfig::reddit_oauth();
        assert_eq!(reddit.max_requests, 60);
        assert_eq!(reddit.burst_allowance, 1);
    }

    #[tokio::test]
    async fn test_permits_cap_requests_in_flight() {
        let limiter = RateLimiter::new(config(600, 2));

        let first = limiter.acquire_permit().await.unwrap();
        let second = limiter.acquire_permit().await.unwrap();

        let status = limiter.get_rate_limit_status().await;
        assert_eq!(status.available_permits, 0);
        assert_eq!(status.current_window_requests, 2);
        assert!(status.available_tokens <= status.max_tokens);

        drop(first);
        drop(second);
        let status = limiter.get_rate_limit_status().await;
        assert_eq!(status.available_permits, 2);
    }

    #[tokio::test]
    async fn test_limiter_paces_requests() {
        let limiter = RateLimiter::new(config(600, 1));

        let start = Instant::now();
        drop(limiter.acquire_permit().await.unwrap());
        let second = limiter.acquire_permit().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(80));
        assert!(second.queue_wait_time >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_record_outcome() {
        let limiter = RateLimiter::new(RateLimitConfig::reddit_oauth());
        let _permit = limiter.acquire_permit().await.unwrap();
        limiter.record_outcome(false, true).await;

        let status = limiter.get_rate_limit_status().await;
        assert_eq!(status.rate_limited_in_window, 1);
        assert_eq!(status.requests_remaining_in_window(), 59);
        assert!(status.estimated_wait_time.is_some());
        assert!((status.utilization_percentage() - 100.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_request_window_rolls_over() {
        let mut window = RequestWindow::new(SystemTime::now() - Duration::from_secs(120));
        window.requests = 7;

        assert_eq!(window.roll(Duration::from_secs(60)).requests, 0);

        window.requests = 3;
        assert_eq!(window.roll(Duration::from_secs(60)).requests, 3);
    }
}
