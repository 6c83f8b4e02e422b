use collector_core::{CoreError, ErrorExt, RetrySettings};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Bounded exponential back-off.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts in total, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound for any single wait, server-requested ones included.
    pub max_delay: Duration,
    /// Extra random wait, as a fraction of the computed delay.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryConfig {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter_factor: 0.2,
        }
    }

    /// Wait before retry number `retry` (0 for the first retry): the base
    /// delay doubled per retry, plus jitter, capped at `max_delay`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let doubled = self
            .base_delay
            .checked_mul(1u32.checked_shl(retry).unwrap_or(u32::MAX))
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        let jitter = doubled.mul_f64(self.jitter_factor.clamp(0.0, 1.0) * fastrand::f64());
        (doubled + jitter).min(self.max_delay)
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    Retry,
    /// The server named its own delay.
    RetryWithDelay(Duration),
    NoRetry,
}

impl RetryStrategy {
    pub fn for_error(error: &CoreError) -> Self {
        if !error.is_retryable() {
            return RetryStrategy::NoRetry;
        }
        match error.retry_after() {
            Some(delay) => RetryStrategy::RetryWithDelay(delay),
            None => RetryStrategy::Retry,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryMetrics {
    pub total_retries: u64,
    /// Operations that failed at least once and then succeeded.
    pub successful_retries: u64,
    pub failed_operations: u64,
    pub total_retry_delay: Duration,
}

impl RetryMetrics {
    pub fn average_retry_delay(&self) -> Duration {
        match u32::try_from(self.total_retries) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(retries) => self.total_retry_delay / retries,
        }
    }
}

/// Wraps fallible operations with bounded retries.
///
/// One executor may be shared by several pipelines; it keeps no state that
/// lets the failures of one operation affect another.
#[derive(Debug)]
pub struct RetryExecutor {
    config: RetryConfig,
    metrics: Mutex<RetryMetrics>,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            metrics: Mutex::new(RetryMetrics::default()),
        }
    }

    fn metrics(&self) -> MutexGuard<'_, RetryMetrics> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `operation` until it succeeds, fails permanently, or runs out
    /// of attempts. The error of the last attempt is returned unchanged.
    pub async fn execute<F, Fut, T>(&self, name: &str, operation: F) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let mut waited = Duration::ZERO;
        let mut retries = 0u32;

        loop {
            let started = Instant::now();
            let error = match operation().await {
                Ok(value) => {
                    if retries > 0 {
                        self.metrics().successful_retries += 1;
                        info!("{} succeeded after {} retries ({:?} waited)", name, retries, waited);
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };
            debug!("{} attempt {} failed after {:?}: {}", name, retries + 1, started.elapsed(), error);

            let out_of_attempts = retries + 1 >= self.config.max_attempts;
            let delay = match RetryStrategy::for_error(&error) {
                RetryStrategy::NoRetry => None,
                _ if out_of_attempts => None,
                RetryStrategy::Retry => Some(self.config.backoff(retries)),
                RetryStrategy::RetryWithDelay(delay) => Some(delay.min(self.config.max_delay)),
            };

            let Some(delay) = delay else {
                self.metrics().failed_operations += 1;
                warn!("{} gave up after {} attempt(s): {}", name, retries + 1, error);
                return Err(error);
            };

            info!("Retrying {} in {:?}: {}", name, delay, error);
            {
                let mut metrics = self.metrics();
                metrics.total_retries += 1;
                metrics.total_retry_delay += delay;
            }
            sleep(delay).await;
            waited += delay;
            retries += 1;
        }
    }

    pub fn get_metrics(&self) -> RetryMetrics {
        self.metrics().clone()
    }

    pub fn reset_metrics(&self) {
        *self.metrics() = RetryMetrics::default();
    }
}
