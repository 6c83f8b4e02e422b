use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;

/// How one request ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RequestOutcome {
    /// The server answered. `ok` is false if the status was an error or the
    /// body could not be read.
    Response { status: u16, ok: bool },
    /// No response arrived.
    Transport(&'static str),
}

impl RequestOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, RequestOutcome::Response { ok: true, .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RequestOutcome::Response { status: 429, .. })
    }
}

#[derive(Debug, Clone)]
pub struct RequestMetrics {
    pub subreddit: String,
    pub response_time: Duration,
    pub outcome: RequestOutcome,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rate_limited_requests: u64,
    pub average_response_time: Duration,
    pub last_request_time: Option<SystemTime>,
    pub by_subreddit: BTreeMap<String, SubredditTraffic>,
    /// Responses per HTTP status code.
    pub status_codes: BTreeMap<u16, u64>,
    /// Requests that never produced a response, by error type.
    pub transport_errors: BTreeMap<String, u64>,
}

/// Listing requests made for one subreddit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubredditTraffic {
    pub requests: u64,
    pub failures: u64,
    pub total_response_time: Duration,
    pub slowest_response: Duration,
}

impl SubredditTraffic {
    fn new() -> Self {
        Self {
            requests: 0,
            failures: 0,
            total_response_time: Duration::ZERO,
            slowest_response: Duration::ZERO,
        }
    }

    pub fn average_response_time(&self) -> Duration {
        match u32::try_from(self.requests) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(requests) => self.total_response_time / requests,
        }
    }
}

impl ApiMetrics {
    fn record(&mut self, request: &RequestMetrics) {
        self.total_requests += 1;
        self.last_request_time = Some(SystemTime::now());

        if request.outcome.is_ok() {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }
        if request.outcome.is_rate_limited() {
            self.rate_limited_requests += 1;
        }

        match request.outcome {
            RequestOutcome::Response { status, .. } => {
                *self.status_codes.entry(status).or_insert(0) += 1;
            }
            RequestOutcome::Transport(kind) => {
                *self.transport_errors.entry(kind.to_string()).or_insert(0) += 1;
            }
        }

        // Running mean, so no per-request history is kept.
        let n = self.total_requests as f64;
        let previous = self.average_response_time.as_secs_f64();
        self.average_response_time = Duration::from_secs_f64(
            previous + (request.response_time.as_secs_f64() - previous) / n,
        );

        let traffic = self
            .by_subreddit
            .entry(request.subreddit.clone())
            .or_insert_with(SubredditTraffic::new);
        traffic.requests += 1;
        if !request.outcome.is_ok() {
            traffic.failures += 1;
        }
        traffic.total_response_time += request.response_time;
        traffic.slowest_response = traffic.slowest_response.max(request.response_time);
    }
}

/// Per-run tally of API traffic, shared by every request the client makes.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    metrics: Arc<RwLock<ApiMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_request(&self, request: RequestMetrics) {
        self.metrics.write().await.record(&request);
    }

    pub async fn get_metrics(&self) -> ApiMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn get_subreddit_traffic(&self, subreddit: &str) -> Option<SubredditTraffic> {
        self.metrics.read().await.by_subreddit.get(subreddit).cloned()
    }

    pub async fn reset_metrics(&self) {
        *self.metrics.write().await = ApiMetrics::default();
    }

    pub async fn export_metrics(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.get_metrics().await)
    }
}
