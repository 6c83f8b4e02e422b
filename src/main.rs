mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::Cli;
use collection_service::Collector;
use collector_core::{AppConfig, Utc};
use reddit_client::{RateLimitConfig, RedditClient, RedditOAuth2Config, RetryConfig, TokenCache};
use report_writer::ReportWriter;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let json = cli.json;
    let config = cli.into_config().context("Invalid configuration")?;

    run(config, json).await
}

async fn run(config: AppConfig, json: bool) -> Result<()> {
    let credentials = config.reddit.resolve().context("Missing Reddit credentials")?;
    let user_agent = RedditOAuth2Config::default_user_agent(&credentials.username);
    let oauth_config = RedditOAuth2Config::new(credentials, user_agent);

    let client = RedditClient::new(
        oauth_config,
        RateLimitConfig::from_settings(&config.rate_limit),
        RetryConfig::from_settings(&config.retry),
    )?;

    let cache = TokenCache::new(&config.token_cache);
    client
        .ensure_authenticated(Some(&cache))
        .await
        .context("Reddit authentication failed")?;

    let collector = Collector::new(&client)
        .with_concurrency(config.concurrency)
        .with_comments(config.collect_comments);
    let report = collector
        .collect_until(
            &config.subreddits,
            config.max_age(),
            shutdown_signal(config.run_timeout_seconds.map(Duration::from_secs)),
        )
        .await;

    let writer = ReportWriter::new(&config.out_dir).with_json_snapshot(json);
    let written_at = report.finished_at.unwrap_or_else(Utc::now);
    let summary = writer
        .write(&report, written_at)
        .context("Failed to write report")?;
    if let Some(path) = &summary.json_snapshot {
        info!("Report snapshot written to {}", path.display());
    }

    log_metrics(&client).await;

    for (name, failure) in &report.failures {
        warn!(
            "r/{} not recorded ({}, {} post(s) seen): {}",
            name, failure.kind, failure.posts_seen, failure.message
        );
    }

    if report.aborted {
        error!("Run {} was aborted", report.run_id);
        bail!(
            "run aborted with {} of {} subreddit(s) collected",
            report.stats.len(),
            report.requested.len()
        );
    }
    Ok(())
}

/// Resolves on Ctrl-C, or once `timeout` has elapsed.
async fn shutdown_signal(timeout: Option<Duration>) {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let deadline = async {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = interrupt => warn!("Interrupted"),
        _ = deadline => warn!("Run timeout reached"),
    }
}

async fn log_metrics(client: &RedditClient) {
    let metrics = client.get_api_metrics().await;
    info!(
        "API requests: {} total, {} ok, {} failed, {} rate limited, avg {:?}",
        metrics.total_requests,
        metrics.successful_requests,
        metrics.failed_requests,
        metrics.rate_limited_requests,
        metrics.average_response_time
    );
    info!("Status codes: {:?}", metrics.status_codes);
    if !metrics.transport_errors.is_empty() {
        info!("Transport errors: {:?}", metrics.transport_errors);
    }

    let rate = client.get_rate_limit_status().await;
    info!(
        "Rate limit: {}/{} requests in window ({:.0}% used)",
        rate.current_window_requests,
        rate.requests_per_window,
        rate.utilization_percentage()
    );

    let retries = client.get_retry_metrics();
    info!(
        "Retries: {} total, {} recovered, {} gave up",
        retries.total_retries, retries.successful_retries, retries.failed_operations
    );
}
