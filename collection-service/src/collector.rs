use crate::aggregate::{try_aggregate, StatsAccumulator};
use crate::fetcher::fetch;
use crate::filter::passes;
use collector_core::{
    Clock, CoreError, DateTime, ErrorReporter, FailureKind, ListingSource, Post, Report,
    SubredditFailure, SubredditStats, SystemClock, Utc,
};
use futures::{future, stream, StreamExt, TryStream, TryStreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::pin::pin;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Posts with fewer comments than this are counted without fetching their
/// comment tree.
pub const MIN_COMMENTS_TO_FETCH: u64 = 2;

/// Runs one pipeline per subreddit against a shared listing source and
/// assembles the results into a [`Report`].
pub struct Collector<S, C = SystemClock> {
    source: S,
    clock: C,
    concurrency: usize,
    comments: bool,
    reporter: ErrorReporter,
}

impl<S: ListingSource> Collector<S> {
    pub fn new(source: S) -> Self {
        Self::with_clock(source, SystemClock)
    }
}

impl<S: ListingSource, C: Clock> Collector<S, C> {
    pub fn with_clock(source: S, clock: C) -> Self {
        Self {
            source,
            clock,
            concurrency: 1,
            comments: true,
            reporter: ErrorReporter::new(),
        }
    }

    /// Number of subreddit pipelines allowed to run at once. Defaults to 1.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Whether comment trees are fetched for the comment statistics.
    /// Defaults to true.
    pub fn with_comments(mut self, enabled: bool) -> Self {
        self.comments = enabled;
        self
    }

    /// Fetches, filters and aggregates one subreddit. Ages are measured
    /// against a single `now` taken when the pipeline starts.
    pub async fn collect_subreddit(
        &self,
        subreddit: &str,
        max_age: Option<u64>,
    ) -> Result<SubredditStats, SubredditFailure> {
        let now = self.clock.now();
        let mut posts_seen = 0u64;

        let posts = fetch(&self.source, subreddit, max_age, now)
            .inspect_ok(|_| posts_seen += 1)
            .try_filter(|post| future::ready(passes(post, max_age, now)));

        let result = if self.comments {
            self.aggregate_with_comments(subreddit, posts, now).await
        } else {
            try_aggregate(subreddit, posts, now).await
        };
        match result {
            Ok(stats) => Ok(stats),
            Err(e) => {
                self.reporter.report_error(&e);
                Err(SubredditFailure {
                    kind: e.failure_kind(),
                    message: e.to_string(),
                    posts_seen,
                })
            }
        }
    }

    /// Like [`try_aggregate`], but also tallies the comment tree of every
    /// post with at least [`MIN_COMMENTS_TO_FETCH`] comments.
    async fn aggregate_with_comments<St>(
        &self,
        subreddit: &str,
        posts: St,
        now: DateTime<Utc>,
    ) -> Result<SubredditStats, CoreError>
    where
        St: TryStream<Ok = Post, Error = CoreError>,
    {
        let accumulator = posts
            .try_fold(StatsAccumulator::new(now), |acc, post| async move {
                let acc = acc.add(&post);
                if post.num_comments < MIN_COMMENTS_TO_FETCH {
                    return Ok::<_, CoreError>(acc);
                }
                let comments = self.source.fetch_comments(subreddit, &post.id).await?;
                Ok(acc.add_comments(&comments))
            })
            .await?;
        Ok(accumulator.finish(subreddit))
    }

    /// Collects every subreddit in `subreddits` to completion.
    pub async fn collect(&self, subreddits: &[String], max_age: Option<u64>) -> Report {
        self.collect_until(subreddits, max_age, future::pending::<()>())
            .await
    }

    /// Collects `subreddits` until done or until `shutdown` resolves.
    ///
    /// On shutdown, in-flight pipelines are dropped and every subreddit
    /// without a result is recorded as [`FailureKind::Cancelled`]. If
    /// authentication fails before any subreddit succeeded, the run stops
    /// and the rest are recorded as [`FailureKind::Skipped`]. Either way the
    /// report is marked aborted.
    pub async fn collect_until<F>(
        &self,
        subreddits: &[String],
        max_age: Option<u64>,
        shutdown: F,
    ) -> Report
    where
        F: Future<Output = ()>,
    {
        let requested = dedup_names(subreddits);
        let report = Report::new(requested.clone(), self.clock.now());
        let span = info_span!("run", run_id = %report.run_id);
        self.drive(report, &requested, max_age, shutdown)
            .instrument(span)
            .await
    }

    async fn drive<F>(
        &self,
        mut report: Report,
        requested: &[String],
        max_age: Option<u64>,
        shutdown: F,
    ) -> Report
    where
        F: Future<Output = ()>,
    {
        info!(
            "Collecting {} subreddit(s) with concurrency {}",
            requested.len(),
            self.concurrency
        );

        let mut results = stream::iter(requested.iter())
            .map(|name| {
                let span = info_span!("subreddit", name = %name);
                async move { (name, self.collect_subreddit(name, max_age).await) }.instrument(span)
            })
            .buffer_unordered(self.concurrency);

        let mut shutdown = pin!(shutdown);
        let mut unsettled_kind = FailureKind::Cancelled;
        let mut any_success = false;

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    warn!("Shutdown requested, cancelling unfinished subreddits");
                    report.aborted = true;
                    break;
                }
                next = results.next() => match next {
                    None => break,
                    Some((name, Ok(stats))) => {
                        info!(
                            "r/{}: {} posts, {} comments, avg age {:.0}s",
                            name, stats.num_posts, stats.num_comments, stats.avg_age_seconds
                        );
                        any_success = true;
                        report.record_success(stats);
                    }
                    Some((name, Err(failure))) => {
                        let kind = failure.kind;
                        debug!("r/{} settled as {}", name, kind);
                        report.record_failure(name.as_str(), failure);

                        if kind == FailureKind::AuthFailure && !any_success {
                            error!("Authentication failed before any subreddit succeeded, aborting run");
                            report.aborted = true;
                            unsettled_kind = FailureKind::Skipped;
                            break;
                        }
                    }
                },
            }
        }
        drop(results);

        report.finish(self.clock.now(), unsettled_kind);
        info!(
            "Collection finished: {} succeeded, {} failed{}",
            report.stats.len(),
            report.failures.len(),
            if report.aborted { " (aborted)" } else { "" }
        );
        report
    }
}

/// Drops repeated names, keeping the first occurrence of each.
fn dedup_names(subreddits: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    subreddits
        .iter()
        .filter(|name| {
            let first = seen.insert(name.as_str());
            if !first {
                warn!("r/{} requested more than once, collecting it once", name);
            }
            first
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_keeps_first_occurrence_order() {
        let names: Vec<String> = ["rust", "golang", "rust", "zig", "golang"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(dedup_names(&names), vec!["rust", "golang", "zig"]);
    }
}
