//! Per-subreddit collection pipelines: fetch, filter, aggregate, and the
//! collector that runs them and assembles the report.

pub mod aggregate;
pub mod collector;
pub mod fetcher;
pub mod filter;

pub use aggregate::{aggregate, try_aggregate, StatsAccumulator};
pub use collector::Collector;
pub use fetcher::fetch;
pub use filter::passes;
