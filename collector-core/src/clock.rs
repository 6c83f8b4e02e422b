//! All things time-related.

pub use chrono::{DateTime, Utc};

/// Tells time and returns the time.
///
/// Generally you will want to retrieve time using [`SystemClock`],
/// but in tests you may want a [`FrozenClock`] with a fixed time.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Interacts with the system clock to get the current time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FrozenClock {
    now: DateTime<Utc>,
}

impl FrozenClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    /// A frozen clock at the given Unix timestamp, in seconds.
    pub fn at_timestamp(seconds: i64) -> Self {
        Self::new(DateTime::from_timestamp(seconds, 0).unwrap_or_default())
    }
}

impl Clock for FrozenClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

/// Whole seconds elapsed between `created_at` and `now`.
///
/// Negative when `created_at` lies in the future, which happens when the
/// local clock runs behind the API's.
pub fn age_seconds(created_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    now.signed_duration_since(created_at).num_seconds()
}
