use chrono::{DateTime, Utc};
use thiserror::Error;

/// A throttled request, ready to show to a user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Too many attempts. Please try again in {retry_after_minutes} minute(s).")]
pub struct RateLimited {
    pub key: String,
    pub reset_time: DateTime<Utc>,
    /// Whole minutes until the window resets, rounded up, at least 1.
    pub retry_after_minutes: i64,
}

impl RateLimited {
    pub fn new(key: impl Into<String>, reset_time: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let remaining_ms = (reset_time - now).num_milliseconds().max(0);
        let retry_after_minutes = ((remaining_ms + 59_999) / 60_000).max(1);
        Self {
            key: key.into(),
            reset_time,
            retry_after_minutes,
        }
    }
}

/// Error from a unit of work wrapped by [`throttled`](crate::guard::throttled).
#[derive(Debug, Error)]
pub enum GuardError<E> {
    /// The limit was exhausted; the work never ran.
    #[error(transparent)]
    Throttled(#[from] RateLimited),

    /// The work ran and failed on its own.
    #[error("{0}")]
    Inner(E),
}
