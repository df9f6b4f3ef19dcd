//! Wrap a unit of work with a rate-limit check.

use std::future::Future;

use applytrack_core::RateLimitConfig;

use crate::{error::GuardError, limiter::RateLimiter, types::Operation};

/// Run `work` only if `key` still has room under `config`.
///
/// The check counts against the window whether or not `work` later fails.
pub async fn throttled<T, E, F, Fut>(
    limiter: &RateLimiter,
    key: &str,
    config: &RateLimitConfig,
    work: F,
) -> Result<T, GuardError<E>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    limiter.enforce(key, config)?;
    work().await.map_err(GuardError::Inner)
}

/// [`throttled`] using the limiter's preset for `op`.
pub async fn throttled_operation<T, E, F, Fut>(
    limiter: &RateLimiter,
    op: Operation,
    subject: &str,
    work: F,
) -> Result<T, GuardError<E>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let config = *limiter.preset(op);
    throttled(limiter, &op.key(subject), &config, work).await
}
