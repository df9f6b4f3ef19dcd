//! `applytrack-ratelimit`: fixed-window throttling for sensitive actions.
//!
//! Call sites (login, signup, password reset, submissions) either check a key
//! directly with [`RateLimiter::check`] and translate `allowed = false` into a
//! user-facing error themselves, or wrap the action with [`guard::throttled`].
//!
//! | Operation        | Default limit     |
//! |------------------|-------------------|
//! | `login`          | 5 per 15 minutes  |
//! | `signup`         | 3 per hour        |
//! | `password_reset` | 3 per hour        |
//! | `submission`     | 20 per 5 minutes  |

pub mod error;
pub mod guard;
pub mod limiter;
pub mod types;

pub use error::{GuardError, RateLimited};
pub use guard::{throttled, throttled_operation};
pub use limiter::RateLimiter;
pub use types::{Operation, RateLimitDecision, RateLimitEntry, RateLimitInfo};
