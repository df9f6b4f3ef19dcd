use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counter for one `operation:subject` key inside its active window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitEntry {
    pub count: u32,
    pub window_reset_at: DateTime<Utc>,
}

impl RateLimitEntry {
    /// Expired entries are replaced, never incremented.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.window_reset_at <= now
    }
}

/// Outcome of [`RateLimiter::check`](crate::RateLimiter::check).
///
/// A denied request is a normal value, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_time: DateTime<Utc>,
}

/// Read-only view of a key's state, for UI hints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    /// Requests counted in the active window; 0 when there is none.
    pub count: u32,
    /// End of the active window, if any.
    pub reset_time: Option<DateTime<Utc>>,
}

/// Sensitive actions gated by a preset limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Login,
    Signup,
    PasswordReset,
    Submission,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Login => "login",
            Operation::Signup => "signup",
            Operation::PasswordReset => "password_reset",
            Operation::Submission => "submission",
        }
    }

    /// Limiter key for `subject`, e.g. `login:alice@example.com`.
    pub fn key(&self, subject: &str) -> String {
        format!("{}:{}", self.as_str(), subject)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_keys() {
        assert_eq!(Operation::Login.key("alice@example.com"), "login:alice@example.com");
        assert_eq!(Operation::PasswordReset.key("u1"), "password_reset:u1");
    }
}
