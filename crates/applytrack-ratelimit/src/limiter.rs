use std::sync::Arc;

use applytrack_core::{Clock, RateLimitConfig, RateLimitPresets};
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use tracing::{debug, info};

use crate::{
    error::RateLimited,
    types::{Operation, RateLimitDecision, RateLimitEntry, RateLimitInfo},
};

/// Fixed-window request counter keyed by `operation:subject`.
///
/// Each check is atomic per key: the DashMap entry guard is held for the whole
/// read-compare-increment, so two concurrent checks can never both take the
/// last slot. State is in-memory only and starts empty on every process start.
pub struct RateLimiter {
    entries: DashMap<String, RateLimitEntry>,
    presets: RateLimitPresets,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(presets: RateLimitPresets, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            presets,
            clock,
        }
    }

    /// Count one request against `key`.
    ///
    /// A fresh or expired entry restarts the window at `count = 1`. A full
    /// window is reported as `allowed = false` without touching the counter,
    /// so rejected attempts never extend or consume the window.
    pub fn check(&self, key: &str, config: &RateLimitConfig) -> RateLimitDecision {
        let now = self.clock.now();
        if self.presets.cleanup_on_check {
            // Must run before taking the entry guard below: `retain` locks every shard.
            self.purge_expired_at(now);
        }

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                if entry.is_expired(now) {
                    *entry = fresh_entry(now, config);
                    allowed(config, entry)
                } else if entry.count >= config.max_requests {
                    debug!(%key, reset_time = %entry.window_reset_at, "rate limit exceeded");
                    RateLimitDecision {
                        allowed: false,
                        remaining: 0,
                        reset_time: entry.window_reset_at,
                    }
                } else {
                    entry.count += 1;
                    allowed(config, entry)
                }
            }
            Entry::Vacant(slot) => {
                let entry = slot.insert(fresh_entry(now, config));
                allowed(config, &entry)
            }
        }
    }

    /// [`check`](Self::check) with the configured preset for `op`.
    pub fn check_operation(&self, op: Operation, subject: &str) -> RateLimitDecision {
        let config = *self.preset(op);
        self.check(&op.key(subject), &config)
    }

    /// Like [`check`](Self::check), but turns a denial into a [`RateLimited`] error.
    pub fn enforce(
        &self,
        key: &str,
        config: &RateLimitConfig,
    ) -> Result<RateLimitDecision, RateLimited> {
        let decision = self.check(key, config);
        if decision.allowed {
            Ok(decision)
        } else {
            Err(RateLimited::new(key, decision.reset_time, self.clock.now()))
        }
    }

    /// Non-mutating read of `key`'s window. Expired or unknown keys read as default.
    pub fn info(&self, key: &str) -> RateLimitInfo {
        let now = self.clock.now();
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => RateLimitInfo {
                count: entry.count,
                reset_time: Some(entry.window_reset_at),
            },
            _ => RateLimitInfo::default(),
        }
    }

    /// Drop `key`'s window immediately (explicit unlock / admin override).
    pub fn clear(&self, key: &str) {
        if self.entries.remove(key).is_some() {
            info!(%key, "rate limit cleared");
        }
    }

    /// Remove every expired entry; returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(self.clock.now())
    }

    pub fn preset(&self, op: Operation) -> &RateLimitConfig {
        match op {
            Operation::Login => &self.presets.login,
            Operation::Signup => &self.presets.signup,
            Operation::PasswordReset => &self.presets.password_reset,
            Operation::Submission => &self.presets.submission,
        }
    }

    /// Number of tracked keys, expired ones included until the next purge.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!(purged, "expired rate limit entries purged");
        }
        purged
    }
}

fn fresh_entry(now: DateTime<Utc>, config: &RateLimitConfig) -> RateLimitEntry {
    RateLimitEntry {
        count: 1,
        window_reset_at: now
            .checked_add_signed(config.window())
            .unwrap_or(DateTime::<Utc>::MAX_UTC),
    }
}

fn allowed(config: &RateLimitConfig, entry: &RateLimitEntry) -> RateLimitDecision {
    RateLimitDecision {
        allowed: true,
        remaining: config.max_requests.saturating_sub(entry.count),
        reset_time: entry.window_reset_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use applytrack_core::ManualClock;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap()
    }

    fn limiter(clock: &ManualClock) -> RateLimiter {
        RateLimiter::new(RateLimitPresets::default(), Arc::new(clock.clone()))
    }

    const FIVE_PER_MINUTE: RateLimitConfig = RateLimitConfig::new(60_000, 5);

    #[test]
    fn last_slot_allowed_then_denied() {
        let clock = ManualClock::new(start());
        let rl = limiter(&clock);

        for expected_remaining in (0..5).rev() {
            let d = rl.check("login:alice", &FIVE_PER_MINUTE);
            assert!(d.allowed);
            assert_eq!(d.remaining, expected_remaining);
        }

        let denied = rl.check("login:alice", &FIVE_PER_MINUTE);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_time, start() + Duration::minutes(1));
    }

    #[test]
    fn denied_checks_do_not_extend_window() {
        let clock = ManualClock::new(start());
        let rl = limiter(&clock);
        for _ in 0..5 {
            rl.check("k", &FIVE_PER_MINUTE);
        }
        clock.advance(Duration::seconds(30));
        let denied = rl.check("k", &FIVE_PER_MINUTE);
        assert!(!denied.allowed);
        assert_eq!(denied.reset_time, start() + Duration::minutes(1));
        assert_eq!(rl.info("k").count, 5);
    }

    #[test]
    fn window_rolls_over_after_reset() {
        let clock = ManualClock::new(start());
        let rl = limiter(&clock);
        for _ in 0..6 {
            rl.check("k", &FIVE_PER_MINUTE);
        }

        clock.advance(Duration::minutes(1));
        let d = rl.check("k", &FIVE_PER_MINUTE);
        assert!(d.allowed);
        assert_eq!(d.remaining, 4);
        assert_eq!(rl.info("k").count, 1);
        assert_eq!(d.reset_time, start() + Duration::minutes(2));
    }

    #[test]
    fn keys_are_independent() {
        let clock = ManualClock::new(start());
        let rl = limiter(&clock);
        let one = RateLimitConfig::new(60_000, 1);
        assert!(rl.check("login:a", &one).allowed);
        assert!(!rl.check("login:a", &one).allowed);
        assert!(rl.check("login:b", &one).allowed);
    }

    #[test]
    fn info_is_read_only() {
        let clock = ManualClock::new(start());
        let rl = limiter(&clock);
        rl.check("k", &FIVE_PER_MINUTE);
        rl.check("k", &FIVE_PER_MINUTE);

        let first = rl.info("k");
        for _ in 0..10 {
            assert_eq!(rl.info("k"), first);
        }
        assert_eq!(first.count, 2);
        assert_eq!(rl.check("k", &FIVE_PER_MINUTE).remaining, 2);
    }

    #[test]
    fn info_defaults_for_unknown_and_expired() {
        let clock = ManualClock::new(start());
        let rl = limiter(&clock);
        assert_eq!(rl.info("nobody"), RateLimitInfo::default());

        rl.check("k", &FIVE_PER_MINUTE);
        clock.advance(Duration::minutes(1));
        assert_eq!(rl.info("k"), RateLimitInfo::default());
    }

    #[test]
    fn clear_unlocks_immediately() {
        let clock = ManualClock::new(start());
        let rl = limiter(&clock);
        let one = RateLimitConfig::new(60_000, 1);
        rl.check("k", &one);
        assert!(!rl.check("k", &one).allowed);

        rl.clear("k");
        assert!(rl.check("k", &one).allowed);
        rl.clear("never-seen");
    }

    #[test]
    fn expired_entries_are_swept_on_check() {
        let clock = ManualClock::new(start());
        let rl = limiter(&clock);
        rl.check("a", &FIVE_PER_MINUTE);
        rl.check("b", &FIVE_PER_MINUTE);
        assert_eq!(rl.len(), 2);

        clock.advance(Duration::minutes(2));
        rl.check("c", &FIVE_PER_MINUTE);
        assert_eq!(rl.len(), 1);
    }

    #[test]
    fn timer_mode_leaves_cleanup_to_purge() {
        let clock = ManualClock::new(start());
        let presets = RateLimitPresets {
            cleanup_on_check: false,
            ..RateLimitPresets::default()
        };
        let rl = RateLimiter::new(presets, Arc::new(clock.clone()));
        rl.check("a", &FIVE_PER_MINUTE);
        clock.advance(Duration::minutes(2));
        rl.check("b", &FIVE_PER_MINUTE);
        assert_eq!(rl.len(), 2);

        assert_eq!(rl.purge_expired(), 1);
        assert_eq!(rl.len(), 1);
    }

    #[test]
    fn operation_presets_apply() {
        let clock = ManualClock::new(start());
        let rl = limiter(&clock);
        for _ in 0..3 {
            assert!(rl.check_operation(Operation::Signup, "bob@example.com").allowed);
        }
        let denied = rl.check_operation(Operation::Signup, "bob@example.com");
        assert!(!denied.allowed);
        assert_eq!(denied.reset_time, start() + Duration::hours(1));
        // other operations for the same subject are unaffected
        assert!(rl.check_operation(Operation::Login, "bob@example.com").allowed);
    }

    #[test]
    fn enforce_reports_minutes_until_reset() {
        let clock = ManualClock::new(start());
        let rl = limiter(&clock);
        let login = *rl.preset(Operation::Login);
        for _ in 0..5 {
            rl.enforce("login:eve", &login).unwrap();
        }
        clock.advance(Duration::minutes(3));
        let err = rl.enforce("login:eve", &login).unwrap_err();
        assert_eq!(err.retry_after_minutes, 12);
        assert_eq!(err.key, "login:eve");
    }

    #[test]
    fn oversized_window_saturates_instead_of_panicking() {
        let clock = ManualClock::new(start());
        let rl = limiter(&clock);
        let huge = RateLimitConfig::new(10_000_000_000_000_000, 1);

        let first = rl.check("login:alice", &huge);
        assert!(first.allowed);
        assert_eq!(first.reset_time, DateTime::<Utc>::MAX_UTC);
        assert!(!rl.check("login:alice", &huge).allowed);
        assert_eq!(rl.info("login:alice").count, 1);
    }
}
