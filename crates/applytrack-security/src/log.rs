use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use applytrack_core::{Clock, SecurityConfig, SnapshotStore};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::types::{NewSecurityEvent, SecurityEvent, SecurityEventKind, SuspicionReport};

pub const REASON_FAILED_LOGINS: &str = "multiple failed login attempts";
pub const RECOMMEND_FAILED_LOGINS: &str = "enable 2FA or change password";
pub const REASON_MANY_IPS: &str = "login attempts from multiple IP addresses";
pub const RECOMMEND_MANY_IPS: &str = "review recent account activity";

pub type EventStore = Arc<dyn SnapshotStore<Vec<SecurityEvent>>>;

/// Append-only, bounded log of security events (oldest evicted first).
///
/// Logging never fails from the caller's point of view: a snapshot write error
/// is reported with `warn!` and the in-memory log keeps the event.
pub struct SecurityEventLog {
    events: Mutex<VecDeque<SecurityEvent>>,
    config: SecurityConfig,
    clock: Arc<dyn Clock>,
    store: Option<EventStore>,
}

impl SecurityEventLog {
    /// In-memory log with no persistence.
    pub fn new(config: SecurityConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(config.capacity)),
            config,
            clock,
            store: None,
        }
    }

    /// Log backed by `store`, seeded with whatever it last saved.
    ///
    /// An unreadable snapshot is logged and the log starts empty.
    pub fn restore(config: SecurityConfig, clock: Arc<dyn Clock>, store: EventStore) -> Self {
        let mut events: VecDeque<SecurityEvent> = match store.load() {
            Ok(Some(saved)) => saved.into(),
            Ok(None) => VecDeque::new(),
            Err(e) => {
                warn!(error = %e, "security event snapshot unreadable, starting empty");
                VecDeque::new()
            }
        };
        while events.len() > config.capacity {
            events.pop_front();
        }
        info!(count = events.len(), "security event log restored");
        Self {
            events: Mutex::new(events),
            config,
            clock,
            store: Some(store),
        }
    }

    /// Append `event`, stamping it with a fresh id and the current time.
    pub fn log(&self, event: NewSecurityEvent) -> SecurityEvent {
        let stored = SecurityEvent {
            id: Uuid::new_v4().to_string(),
            kind: event.kind,
            user_id: event.user_id,
            ip_address: event.ip_address,
            user_agent: event.user_agent,
            success: event.success,
            metadata: event.metadata,
            timestamp: self.clock.now(),
        };

        // The snapshot is written under the lock so concurrent loggers cannot
        // overwrite a newer snapshot with an older one.
        let mut events = self.lock();
        events.push_back(stored.clone());
        while events.len() > self.config.capacity {
            events.pop_front();
        }

        debug!(
            event_id = %stored.id,
            kind = %stored.kind,
            user_id = stored.user_id.as_deref().unwrap_or("-"),
            success = stored.success,
            "security event logged"
        );

        if let Some(store) = &self.store {
            let snapshot: Vec<SecurityEvent> = events.iter().cloned().collect();
            if let Err(e) = store.save(&snapshot) {
                warn!(event_id = %stored.id, error = %e, "failed to persist security event log");
            }
        }
        drop(events);
        stored
    }

    /// Look for brute-force patterns against `user_id` in the lookback window.
    ///
    /// Too many failures wins over too many source IPs; both counts only
    /// consider `login_failure` events.
    pub fn check_suspicious_activity(&self, user_id: &str) -> SuspicionReport {
        let since = Duration::try_hours(self.config.lookback_hours)
            .and_then(|lookback| self.clock.now().checked_sub_signed(lookback))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let events = self.lock();

        let failures: Vec<&SecurityEvent> = events
            .iter()
            .filter(|e| {
                e.kind == SecurityEventKind::LoginFailure
                    && e.user_id.as_deref() == Some(user_id)
                    && e.timestamp >= since
            })
            .collect();

        if failures.len() > self.config.max_failed_logins {
            return SuspicionReport::flagged(REASON_FAILED_LOGINS, RECOMMEND_FAILED_LOGINS);
        }

        let distinct_ips: HashSet<&str> = failures
            .iter()
            .filter_map(|e| e.ip_address.as_deref())
            .collect();
        if distinct_ips.len() > self.config.max_distinct_ips {
            return SuspicionReport::flagged(REASON_MANY_IPS, RECOMMEND_MANY_IPS);
        }

        SuspicionReport::clear()
    }

    /// Every retained event, oldest first.
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.lock().iter().cloned().collect()
    }

    /// Up to `limit` of `user_id`'s events, newest first.
    pub fn recent_for_user(&self, user_id: &str, limit: usize) -> Vec<SecurityEvent> {
        self.lock()
            .iter()
            .rev()
            .filter(|e| e.user_id.as_deref() == Some(user_id))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<SecurityEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
