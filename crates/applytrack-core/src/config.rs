use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_SECURITY_CAPACITY: usize = 100;
pub const DEFAULT_LOOKBACK_HOURS: i64 = 24;
pub const DEFAULT_MAX_FAILED_LOGINS: usize = 10;
pub const DEFAULT_MAX_DISTINCT_IPS: usize = 5;

const MINUTE_MS: u64 = 60 * 1000;
const HOUR_MS: u64 = 60 * MINUTE_MS;

/// Longest accepted rate-limit window: one year.
pub const MAX_WINDOW_MS: u64 = 366 * 24 * HOUR_MS;
/// Longest accepted suspicious-activity lookback: one year.
pub const MAX_LOOKBACK_HOURS: i64 = 366 * 24;

/// Top-level config (applytrack.toml + APPLYTRACK_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub rate_limits: RateLimitPresets,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub data: DataConfig,
}

/// What to do when the durable job snapshot cannot be written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistencePolicy {
    /// Log and keep going; in-memory state stays authoritative.
    #[default]
    Warn,
    /// Surface the failure to the caller and stop the run loop.
    Fatal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on how long the run loop sleeps between ticks.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Per-execution timeout. Unset means executors may take as long as they like.
    #[serde(default)]
    pub executor_timeout_secs: Option<u64>,
    /// Deactivate a job after this many consecutive failures. Unset retries forever.
    #[serde(default)]
    pub max_consecutive_failures: Option<u32>,
    /// Offset of the wall clock that `time_of_day` recurrences are expressed in.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default)]
    pub persistence: PersistencePolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            executor_timeout_secs: None,
            max_consecutive_failures: None,
            utc_offset_minutes: 0,
            persistence: PersistencePolicy::Warn,
        }
    }
}

/// Fixed-window limit for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub max_requests: u32,
}

impl RateLimitConfig {
    pub const fn new(window_ms: u64, max_requests: u32) -> Self {
        Self {
            window_ms,
            max_requests,
        }
    }

    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.window_ms).unwrap_or(i64::MAX))
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.window_ms == 0 {
            return Err(TrackerError::Config(format!(
                "rate_limits.{name}.window_ms must be positive"
            )));
        }
        if self.window_ms > MAX_WINDOW_MS {
            return Err(TrackerError::Config(format!(
                "rate_limits.{name}.window_ms must be at most {MAX_WINDOW_MS}"
            )));
        }
        if self.max_requests == 0 {
            return Err(TrackerError::Config(format!(
                "rate_limits.{name}.max_requests must be positive"
            )));
        }
        Ok(())
    }
}

/// Per-operation rate-limit presets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitPresets {
    #[serde(default = "default_login_limit")]
    pub login: RateLimitConfig,
    #[serde(default = "default_signup_limit")]
    pub signup: RateLimitConfig,
    #[serde(default = "default_password_reset_limit")]
    pub password_reset: RateLimitConfig,
    #[serde(default = "default_submission_limit")]
    pub submission: RateLimitConfig,
    /// Sweep expired entries on every check. Turn off when a timer does it instead.
    #[serde(default = "bool_true")]
    pub cleanup_on_check: bool,
}

impl Default for RateLimitPresets {
    fn default() -> Self {
        Self {
            login: default_login_limit(),
            signup: default_signup_limit(),
            password_reset: default_password_reset_limit(),
            submission: default_submission_limit(),
            cleanup_on_check: true,
        }
    }
}

/// Capacity and thresholds for the security event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_security_capacity")]
    pub capacity: usize,
    /// How far back `check_suspicious_activity` looks.
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: i64,
    /// Suspicious when failed logins in the lookback window exceed this.
    #[serde(default = "default_max_failed_logins")]
    pub max_failed_logins: usize,
    /// Suspicious when distinct failing IPs in the lookback window exceed this.
    #[serde(default = "default_max_distinct_ips")]
    pub max_distinct_ips: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_SECURITY_CAPACITY,
            lookback_hours: DEFAULT_LOOKBACK_HOURS,
            max_failed_logins: DEFAULT_MAX_FAILED_LOGINS,
            max_distinct_ips: DEFAULT_MAX_DISTINCT_IPS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Where job executors read business records from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataConfig {
    /// JSON export of tracked applications. Unset means an empty data set.
    #[serde(default)]
    pub applications_path: Option<String>,
}

fn bool_true() -> bool {
    true
}
fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_login_limit() -> RateLimitConfig {
    RateLimitConfig::new(15 * MINUTE_MS, 5)
}
fn default_signup_limit() -> RateLimitConfig {
    RateLimitConfig::new(HOUR_MS, 3)
}
fn default_password_reset_limit() -> RateLimitConfig {
    RateLimitConfig::new(HOUR_MS, 3)
}
fn default_submission_limit() -> RateLimitConfig {
    RateLimitConfig::new(5 * MINUTE_MS, 20)
}
fn default_security_capacity() -> usize {
    DEFAULT_SECURITY_CAPACITY
}
fn default_lookback_hours() -> i64 {
    DEFAULT_LOOKBACK_HOURS
}
fn default_max_failed_logins() -> usize {
    DEFAULT_MAX_FAILED_LOGINS
}
fn default_max_distinct_ips() -> usize {
    DEFAULT_MAX_DISTINCT_IPS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.applytrack/applytrack.db", home)
}

impl TrackerConfig {
    /// Load config from a TOML file with APPLYTRACK_* env var overrides.
    ///
    /// Nested keys use a double underscore:
    /// `APPLYTRACK_SCHEDULER__POLL_INTERVAL_SECS=30`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: TrackerConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("APPLYTRACK_").split("__"))
            .extract()
            .map_err(|e| TrackerError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a component misbehave silently.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.poll_interval_secs == 0 {
            return Err(TrackerError::Config(
                "scheduler.poll_interval_secs must be positive".to_string(),
            ));
        }
        if self.scheduler.executor_timeout_secs == Some(0) {
            return Err(TrackerError::Config(
                "scheduler.executor_timeout_secs must be positive when set".to_string(),
            ));
        }
        if self.scheduler.max_consecutive_failures == Some(0) {
            return Err(TrackerError::Config(
                "scheduler.max_consecutive_failures must be positive when set".to_string(),
            ));
        }
        if self.scheduler.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(TrackerError::Config(
                "scheduler.utc_offset_minutes must be within one day".to_string(),
            ));
        }

        self.rate_limits.login.validate("login")?;
        self.rate_limits.signup.validate("signup")?;
        self.rate_limits.password_reset.validate("password_reset")?;
        self.rate_limits.submission.validate("submission")?;

        if self.security.capacity == 0 {
            return Err(TrackerError::Config(
                "security.capacity must be positive".to_string(),
            ));
        }
        if self.security.lookback_hours <= 0 {
            return Err(TrackerError::Config(
                "security.lookback_hours must be positive".to_string(),
            ));
        }
        if self.security.lookback_hours > MAX_LOOKBACK_HOURS {
            return Err(TrackerError::Config(format!(
                "security.lookback_hours must be at most {MAX_LOOKBACK_HOURS}"
            )));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.applytrack/applytrack.toml", home)
}
