use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Authentication and account-security events worth remembering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    LoginAttempt,
    LoginSuccess,
    LoginFailure,
    PasswordReset,
    TwoFactorSetup,
    SuspiciousActivity,
}

impl std::fmt::Display for SecurityEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SecurityEventKind::LoginAttempt => "login_attempt",
            SecurityEventKind::LoginSuccess => "login_success",
            SecurityEventKind::LoginFailure => "login_failure",
            SecurityEventKind::PasswordReset => "password_reset",
            SecurityEventKind::TwoFactorSetup => "two_factor_setup",
            SecurityEventKind::SuspiciousActivity => "suspicious_activity",
        };
        write!(f, "{s}")
    }
}

/// A logged event. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// UUID v4 string assigned by the log.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SecurityEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// Caller-supplied part of an event; the log adds `id` and `timestamp`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSecurityEvent {
    pub kind: SecurityEventKind,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub metadata: Map<String, Value>,
}

impl NewSecurityEvent {
    /// `success` defaults to whether the kind itself denotes a success.
    pub fn new(kind: SecurityEventKind) -> Self {
        let success = !matches!(
            kind,
            SecurityEventKind::LoginFailure | SecurityEventKind::SuspiciousActivity
        );
        Self {
            kind,
            user_id: None,
            ip_address: None,
            user_agent: None,
            success,
            metadata: Map::new(),
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn ip(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Verdict of the suspicious-activity heuristic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspicionReport {
    pub suspicious: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

impl SuspicionReport {
    pub fn clear() -> Self {
        Self::default()
    }

    pub fn flagged(reason: &str, recommendation: &str) -> Self {
        Self {
            suspicious: true,
            reason: Some(reason.to_string()),
            recommendation: Some(recommendation.to_string()),
        }
    }
}
