//! Typed views of `ScheduledJob::data` for each job type.

use applytrack_scheduler::{ExecutionError, JobKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ports::ApplicationStatus;

pub const DEFAULT_REMINDER_AGE_DAYS: u32 = 7;
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderPayload {
    pub to: String,
    pub user_id: String,
    #[serde(default = "default_reminder_age_days")]
    pub older_than_days: u32,
    #[serde(default = "default_reminder_statuses")]
    pub statuses: Vec<ApplicationStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestPayload {
    pub to: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupPayload {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityCheckPayload {
    pub to: String,
    pub user_id: String,
}

/// Decode `data` for a job of `kind`, rejecting anything malformed.
/// A job scheduled without data reads as an empty object.
pub(crate) fn parse<T: DeserializeOwned>(
    kind: JobKind,
    data: &serde_json::Value,
) -> Result<T, ExecutionError> {
    let empty = serde_json::Value::Object(serde_json::Map::new());
    let data = if data.is_null() { &empty } else { data };
    T::deserialize(data).map_err(|e| ExecutionError::InvalidPayload(format!("{kind}: {e}")))
}

pub(crate) fn require(kind: JobKind, field: &str, value: &str) -> Result<(), ExecutionError> {
    if value.trim().is_empty() {
        return Err(ExecutionError::InvalidPayload(format!(
            "{kind}: `{field}` must not be empty"
        )));
    }
    Ok(())
}

fn default_reminder_age_days() -> u32 {
    DEFAULT_REMINDER_AGE_DAYS
}
fn default_reminder_statuses() -> Vec<ApplicationStatus> {
    vec![ApplicationStatus::Applied, ApplicationStatus::Interview]
}
fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}
