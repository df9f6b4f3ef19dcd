use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DataError;

/// Which template the notifier should render. The executors never see
/// template content, only this key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    FollowUpReminder,
    WeeklyDigest,
    SecurityAlert,
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TemplateKind::FollowUpReminder => "follow_up_reminder",
            TemplateKind::WeeklyDigest => "weekly_digest",
            TemplateKind::SecurityAlert => "security_alert",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Applied,
    Interview,
    Offer,
    Rejected,
    Withdrawn,
}

impl ApplicationStatus {
    /// No further follow-up is expected.
    pub fn is_closed(self) -> bool {
        matches!(self, ApplicationStatus::Rejected | ApplicationStatus::Withdrawn)
    }
}

/// The slice of a job application record the executors read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub user_id: String,
    pub company: String,
    pub position: String,
    pub status: ApplicationStatus,
    pub applied_at: DateTime<Utc>,
    /// Last status change or note; staleness is measured from here.
    pub updated_at: DateTime<Utc>,
}

/// Activity summary for one user since a point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Digest {
    /// Applications submitted in the period.
    pub submitted: usize,
    /// Applications whose status changed in the period, by their new status.
    pub status_changes: BTreeMap<ApplicationStatus, usize>,
    /// Applications that are still open, whenever they were submitted.
    pub open: usize,
}

impl Digest {
    pub fn is_empty(&self) -> bool {
        self.submitted == 0 && self.status_changes.is_empty()
    }
}

/// Delivers a notification. `false` means it was not delivered.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        template: TemplateKind,
        data: &serde_json::Value,
    ) -> bool;
}

/// Read/purge access to the business records the jobs work on.
#[async_trait]
pub trait DataAccess: Send + Sync {
    /// `user_id`'s applications in one of `statuses` not updated since `older_than`.
    async fn stale_applications(
        &self,
        user_id: &str,
        older_than: DateTime<Utc>,
        statuses: &[ApplicationStatus],
    ) -> Result<Vec<Application>, DataError>;

    async fn digest(&self, user_id: &str, since: DateTime<Utc>) -> Result<Digest, DataError>;

    /// Delete records last touched before `cutoff`. Returns how many went.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, DataError>;
}
