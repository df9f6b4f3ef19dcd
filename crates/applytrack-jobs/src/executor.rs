use std::sync::Arc;

use applytrack_core::Clock;
use applytrack_scheduler::{ExecutionError, JobExecutor, JobKind, ScheduledJob};
use applytrack_security::{NewSecurityEvent, SecurityEventKind, SecurityEventLog};
use async_trait::async_trait;
use chrono::Duration;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::payload::{
    self, CleanupPayload, DigestPayload, ReminderPayload, SecurityCheckPayload,
};
use crate::ports::{DataAccess, Notifier, TemplateKind};

const DIGEST_PERIOD_DAYS: i64 = 7;

/// Executes the four built-in job types against the notifier and data ports.
pub struct TrackerExecutor {
    notifier: Arc<dyn Notifier>,
    data: Arc<dyn DataAccess>,
    security: Arc<SecurityEventLog>,
    clock: Arc<dyn Clock>,
}

impl TrackerExecutor {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        data: Arc<dyn DataAccess>,
        security: Arc<SecurityEventLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            notifier,
            data,
            security,
            clock,
        }
    }

    async fn deliver(
        &self,
        to: &str,
        subject: &str,
        template: TemplateKind,
        data: &serde_json::Value,
    ) -> Result<(), ExecutionError> {
        if self.notifier.send(to, subject, template, data).await {
            Ok(())
        } else {
            Err(ExecutionError::NotificationFailed { to: to.to_string() })
        }
    }

    async fn email_reminder(&self, job: &ScheduledJob) -> Result<(), ExecutionError> {
        let p: ReminderPayload = payload::parse(job.kind, &job.data)?;
        payload::require(job.kind, "to", &p.to)?;
        payload::require(job.kind, "user_id", &p.user_id)?;

        let older_than = self.clock.now() - Duration::days(i64::from(p.older_than_days));
        let stale = self
            .data
            .stale_applications(&p.user_id, older_than, &p.statuses)
            .await?;
        if stale.is_empty() {
            debug!(job_id = %job.id, user_id = %p.user_id, "no applications need a follow-up");
            return Ok(());
        }

        let subject = match stale.len() {
            1 => "1 application is waiting on a follow-up".to_string(),
            n => format!("{n} applications are waiting on a follow-up"),
        };
        let data = json!({
            "user_id": p.user_id,
            "older_than_days": p.older_than_days,
            "applications": stale,
        });
        self.deliver(&p.to, &subject, TemplateKind::FollowUpReminder, &data)
            .await?;
        info!(job_id = %job.id, count = stale.len(), "follow-up reminder sent");
        Ok(())
    }

    async fn weekly_digest(&self, job: &ScheduledJob) -> Result<(), ExecutionError> {
        let p: DigestPayload = payload::parse(job.kind, &job.data)?;
        payload::require(job.kind, "to", &p.to)?;
        payload::require(job.kind, "user_id", &p.user_id)?;

        let since = self.clock.now() - Duration::days(DIGEST_PERIOD_DAYS);
        let digest = self.data.digest(&p.user_id, since).await?;
        let data = json!({
            "user_id": p.user_id,
            "since": since,
            "digest": digest,
        });
        self.deliver(
            &p.to,
            "Your weekly application digest",
            TemplateKind::WeeklyDigest,
            &data,
        )
        .await?;
        info!(job_id = %job.id, submitted = digest.submitted, "weekly digest sent");
        Ok(())
    }

    async fn cleanup(&self, job: &ScheduledJob) -> Result<(), ExecutionError> {
        let p: CleanupPayload = payload::parse(job.kind, &job.data)?;
        if p.retention_days == 0 {
            return Err(ExecutionError::InvalidPayload(
                "cleanup: `retention_days` must be positive".to_string(),
            ));
        }

        let cutoff = self.clock.now() - Duration::days(i64::from(p.retention_days));
        let purged = self.data.purge_older_than(cutoff).await?;
        info!(job_id = %job.id, purged, %cutoff, "cleanup finished");
        Ok(())
    }

    async fn security_check(&self, job: &ScheduledJob) -> Result<(), ExecutionError> {
        let p: SecurityCheckPayload = payload::parse(job.kind, &job.data)?;
        payload::require(job.kind, "to", &p.to)?;
        payload::require(job.kind, "user_id", &p.user_id)?;

        let report = self.security.check_suspicious_activity(&p.user_id);
        if !report.suspicious {
            debug!(job_id = %job.id, user_id = %p.user_id, "no suspicious activity");
            return Ok(());
        }

        let reason = report.reason.clone().unwrap_or_default();
        warn!(job_id = %job.id, user_id = %p.user_id, %reason, "suspicious activity detected");
        self.security.log(
            NewSecurityEvent::new(SecurityEventKind::SuspiciousActivity)
                .user(p.user_id.clone())
                .meta("reason", reason)
                .meta("job_id", job.id.clone()),
        );

        let data = json!({
            "user_id": p.user_id,
            "reason": report.reason,
            "recommendation": report.recommendation,
        });
        self.deliver(
            &p.to,
            "Unusual sign-in activity on your account",
            TemplateKind::SecurityAlert,
            &data,
        )
        .await
    }
}

#[async_trait]
impl JobExecutor for TrackerExecutor {
    async fn execute(&self, job: &ScheduledJob) -> Result<(), ExecutionError> {
        match job.kind {
            JobKind::EmailReminder => self.email_reminder(job).await,
            JobKind::WeeklyDigest => self.weekly_digest(job).await,
            JobKind::Cleanup => self.cleanup(job).await,
            JobKind::SecurityCheck => self.security_check(job).await,
        }
    }
}
