use async_trait::async_trait;

use crate::error::ExecutionError;
use crate::types::ScheduledJob;

/// Runs one job. Implementations dispatch on [`ScheduledJob::kind`] and are
/// the only code that interprets [`ScheduledJob::data`].
///
/// A returned error is logged by the engine and the job is retried on a later
/// tick; it never stops the scheduler.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &ScheduledJob) -> Result<(), ExecutionError>;
}
