use applytrack_core::StoreError;
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The job snapshot could not be read or written (fatal persistence policy only).
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// The provided recurrence rule is invalid or unsupported.
    #[error("Invalid recurrence: {0}")]
    InvalidRecurrence(String),

    /// The job request itself could not be understood.
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// Scheduler settings that cannot be honoured.
    #[error("Invalid scheduler configuration: {0}")]
    InvalidConfig(String),
}

/// Why a single job execution failed. Never fatal to the scheduler.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// `job.data` does not match what the executor for its type expects.
    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    /// A read or write through the data-access collaborator failed.
    #[error("Data access failed: {0}")]
    DataAccess(String),

    /// The notifier reported that delivery did not happen.
    #[error("Notification to {to} was not delivered")]
    NotificationFailed { to: String },

    /// The executor exceeded the configured timeout.
    #[error("Execution timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The executor task panicked or was aborted.
    #[error("Executor aborted: {0}")]
    Aborted(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
