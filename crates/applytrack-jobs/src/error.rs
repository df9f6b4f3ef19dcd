use applytrack_core::StoreError;
use applytrack_scheduler::ExecutionError;
use thiserror::Error;

/// Failures of a [`DataAccess`](crate::ports::DataAccess) backend.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Data source unavailable: {0}")]
    Unavailable(String),
}

impl From<DataError> for ExecutionError {
    fn from(e: DataError) -> Self {
        ExecutionError::DataAccess(e.to_string())
    }
}
