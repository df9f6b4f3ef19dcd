use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TrackerError {
    /// Short error code string for logs and UI hints.
    pub fn code(&self) -> &'static str {
        match self {
            TrackerError::Config(_) => "CONFIG_ERROR",
            TrackerError::Storage(_) => "STORAGE_ERROR",
            TrackerError::Serialization(_) => "SERIALIZATION_ERROR",
            TrackerError::Io(_) => "IO_ERROR",
            TrackerError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Failures of a [`SnapshotStore`](crate::store::SnapshotStore) adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The stored blob could not be encoded or decoded.
    #[error("Snapshot encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
