//! `applytrack-core`: configuration, errors and the ports shared by the
//! throttling, security and scheduling crates.

pub mod clock;
pub mod config;
pub mod error;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    PersistencePolicy, RateLimitConfig, RateLimitPresets, SchedulerConfig, SecurityConfig,
    TrackerConfig,
};
pub use error::{Result, StoreError, TrackerError};
pub use store::{JsonFileStore, MemoryStore, SnapshotStore, SqliteStore};
