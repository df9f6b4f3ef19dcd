//! `applytrack-jobs`: the executors behind each scheduled job type.
//!
//! The scheduler only knows job identity and timing. This crate turns a due
//! job into data lookups through [`DataAccess`] and a notification through
//! [`Notifier`]; template rendering and transport belong to the notifier.
//!
//! | Job type         | Reads                          | Sends                |
//! |------------------|--------------------------------|----------------------|
//! | `email_reminder` | stale open applications        | `follow_up_reminder` |
//! | `weekly_digest`  | last 7 days of activity        | `weekly_digest`      |
//! | `cleanup`        | purges closed, expired records | nothing              |
//! | `security_check` | security event log             | `security_alert`     |

pub mod data;
pub mod error;
pub mod executor;
pub mod notifier;
pub mod payload;
pub mod ports;

pub use data::JsonFileData;
pub use error::DataError;
pub use executor::TrackerExecutor;
pub use notifier::LogNotifier;
pub use payload::{CleanupPayload, DigestPayload, ReminderPayload, SecurityCheckPayload};
pub use ports::{Application, ApplicationStatus, DataAccess, Digest, Notifier, TemplateKind};
