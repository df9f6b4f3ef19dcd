//! `applytrack-security`: bounded security event log and a brute-force heuristic.
//!
//! Auth handlers call [`SecurityEventLog::log`] once the outcome of an action
//! is known. Nothing here can make that action fail.

pub mod log;
pub mod types;

pub use log::{EventStore, SecurityEventLog};
pub use types::{NewSecurityEvent, SecurityEvent, SecurityEventKind, SuspicionReport};
