//! `applytrack-scheduler`: single-process scheduler for recurring background jobs.
//!
//! # Overview
//!
//! [`JobScheduler`] keeps the job set in memory, snapshots it to a
//! [`SnapshotStore`](applytrack_core::SnapshotStore) after every change and
//! runs due jobs through a [`JobExecutor`]. The run loop sleeps until the
//! earliest `next_run` (capped by the poll interval) instead of polling blindly.
//!
//! Each job moves through `Scheduled -> Due -> Executing` and then either back
//! to `Scheduled` with a new `next_run` (recurring), out of the set (one-shot),
//! or, after a failure, back to `Scheduled` with `next_run` untouched.
//!
//! # Recurrence
//!
//! | Interval  | Step                                                  |
//! |-----------|-------------------------------------------------------|
//! | `daily`   | +1 day                                                |
//! | `weekly`  | +7 days                                               |
//! | `monthly` | +1 month, clamped to the last day of shorter months  |
//!
//! `time_of_day` then pins the wall-clock time and `days_of_week` rolls the
//! date forward to the next allowed weekday.

pub mod engine;
pub mod error;
pub mod executor;
pub mod schedule;
pub mod types;

pub use engine::{JobScheduler, JobStore};
pub use error::{ExecutionError, Result, SchedulerError};
pub use executor::JobExecutor;
pub use schedule::{calculate_next_run, first_run};
pub use types::{
    DayOfWeek, Interval, JobKind, NewJob, Recurrence, ScheduledJob, TickReport, TimeOfDay,
};
