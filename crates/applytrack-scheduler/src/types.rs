use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Closed set of background job types. Each has exactly one executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    EmailReminder,
    WeeklyDigest,
    Cleanup,
    SecurityCheck,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobKind::EmailReminder => "email_reminder",
            JobKind::WeeklyDigest => "weekly_digest",
            JobKind::Cleanup => "cleanup",
            JobKind::SecurityCheck => "security_check",
        };
        write!(f, "{s}")
    }
}

/// How far apart consecutive runs of a recurring job are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    Daily,
    Weekly,
    /// Same day-of-month, clamped to the last day of shorter months.
    Monthly,
}

impl FromStr for Interval {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Interval::Daily),
            "weekly" => Ok(Interval::Weekly),
            "monthly" => Ok(Interval::Monthly),
            other => Err(SchedulerError::InvalidRecurrence(format!(
                "unsupported interval: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl From<Weekday> for DayOfWeek {
    fn from(day: Weekday) -> Self {
        match day {
            Weekday::Sun => DayOfWeek::Sunday,
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
        }
    }
}

/// Wall-clock `HH:MM`, serialised as that string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Result<Self, SchedulerError> {
        if hour > 23 || minute > 59 {
            return Err(SchedulerError::InvalidRecurrence(format!(
                "time of day out of range: {hour}:{minute:02}"
            )));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u32 {
        u32::from(self.hour)
    }

    pub fn minute(&self) -> u32 {
        u32::from(self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || {
            SchedulerError::InvalidRecurrence(format!("time of day must be HH:MM, got {s:?}"))
        };
        let (h, m) = s.split_once(':').ok_or_else(bad)?;
        let digits = |part: &str, max_len: usize| {
            !part.is_empty() && part.len() <= max_len && part.bytes().all(|b| b.is_ascii_digit())
        };
        if !digits(h, 2) || !digits(m, 2) || m.len() != 2 {
            return Err(bad());
        }
        let hour = h.parse().map_err(|_| bad())?;
        let minute = m.parse().map_err(|_| bad())?;
        TimeOfDay::new(hour, minute)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = SchedulerError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Recurrence rule of a repeating job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    pub interval: Interval,
    /// Runs only land on these weekdays; other dates roll forward.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_of_week: Option<BTreeSet<DayOfWeek>>,
    /// Overrides the time of each computed run, in the scheduler's wall clock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_of_day: Option<TimeOfDay>,
}

impl Recurrence {
    pub fn new(interval: Interval) -> Self {
        Self {
            interval,
            days_of_week: None,
            time_of_day: None,
        }
    }

    pub fn at(mut self, time_of_day: TimeOfDay) -> Self {
        self.time_of_day = Some(time_of_day);
        self
    }

    pub fn on(mut self, days: impl IntoIterator<Item = DayOfWeek>) -> Self {
        self.days_of_week = Some(days.into_iter().collect());
        self
    }

    /// Build a rule from its loose string form, failing on anything unsupported.
    pub fn parse(
        interval: &str,
        days_of_week: Option<&[DayOfWeek]>,
        time_of_day: Option<&str>,
    ) -> Result<Self, SchedulerError> {
        let rule = Self {
            interval: interval.parse()?,
            days_of_week: days_of_week.map(|d| d.iter().copied().collect()),
            time_of_day: time_of_day.map(str::parse::<TimeOfDay>).transpose()?,
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.days_of_week.as_ref().is_some_and(BTreeSet::is_empty) {
            return Err(SchedulerError::InvalidRecurrence(
                "days_of_week must not be empty when present".to_string(),
            ));
        }
        Ok(())
    }
}

/// A job as held by the scheduler and written to the `scheduled_jobs` snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    /// UUID v4 string assigned at scheduling time.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: JobKind,
    /// Opaque payload read only by the executor for `kind`.
    #[serde(default)]
    pub data: serde_json::Value,
    pub scheduled_for: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurring: Option<Recurrence>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    /// Authoritative for the due check.
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
    pub active: bool,
    #[serde(default)]
    pub consecutive_failures: u32,
    pub created_at: DateTime<Utc>,
}

impl ScheduledJob {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active && self.next_run.is_some_and(|at| at <= now)
    }
}

/// Caller-supplied part of a job; the scheduler fills in the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    #[serde(rename = "type")]
    pub kind: JobKind,
    #[serde(default)]
    pub data: serde_json::Value,
    pub scheduled_for: DateTime<Utc>,
    #[serde(default)]
    pub recurring: Option<Recurrence>,
}

impl NewJob {
    pub fn once(kind: JobKind, data: serde_json::Value, at: DateTime<Utc>) -> Self {
        Self {
            kind,
            data,
            scheduled_for: at,
            recurring: None,
        }
    }

    pub fn recurring(
        kind: JobKind,
        data: serde_json::Value,
        first: DateTime<Utc>,
        rule: Recurrence,
    ) -> Self {
        Self {
            kind,
            data,
            scheduled_for: first,
            recurring: Some(rule),
        }
    }

    /// Parse a job request from loose JSON (e.g. a form or API body).
    ///
    /// Unknown job types and malformed recurrences are rejected here rather
    /// than defaulted.
    pub fn from_json(value: serde_json::Value) -> Result<Self, SchedulerError> {
        let job: NewJob =
            serde_json::from_value(value).map_err(|e| SchedulerError::InvalidJob(e.to_string()))?;
        if let Some(rule) = &job.recurring {
            rule.validate()?;
        }
        Ok(job)
    }
}

/// What one poll tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Jobs dispatched to their executor.
    pub executed: usize,
    /// Recurring jobs that succeeded and got a new `next_run`.
    pub rescheduled: usize,
    /// One-shot jobs that succeeded and were dropped.
    pub removed: usize,
    /// Executions that failed or timed out.
    pub failed: usize,
    /// Jobs switched off after too many consecutive failures.
    pub deactivated: usize,
}
