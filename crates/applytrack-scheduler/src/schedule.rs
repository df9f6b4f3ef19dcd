use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, FixedOffset, Months, NaiveDateTime, TimeZone, Utc};

use crate::types::{DayOfWeek, Interval, Recurrence, TimeOfDay};

/// Guard against rules that could never move past `base` (only reachable on overflow).
const MAX_STEPS: usize = 4;

/// Compute the run after `base` for `rule`, in the wall clock given by `tz`.
///
/// Steps the local date by the interval, overwrites the time when
/// `time_of_day` is set (seconds zeroed), then rolls forward to the first
/// allowed weekday. The result is always strictly after `base`.
///
/// Returns `None` only when the arithmetic overflows chrono's range.
pub fn calculate_next_run(
    base: DateTime<Utc>,
    rule: &Recurrence,
    tz: &FixedOffset,
) -> Option<DateTime<Utc>> {
    let mut local = base.with_timezone(tz).naive_local();
    for _ in 0..MAX_STEPS {
        local = step(local, rule.interval)?;
        if let Some(t) = rule.time_of_day {
            local = with_time(local, t)?;
        }
        if let Some(days) = &rule.days_of_week {
            local = roll_to_weekday(local, days)?;
        }
        let next = to_utc(local, tz)?;
        if next > base {
            return Some(next);
        }
    }
    None
}

/// First eligible run of a newly scheduled recurring job.
///
/// Unlike [`calculate_next_run`] this does not skip an interval: the job may
/// run on `scheduled_for` itself. `time_of_day` is applied on the same local
/// day, moving to the next day only if that would fall before
/// `scheduled_for`; weekdays then roll forward, never backward.
pub fn first_run(
    scheduled_for: DateTime<Utc>,
    rule: &Recurrence,
    tz: &FixedOffset,
) -> Option<DateTime<Utc>> {
    let mut local = scheduled_for.with_timezone(tz).naive_local();
    if let Some(t) = rule.time_of_day {
        let candidate = with_time(local, t)?;
        local = if candidate < local {
            candidate.checked_add_signed(Duration::days(1))?
        } else {
            candidate
        };
    }
    if let Some(days) = &rule.days_of_week {
        local = roll_to_weekday(local, days)?;
    }
    to_utc(local, tz)
}

fn step(local: NaiveDateTime, interval: Interval) -> Option<NaiveDateTime> {
    match interval {
        Interval::Daily => local.checked_add_signed(Duration::days(1)),
        Interval::Weekly => local.checked_add_signed(Duration::days(7)),
        // chrono clamps to the last day of the target month (Jan 31 -> Feb 29).
        Interval::Monthly => local.checked_add_months(Months::new(1)),
    }
}

fn with_time(local: NaiveDateTime, t: TimeOfDay) -> Option<NaiveDateTime> {
    local.date().and_hms_opt(t.hour(), t.minute(), 0)
}

fn roll_to_weekday(mut local: NaiveDateTime, days: &BTreeSet<DayOfWeek>) -> Option<NaiveDateTime> {
    for _ in 0..7 {
        if days.contains(&DayOfWeek::from(local.weekday())) {
            return Some(local);
        }
        local = local.checked_add_signed(Duration::days(1))?;
    }
    None
}

fn to_utc(local: NaiveDateTime, tz: &FixedOffset) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&local)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn tod(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    #[test]
    fn daily_at_nine_lands_next_day_at_nine() {
        let rule = Recurrence::new(Interval::Daily).at(tod("09:00"));
        let next = calculate_next_run(at("2024-03-04T09:00:00Z"), &rule, &utc());
        assert_eq!(next, Some(at("2024-03-05T09:00:00Z")));
    }

    #[test]
    fn daily_without_time_keeps_base_time() {
        let rule = Recurrence::new(Interval::Daily);
        let next = calculate_next_run(at("2024-03-04T13:27:45Z"), &rule, &utc());
        assert_eq!(next, Some(at("2024-03-05T13:27:45Z")));
    }

    #[test]
    fn time_of_day_zeroes_seconds() {
        let rule = Recurrence::new(Interval::Daily).at(tod("07:15"));
        let next = calculate_next_run(at("2024-03-04T07:15:42.250Z"), &rule, &utc());
        assert_eq!(next, Some(at("2024-03-05T07:15:00Z")));
    }

    #[test]
    fn weekly_digest_after_late_tick() {
        let rule = Recurrence::new(Interval::Weekly).at(tod("18:00"));
        let next = calculate_next_run(at("2024-01-07T18:00:01Z"), &rule, &utc());
        assert_eq!(next, Some(at("2024-01-14T18:00:00Z")));
    }

    #[test]
    fn monthly_clamps_to_month_end() {
        let rule = Recurrence::new(Interval::Monthly);
        let feb = calculate_next_run(at("2024-01-31T10:00:00Z"), &rule, &utc()).unwrap();
        assert_eq!(feb, at("2024-02-29T10:00:00Z"));
        let mar = calculate_next_run(feb, &rule, &utc()).unwrap();
        assert_eq!(mar, at("2024-03-29T10:00:00Z"));

        let non_leap = calculate_next_run(at("2023-01-31T10:00:00Z"), &rule, &utc());
        assert_eq!(non_leap, Some(at("2023-02-28T10:00:00Z")));
    }

    #[test]
    fn monthly_crosses_year() {
        let rule = Recurrence::new(Interval::Monthly).at(tod("08:30"));
        let next = calculate_next_run(at("2024-12-15T22:00:00Z"), &rule, &utc());
        assert_eq!(next, Some(at("2025-01-15T08:30:00Z")));
    }

    #[test]
    fn days_of_week_roll_forward() {
        // 2024-03-04 is a Monday; the next daily run is Tuesday, rolled to Wednesday.
        let rule = Recurrence::new(Interval::Daily)
            .at(tod("09:00"))
            .on([DayOfWeek::Monday, DayOfWeek::Wednesday]);
        let next = calculate_next_run(at("2024-03-04T09:00:00Z"), &rule, &utc());
        assert_eq!(next, Some(at("2024-03-06T09:00:00Z")));

        // From Wednesday the next allowed day is the following Monday.
        let next = calculate_next_run(at("2024-03-06T09:00:00Z"), &rule, &utc());
        assert_eq!(next, Some(at("2024-03-11T09:00:00Z")));
    }

    #[test]
    fn weekly_rolls_to_allowed_day() {
        // Sunday + 7 days is Sunday again; only Monday is allowed.
        let rule = Recurrence::new(Interval::Weekly).on([DayOfWeek::Monday]);
        let next = calculate_next_run(at("2024-01-07T18:00:00Z"), &rule, &utc());
        assert_eq!(next, Some(at("2024-01-15T18:00:00Z")));
    }

    #[test]
    fn time_of_day_is_local_wall_clock() {
        let cest = FixedOffset::east_opt(2 * 3600).unwrap();
        let rule = Recurrence::new(Interval::Daily).at(tod("09:00"));
        let next = calculate_next_run(at("2024-06-01T07:00:00Z"), &rule, &cest);
        assert_eq!(next, Some(at("2024-06-02T07:00:00Z")));

        // 23:30 UTC is already the next local day in +02:00.
        let next = calculate_next_run(at("2024-06-01T23:30:00Z"), &rule, &cest);
        assert_eq!(next, Some(at("2024-06-03T07:00:00Z")));
    }

    #[test]
    fn always_strictly_after_base() {
        let rule = Recurrence::new(Interval::Daily).at(tod("00:00"));
        let base = at("2024-03-04T23:59:59Z");
        let next = calculate_next_run(base, &rule, &utc()).unwrap();
        assert!(next > base);
        assert_eq!(next, at("2024-03-05T00:00:00Z"));
    }

    #[test]
    fn first_run_without_constraints_is_scheduled_for() {
        let rule = Recurrence::new(Interval::Weekly);
        let start = at("2024-01-07T18:00:00Z");
        assert_eq!(first_run(start, &rule, &utc()), Some(start));
    }

    #[test]
    fn first_run_applies_time_on_same_day_or_next() {
        let rule = Recurrence::new(Interval::Daily).at(tod("18:00"));
        assert_eq!(
            first_run(at("2024-01-07T09:00:00Z"), &rule, &utc()),
            Some(at("2024-01-07T18:00:00Z"))
        );
        assert_eq!(
            first_run(at("2024-01-07T19:00:00Z"), &rule, &utc()),
            Some(at("2024-01-08T18:00:00Z"))
        );
    }

    #[test]
    fn first_run_rolls_to_allowed_day() {
        // 2024-01-07 is a Sunday.
        let rule = Recurrence::new(Interval::Weekly)
            .at(tod("08:00"))
            .on([DayOfWeek::Friday]);
        assert_eq!(
            first_run(at("2024-01-07T06:00:00Z"), &rule, &utc()),
            Some(at("2024-01-12T08:00:00Z"))
        );
    }
}
