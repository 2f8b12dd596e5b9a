//! Expansion of a weekly pattern into concrete occurrence windows.

use chrono::{
    DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
    Weekday,
};
use chrono_tz::Tz;
use common::TimeRange;
use serde::{Deserialize, Serialize};

use super::RecurrenceError;

/// Longest allowed program, counted from the first date.
pub const MAX_SPAN_MONTHS: u32 = 6;

/// A weekly repeat pattern expressed in the program's local civil time.
///
/// `start_time` is a wall-clock time in `timezone`: "10:00" stays 10:00 local
/// on both sides of a daylight-saving change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrencePattern {
    /// First calendar date, inclusive.
    pub start_date: NaiveDate,
    /// Last calendar date, inclusive.
    pub end_date: NaiveDate,
    pub repeat_days: Vec<Weekday>,
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
    pub timezone: Tz,
}

impl RecurrencePattern {
    /// Checks the date range, span and repeat days.
    pub fn validate(&self) -> Result<(), RecurrenceError> {
        if self.end_date < self.start_date {
            return Err(RecurrenceError::InvalidDateRange {
                start_date: self.start_date,
                end_date: self.end_date,
            });
        }
        let max_end = self
            .start_date
            .checked_add_months(Months::new(MAX_SPAN_MONTHS))
            .unwrap_or(NaiveDate::MAX);
        if self.end_date > max_end {
            return Err(RecurrenceError::SpanTooLong { max_end });
        }
        if self.repeat_days.is_empty() {
            return Err(RecurrenceError::NoRepeatDays);
        }
        if self.duration_minutes == 0 {
            return Err(RecurrenceError::InvalidDuration {
                minutes: self.duration_minutes,
            });
        }
        Ok(())
    }

    /// Returns one window per matching date, in date order.
    pub fn expand(&self) -> Result<Vec<TimeRange>, RecurrenceError> {
        self.validate()?;

        let duration = Duration::minutes(i64::from(self.duration_minutes));
        let mut windows = Vec::new();
        for date in self.start_date.iter_days() {
            if date > self.end_date {
                break;
            }
            if !self.repeat_days.contains(&date.weekday()) {
                continue;
            }
            let local = date.and_time(self.start_time);
            let start = resolve_local(self.timezone, local)
                .ok_or(RecurrenceError::UnresolvableLocalTime { local })?;
            let window = TimeRange::starting_at(start, duration).map_err(|_| {
                RecurrenceError::InvalidDuration {
                    minutes: self.duration_minutes,
                }
            })?;
            windows.push(window);
        }

        if windows.is_empty() {
            return Err(RecurrenceError::NoOccurrences);
        }
        Ok(windows)
    }

    /// Returns the calendar date of `now` in the program's timezone.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.timezone).date_naive()
    }
}

/// Resolves a local wall-clock time to an instant.
///
/// A repeated hour (clocks going back) takes the earlier instant. A skipped
/// hour (clocks going forward) is shifted forward by one hour, which lands on
/// the same wall-clock reading the day would have shown without the gap.
pub fn resolve_local(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&local)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(local + Duration::hours(1))).earliest())
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;
    use chrono_tz::Europe::Berlin;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn pattern(start: NaiveDate, end: NaiveDate, days: Vec<Weekday>) -> RecurrencePattern {
        RecurrencePattern {
            start_date: start,
            end_date: end,
            repeat_days: days,
            start_time: time(10, 0),
            duration_minutes: 60,
            timezone: Berlin,
        }
    }

    #[test]
    fn test_expand_picks_matching_weekdays() {
        // 2026-06-01 is a Monday
        let p = pattern(date(2026, 6, 1), date(2026, 6, 14), vec![Weekday::Mon, Weekday::Wed]);
        let windows = p.expand().unwrap();

        assert_eq!(windows.len(), 4);
        let dates: Vec<_> = windows
            .iter()
            .map(|w| w.start().with_timezone(&Berlin).date_naive())
            .collect();
        assert_eq!(
            dates,
            vec![date(2026, 6, 1), date(2026, 6, 3), date(2026, 6, 8), date(2026, 6, 10)]
        );
        assert!(windows.iter().all(|w| w.duration() == Duration::minutes(60)));
    }

    #[test]
    fn test_end_date_is_inclusive() {
        let p = pattern(date(2026, 6, 1), date(2026, 6, 8), vec![Weekday::Mon]);
        assert_eq!(p.expand().unwrap().len(), 2);
    }

    #[test]
    fn test_validation() {
        let inverted = pattern(date(2026, 6, 8), date(2026, 6, 1), vec![Weekday::Mon]);
        assert!(matches!(
            inverted.validate(),
            Err(RecurrenceError::InvalidDateRange { .. })
        ));

        let too_long = pattern(date(2026, 1, 1), date(2026, 7, 2), vec![Weekday::Mon]);
        assert!(matches!(
            too_long.validate(),
            Err(RecurrenceError::SpanTooLong { max_end }) if max_end == date(2026, 7, 1)
        ));

        let exactly_six = pattern(date(2026, 1, 1), date(2026, 7, 1), vec![Weekday::Mon]);
        assert!(exactly_six.validate().is_ok());

        let no_days = pattern(date(2026, 6, 1), date(2026, 6, 8), vec![]);
        assert!(matches!(no_days.validate(), Err(RecurrenceError::NoRepeatDays)));
    }

    #[test]
    fn test_no_matching_dates() {
        // Tuesday to Wednesday, repeating on Fridays only
        let p = pattern(date(2026, 6, 2), date(2026, 6, 3), vec![Weekday::Fri]);
        assert!(matches!(p.expand(), Err(RecurrenceError::NoOccurrences)));
    }

    #[test]
    fn test_civil_time_survives_dst_change() {
        // US clocks spring forward on 2025-03-09
        let p = RecurrencePattern {
            start_date: date(2025, 3, 3),
            end_date: date(2025, 3, 17),
            repeat_days: vec![Weekday::Mon],
            start_time: time(10, 0),
            duration_minutes: 45,
            timezone: New_York,
        };
        let windows = p.expand().unwrap();

        assert_eq!(windows.len(), 3);
        for w in &windows {
            assert_eq!(w.start().with_timezone(&New_York).time(), time(10, 0));
        }
        assert_eq!(windows[0].start().time(), time(15, 0));
        assert_eq!(windows[1].start().time(), time(14, 0));
    }

    #[test]
    fn test_resolve_local_gap_and_overlap() {
        // 02:30 does not exist on 2025-03-09 in New York
        let gap = date(2025, 3, 9).and_time(time(2, 30));
        let resolved = resolve_local(New_York, gap).unwrap();
        assert_eq!(resolved.with_timezone(&New_York).time(), time(3, 30));

        // 01:30 happens twice on 2025-11-02; the first one is EDT (UTC-4)
        let overlap = date(2025, 11, 2).and_time(time(1, 30));
        let resolved = resolve_local(New_York, overlap).unwrap();
        assert_eq!(resolved.time(), time(5, 30));
    }

    #[test]
    fn test_local_date() {
        let p = pattern(date(2026, 6, 1), date(2026, 6, 8), vec![Weekday::Mon]);
        let late_utc = Utc.with_ymd_and_hms(2026, 5, 31, 23, 0, 0).unwrap();
        assert_eq!(p.local_date(late_utc), date(2026, 6, 1));
    }
}
