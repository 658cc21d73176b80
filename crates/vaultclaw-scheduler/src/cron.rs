//! Lightweight cron expression parser.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds, UTC)
//! Fields: *, */N, N, A-B, A-B/N and comma lists of those.
//! Day-of-week accepts 0-7 (0 and 7 are Sunday) or mon..sun.
//! Example: "0 8 * * mon" = every Monday at 08:00

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc};

/// How far ahead `next_after` looks before giving up (covers Feb 29).
const SEARCH_DAYS: i64 = 366 * 4;

const DAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];
const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days_of_month: Vec<u32>,
    months: Vec<u32>,
    days_of_week: Vec<u32>,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Option<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            tracing::warn!(
                "Invalid cron expression: '{}' (need 5 fields: MIN HOUR DOM MON DOW)",
                expression
            );
            return None;
        }

        let minutes = parse_field(parts[0], 0, 59, &[])?;
        let hours = parse_field(parts[1], 0, 23, &[])?;
        let days_of_month = parse_field(parts[2], 1, 31, &[])?;
        let months = parse_field(parts[3], 1, 12, &MONTH_NAMES)?;
        // 7 is an alias for Sunday.
        let mut days_of_week: Vec<u32> = parse_field(parts[4], 0, 7, &DAY_NAMES)?
            .into_iter()
            .map(|d| d % 7)
            .collect();
        days_of_week.sort_unstable();
        days_of_week.dedup();

        Some(Self {
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted: parts[2] != "*",
            dow_restricted: parts[4] != "*",
        })
    }

    /// Classic cron rule: when both day fields are restricted either may match.
    fn day_matches(&self, day: DateTime<Utc>) -> bool {
        if !self.months.contains(&day.month()) {
            return false;
        }
        let dom = self.days_of_month.contains(&day.day());
        let dow = self
            .days_of_week
            .contains(&day.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// First matching minute strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after + Duration::minutes(1);
        let start = start.with_second(0)?.with_nanosecond(0)?;
        let midnight = Utc.from_utc_datetime(&start.date_naive().and_time(NaiveTime::MIN));

        for offset in 0..SEARCH_DAYS {
            let day = midnight + Duration::days(offset);
            if !self.day_matches(day) {
                continue;
            }
            for &h in &self.hours {
                for &m in &self.minutes {
                    let candidate = day + Duration::hours(h as i64) + Duration::minutes(m as i64);
                    if candidate >= start {
                        return Some(candidate);
                    }
                }
            }
        }
        None
    }
}

/// Parse a simple cron expression and compute the next run time.
pub fn next_run_from_cron(expression: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    CronSchedule::parse(expression)?.next_after(after)
}

/// Parse a cron field into a sorted list of matching values.
fn parse_field(field: &str, min: u32, max: u32, names: &[&str]) -> Option<Vec<u32>> {
    let mut values = Vec::new();
    for part in field.split(',') {
        values.extend(parse_part(part.trim(), min, max, names)?);
    }
    values.sort_unstable();
    values.dedup();
    if values.is_empty() { None } else { Some(values) }
}

fn parse_part(part: &str, min: u32, max: u32, names: &[&str]) -> Option<Vec<u32>> {
    let (range, step) = match part.split_once('/') {
        Some((range, step)) => {
            let n: usize = step.parse().ok()?;
            if n == 0 {
                return None;
            }
            (range, n)
        }
        None => (part, 1),
    };

    let (lo, hi) = if range == "*" {
        (min, max)
    } else if let Some((a, b)) = range.split_once('-') {
        (parse_value(a, min, names)?, parse_value(b, min, names)?)
    } else {
        let v = parse_value(range, min, names)?;
        // "5/15" means from 5 to the end of the range.
        if step > 1 { (v, max) } else { (v, v) }
    };

    if lo < min || hi > max || lo > hi {
        return None;
    }
    Some((lo..=hi).step_by(step).collect())
}

fn parse_value(s: &str, min: u32, names: &[&str]) -> Option<u32> {
    if let Ok(n) = s.parse() {
        return Some(n);
    }
    let lower = s.to_ascii_lowercase();
    // Month names are 1-based, day names 0-based.
    names
        .iter()
        .position(|n| *n == lower)
        .map(|i| i as u32 + min.min(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_hour() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 30, 0).unwrap();
        let next = next_run_from_cron("0 * * * *", after).unwrap();
        assert_eq!(next.hour(), 11);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_specific_time() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 7, 0, 0).unwrap();
        let next = next_run_from_cron("0 8 * * *", after).unwrap();
        assert_eq!(next.hour(), 8);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_every_15_minutes() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 2, 0).unwrap();
        let next = next_run_from_cron("*/15 * * * *", after).unwrap();
        assert_eq!(next.minute(), 15);
    }

    #[test]
    fn test_weekly_briefing_slot() {
        // 2026-02-22 is a Sunday.
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 9, 0, 0).unwrap();
        let next = next_run_from_cron("0 8 * * mon", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 23, 8, 0, 0).unwrap());

        // Right after it fires, the next slot is a week later.
        let again = next_run_from_cron("0 8 * * mon", next).unwrap();
        assert_eq!(again, Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_numeric_and_named_weekdays_agree() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 9, 0, 0).unwrap();
        assert_eq!(
            next_run_from_cron("30 17 * * 5", after),
            next_run_from_cron("30 17 * * FRI", after)
        );
        assert_eq!(
            next_run_from_cron("0 0 * * 0", after),
            next_run_from_cron("0 0 * * 7", after)
        );
    }

    #[test]
    fn test_ranges_and_lists() {
        let after = Utc.with_ymd_and_hms(2026, 2, 21, 12, 0, 0).unwrap(); // Saturday
        let next = next_run_from_cron("0 9-17/4 * * mon-fri", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 23, 9, 0, 0).unwrap());

        let next = next_run_from_cron("0,30 * * * *", after).unwrap();
        assert_eq!(next.minute(), 30);
    }

    #[test]
    fn test_day_of_month_and_month() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 0, 0, 0).unwrap();
        let next = next_run_from_cron("0 6 1 * *", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap());

        let next = next_run_from_cron("0 0 29 feb *", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2028, 2, 29, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_invalid_expression() {
        let after = Utc::now();
        assert!(next_run_from_cron("bad", after).is_none());
        assert!(next_run_from_cron("61 * * * *", after).is_none());
        assert!(next_run_from_cron("0 8 * * funday", after).is_none());
        assert!(next_run_from_cron("*/0 * * * *", after).is_none());
    }
}
