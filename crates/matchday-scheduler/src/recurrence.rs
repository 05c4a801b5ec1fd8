use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};

use crate::error::RecurrenceError;

/// Days searched before an expression is declared unsatisfiable. Four
/// years plus a day covers `29 2 *` style expressions.
const SEARCH_HORIZON_DAYS: i64 = 366 * 4 + 1;

/// Compute the next trigger instant for `expression` strictly after `now`.
pub fn next_trigger(expression: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, RecurrenceError> {
    expression.parse::<Recurrence>()?.next_after(now)
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
}

// minute hour day-of-month month weekday; weekday 7 folds onto 0 (Sunday).
const FIELDS: [FieldSpec; 5] = [
    FieldSpec { name: "minute", min: 0, max: 59 },
    FieldSpec { name: "hour", min: 0, max: 23 },
    FieldSpec { name: "day", min: 1, max: 31 },
    FieldSpec { name: "month", min: 1, max: 12 },
    FieldSpec { name: "weekday", min: 0, max: 7 },
];

/// Allowed values of one field as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet {
    bits: u64,
    /// False when the field was a bare `*`; drives day/weekday OR matching.
    restricted: bool,
}

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        self.bits & (1u64 << value) != 0
    }

    fn values(&self, from: u32) -> impl Iterator<Item = u32> + '_ {
        (from..64).filter(move |v| self.contains(*v))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    /// `*/N * * * *`: N minutes after the instant it is evaluated at.
    EveryMinutes(u32),
    Calendar,
}

/// A parsed five-field recurrence expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recurrence {
    source: String,
    kind: Kind,
    minute: FieldSet,
    hour: FieldSet,
    day: FieldSet,
    month: FieldSet,
    weekday: FieldSet,
}

impl Recurrence {
    pub fn parse(expression: &str) -> Result<Self, RecurrenceError> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != FIELDS.len() {
            return Err(RecurrenceError::FieldCount {
                expression: expression.to_string(),
                found: parts.len(),
            });
        }

        let mut sets = [FieldSet { bits: 0, restricted: false }; 5];
        for (i, (part, spec)) in parts.iter().zip(FIELDS.iter()).enumerate() {
            sets[i] = parse_field(part, spec)?;
        }
        // Sunday may be written as 7.
        if sets[4].contains(7) {
            sets[4].bits = (sets[4].bits & !(1 << 7)) | 1;
        }

        let kind = match parts.as_slice() {
            [minute, "*", "*", "*", "*"] => match minute.strip_prefix("*/") {
                Some(step) => Kind::EveryMinutes(parse_number(step, &FIELDS[0])?),
                None => Kind::Calendar,
            },
            _ => Kind::Calendar,
        };

        Ok(Self {
            source: parts.join(" "),
            kind,
            minute: sets[0],
            hour: sets[1],
            day: sets[2],
            month: sets[3],
            weekday: sets[4],
        })
    }

    /// Next trigger strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, RecurrenceError> {
        if let Kind::EveryMinutes(step) = self.kind {
            return Ok(now + Duration::minutes(step as i64));
        }

        // First whole minute strictly after `now`.
        let floor = now
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now);
        let start = floor + Duration::minutes(1);
        let start_date = start.date_naive();

        for offset in 0..SEARCH_HORIZON_DAYS {
            let date = start_date + Duration::days(offset);
            if !self.month.contains(date.month()) || !self.day_matches(date) {
                continue;
            }
            let first_day = offset == 0;
            let from_hour = if first_day { start.hour() } else { 0 };
            for hour in self.hour.values(from_hour).take_while(|h| *h < 24) {
                let from_minute = if first_day && hour == start.hour() {
                    start.minute()
                } else {
                    0
                };
                if let Some(minute) = self.minute.values(from_minute).find(|m| *m < 60) {
                    if let Some(at) = date.and_hms_opt(hour, minute, 0) {
                        return Ok(Utc.from_utc_datetime(&at));
                    }
                }
            }
        }

        Err(RecurrenceError::NoMatch {
            expression: self.source.clone(),
        })
    }

    /// Standard cron rule: when both day-of-month and weekday are
    /// restricted, either may match.
    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.day.contains(date.day());
        let dow = self.weekday.contains(date.weekday().num_days_from_sunday());
        match (self.day.restricted, self.weekday.restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }
}

impl FromStr for Recurrence {
    type Err = RecurrenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_field(part: &str, spec: &FieldSpec) -> Result<FieldSet, RecurrenceError> {
    let mut bits = 0u64;
    for item in part.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, parse_number(step, spec)?),
            None => (item, 1),
        };
        if step == 0 {
            return Err(invalid(spec, item, "step must be positive"));
        }
        let (lo, hi) = match range {
            "*" => (spec.min, spec.max),
            _ => match range.split_once('-') {
                Some((a, b)) => (parse_number(a, spec)?, parse_number(b, spec)?),
                // `5/15` means "from 5 to the end, every 15".
                None if item.contains('/') => (parse_number(range, spec)?, spec.max),
                None => {
                    let v = parse_number(range, spec)?;
                    (v, v)
                }
            },
        };
        if lo > hi {
            return Err(invalid(spec, item, "range start exceeds end"));
        }
        let mut v = lo;
        while v <= hi {
            bits |= 1u64 << v;
            v += step;
        }
    }
    Ok(FieldSet {
        bits,
        // `*/N` still counts as unrestricted for day/weekday matching.
        restricted: !part.starts_with('*'),
    })
}

fn parse_number(raw: &str, spec: &FieldSpec) -> Result<u32, RecurrenceError> {
    let value: u32 = raw
        .parse()
        .map_err(|_| invalid(spec, raw, "not a number"))?;
    if value < spec.min || value > spec.max {
        return Err(invalid(spec, raw, "out of range"));
    }
    Ok(value)
}

fn invalid(spec: &FieldSpec, value: &str, reason: &'static str) -> RecurrenceError {
    RecurrenceError::InvalidField {
        field: spec.name,
        value: value.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn daily_after_trigger_hour_rolls_to_tomorrow() {
        let next = next_trigger("0 5 * * *", at("2025-03-10T05:30:00Z")).unwrap();
        assert_eq!(next, at("2025-03-11T05:00:00Z"));
    }

    #[test]
    fn daily_before_trigger_hour_stays_today() {
        let next = next_trigger("0 5 * * *", at("2025-03-10T04:30:00Z")).unwrap();
        assert_eq!(next, at("2025-03-10T05:00:00Z"));
    }

    #[test]
    fn daily_exactly_on_trigger_is_not_returned() {
        let next = next_trigger("0 5 * * *", at("2025-03-10T05:00:00Z")).unwrap();
        assert_eq!(next, at("2025-03-11T05:00:00Z"));
    }

    #[test]
    fn minute_interval_is_exact_for_any_now() {
        for now in [
            "2025-03-10T05:30:00Z",
            "2025-03-10T05:31:17.250Z",
            "2025-12-31T23:59:59Z",
        ] {
            let now = at(now);
            let next = next_trigger("*/2 * * * *", now).unwrap();
            assert_eq!(next - now, Duration::minutes(2));
        }
    }

    #[test]
    fn top_of_next_hour() {
        let next = next_trigger("0 * * * *", at("2025-03-10T05:30:12Z")).unwrap();
        assert_eq!(next, at("2025-03-10T06:00:00Z"));

        let next = next_trigger("0 * * * *", at("2025-03-10T23:00:00Z")).unwrap();
        assert_eq!(next, at("2025-03-11T00:00:00Z"));
    }

    #[test]
    fn weekly_picks_next_matching_weekday() {
        // 2025-03-10 is a Monday.
        let monday = at("2025-03-10T12:00:00Z");
        assert_eq!(
            next_trigger("0 3 * * 0", monday).unwrap(),
            at("2025-03-16T03:00:00Z")
        );
        assert_eq!(
            next_trigger("0 3 * * 7", monday).unwrap(),
            at("2025-03-16T03:00:00Z")
        );
        // Same weekday, hour already passed: a week later.
        assert_eq!(
            next_trigger("0 5 * * 1", monday).unwrap(),
            at("2025-03-17T05:00:00Z")
        );
        // Same weekday, hour still ahead.
        assert_eq!(
            next_trigger("0 18 * * 1", monday).unwrap(),
            at("2025-03-10T18:00:00Z")
        );
    }

    #[test]
    fn general_expressions_use_the_field_tables() {
        let now = at("2025-03-10T05:30:00Z");
        assert_eq!(
            next_trigger("0 */6 * * *", now).unwrap(),
            at("2025-03-10T06:00:00Z")
        );
        assert_eq!(
            next_trigger("15,45 9-17 * * 1-5", now).unwrap(),
            at("2025-03-10T09:15:00Z")
        );
        assert_eq!(
            next_trigger("30 2 1 * *", now).unwrap(),
            at("2025-04-01T02:30:00Z")
        );
        // Stepped minute with a restricted hour is calendar aligned.
        assert_eq!(
            next_trigger("*/20 6 * * *", now).unwrap(),
            at("2025-03-10T06:00:00Z")
        );
    }

    #[test]
    fn day_and_weekday_match_either() {
        // The 15th or any Sunday, whichever comes first.
        let next = next_trigger("0 0 15 * 0", at("2025-03-10T00:00:00Z")).unwrap();
        assert_eq!(next, at("2025-03-15T00:00:00Z"));
    }

    #[test]
    fn stepped_wildcard_day_fields_do_not_widen_the_match() {
        let monday = at("2025-03-10T00:00:00Z");
        // Only the weekday restricts: next Monday, not the next odd day.
        assert_eq!(
            next_trigger("0 0 */2 * 1", monday).unwrap(),
            at("2025-03-17T00:00:00Z")
        );
        // Only the day restricts: the 15th, not the next even weekday.
        assert_eq!(
            next_trigger("0 0 15 * */2", monday).unwrap(),
            at("2025-03-15T00:00:00Z")
        );
    }

    #[test]
    fn leap_day_is_found_within_horizon() {
        let next = next_trigger("0 0 29 2 *", at("2025-03-01T00:00:00Z")).unwrap();
        assert_eq!(next, at("2028-02-29T00:00:00Z"));
    }

    #[test]
    fn wrong_field_count_is_a_parse_error() {
        let err = next_trigger("0 5 * *", at("2025-03-10T00:00:00Z")).unwrap_err();
        assert!(matches!(err, RecurrenceError::FieldCount { found: 4, .. }));

        let err = "".parse::<Recurrence>().unwrap_err();
        assert!(matches!(err, RecurrenceError::FieldCount { found: 0, .. }));
    }

    #[test]
    fn invalid_fields_are_rejected() {
        for expr in ["60 * * * *", "0 24 * * *", "*/0 * * * *", "0 5-2 * * *", "x * * * *"] {
            assert!(
                matches!(
                    Recurrence::parse(expr),
                    Err(RecurrenceError::InvalidField { .. })
                ),
                "{expr} should be rejected"
            );
        }
    }

    #[test]
    fn impossible_date_reports_no_match() {
        let err = next_trigger("0 0 31 2 *", at("2025-03-10T00:00:00Z")).unwrap_err();
        assert!(matches!(err, RecurrenceError::NoMatch { .. }));
    }

    #[test]
    fn display_normalises_whitespace() {
        let r: Recurrence = "  0   5 * *  *".parse().unwrap();
        assert_eq!(r.to_string(), "0 5 * * *");
    }
}
