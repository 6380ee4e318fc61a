//! Schedule triggers
//!
//! A schedule's `method` and whitespace separated `method_config` are parsed
//! into a [`Trigger`], which computes fire times in UTC.
//!
//! `cron` takes up to eight positional fields:
//!
//! ```text
//! second minute hour day_of_week week day month year
//! ```
//!
//! Omitted trailing fields match everything. Each field accepts `*`, `*/n`,
//! `a`, `a-b`, `a-b/n`, `a/n` and comma separated lists of those. Months and
//! weekdays may be given by name (`jan`, `mon`); weekdays count from 0 for
//! Monday. `day` also accepts `last` for the last day of the month.
//!
//! `interval` takes `key=integer` pairs with keys `weeks`, `days`, `hours`,
//! `minutes` and `seconds`.

use crate::scheduler::error::ScheduleParseError;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeDelta, Timelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use strum_macros::{Display, EnumString};

/// How far ahead a cron trigger searches before giving up
const SEARCH_YEARS: i32 = 100;

const INTERVAL_KEYS: &[(&str, i64)] = &[
    ("weeks", 7 * 24 * 3600),
    ("days", 24 * 3600),
    ("hours", 3600),
    ("minutes", 60),
    ("seconds", 1),
];

static CRON_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?P<all>\*)|(?P<first>[A-Za-z0-9]+)(?:-(?P<last>[A-Za-z0-9]+))?)(?:/(?P<step>\d+))?$")
        .expect("cron token regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ScheduleMethod {
    Cron,
    Interval,
}

/// Parse a schedule's method and config into a trigger
pub fn parse_schedule_trigger(method: &str, config: &str) -> Result<Trigger, ScheduleParseError> {
    let method = ScheduleMethod::from_str(method)
        .map_err(|_| ScheduleParseError::new(format!("Unknown method: {}", method)))?;

    let tokens: Vec<&str> = config.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(ScheduleParseError::new(format!(
            "Empty config for {} schedule",
            method
        )));
    }

    match method {
        ScheduleMethod::Cron => CronTrigger::from_fields(&tokens).map(Trigger::Cron),
        ScheduleMethod::Interval => IntervalTrigger::from_pairs(&tokens).map(Trigger::Interval),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Cron(CronTrigger),
    Interval(IntervalTrigger),
}

impl Trigger {
    /// Earliest fire time not before `now` and strictly after `previous`
    pub fn next_fire_time(
        &self,
        previous: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Cron(cron) => cron.next_fire_time(previous, now),
            Trigger::Interval(interval) => interval.next_fire_time(previous, now),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Cron(cron) => write!(f, "{}", cron),
            Trigger::Interval(interval) => write!(f, "{}", interval),
        }
    }
}

/// Fixed period trigger; the first fire is one period after it is scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalTrigger {
    interval: TimeDelta,
}

impl IntervalTrigger {
    pub fn new(interval: TimeDelta) -> Self {
        let interval = if interval <= TimeDelta::zero() {
            TimeDelta::seconds(1)
        } else {
            interval
        };
        Self { interval }
    }

    fn from_pairs(tokens: &[&str]) -> Result<Self, ScheduleParseError> {
        let mut values: BTreeMap<&str, i64> = BTreeMap::new();
        for token in tokens {
            let parsed = token
                .split_once('=')
                .and_then(|(key, value)| value.parse::<i64>().ok().map(|v| (key, v)));
            let Some((key, value)) = parsed else {
                return Err(ScheduleParseError::new("Failed to parse config"));
            };
            values.insert(key, value);
        }

        let unknown: Vec<&str> = values
            .keys()
            .filter(|k| !INTERVAL_KEYS.iter().any(|(name, _)| name == *k))
            .copied()
            .collect();
        if !unknown.is_empty() {
            return Err(ScheduleParseError::new(format!(
                "Unknown keys found in config: {}",
                unknown.join(", ")
            )));
        }

        let mut total: i64 = 0;
        for (key, seconds) in INTERVAL_KEYS {
            let Some(value) = values.get(key) else {
                continue;
            };
            if *value < 0 {
                return Err(ScheduleParseError::new(format!(
                    "Interval {} may not be negative",
                    key
                )));
            }
            total = value
                .checked_mul(*seconds)
                .and_then(|s| total.checked_add(s))
                .filter(|s| *s <= i64::MAX / 1000)
                .ok_or_else(|| ScheduleParseError::new("Interval is too large"))?;
        }

        Ok(Self::new(TimeDelta::seconds(total)))
    }

    pub fn interval(&self) -> TimeDelta {
        self.interval
    }

    pub fn next_fire_time(
        &self,
        previous: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let Some(previous) = previous else {
            return now.checked_add_signed(self.interval);
        };

        let next = previous.checked_add_signed(self.interval)?;
        if next > now {
            return Some(next);
        }

        // skip fires missed while nothing was running
        let behind = (now - previous).num_milliseconds();
        let period = self.interval.num_milliseconds().max(1);
        let periods = behind / period + 1;
        previous.checked_add_signed(TimeDelta::milliseconds(period.checked_mul(periods)?))
    }
}

impl fmt::Display for IntervalTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.interval.num_seconds();
        let days = total / 86_400;
        let rest = total % 86_400;
        let clock = format!("{}:{:02}:{:02}", rest / 3600, (rest % 3600) / 60, rest % 60);
        match days {
            0 => write!(f, "interval[{}]", clock),
            1 => write!(f, "interval[1 day, {}]", clock),
            n => write!(f, "interval[{} days, {}]", n, clock),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CronField {
    Second,
    Minute,
    Hour,
    DayOfWeek,
    Week,
    Day,
    Month,
    Year,
}

impl CronField {
    /// Positional order of `method_config`
    const POSITIONAL: [CronField; 8] = [
        CronField::Second,
        CronField::Minute,
        CronField::Hour,
        CronField::DayOfWeek,
        CronField::Week,
        CronField::Day,
        CronField::Month,
        CronField::Year,
    ];

    fn name(self) -> &'static str {
        match self {
            CronField::Second => "second",
            CronField::Minute => "minute",
            CronField::Hour => "hour",
            CronField::DayOfWeek => "day_of_week",
            CronField::Week => "week",
            CronField::Day => "day",
            CronField::Month => "month",
            CronField::Year => "year",
        }
    }

    fn range(self) -> (u32, u32) {
        match self {
            CronField::Second | CronField::Minute => (0, 59),
            CronField::Hour => (0, 23),
            CronField::DayOfWeek => (0, 6),
            CronField::Week => (1, 53),
            CronField::Day => (1, 31),
            CronField::Month => (1, 12),
            CronField::Year => (1970, 9999),
        }
    }

    fn named_value(self, name: &str) -> Option<u32> {
        const MONTHS: [&str; 12] = [
            "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
        ];
        const WEEKDAYS: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

        let name = name.to_ascii_lowercase();
        let names: &[&str] = match self {
            CronField::Month => &MONTHS,
            CronField::DayOfWeek => &WEEKDAYS,
            _ => return None,
        };
        let (min, _) = self.range();
        names
            .iter()
            .position(|n| *n == name)
            .map(|i| i as u32 + min)
    }
}

/// Allowed values of one cron field
#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldSet {
    field: CronField,
    expression: String,
    allowed: Vec<bool>,
    last_day: bool,
}

impl FieldSet {
    fn any(field: CronField) -> Self {
        let (min, max) = field.range();
        Self {
            field,
            expression: "*".to_string(),
            allowed: vec![true; (max - min + 1) as usize],
            last_day: false,
        }
    }

    fn parse(field: CronField, expression: &str) -> Result<Self, ScheduleParseError> {
        let (min, max) = field.range();
        let mut set = Self {
            field,
            expression: expression.to_string(),
            allowed: vec![false; (max - min + 1) as usize],
            last_day: false,
        };

        for part in expression.split(',') {
            set.add_part(part)?;
        }
        Ok(set)
    }

    fn add_part(&mut self, part: &str) -> Result<(), ScheduleParseError> {
        let field = self.field;
        let (min, max) = field.range();
        let invalid = || {
            ScheduleParseError::new(format!(
                "Unrecognized expression \"{}\" for field \"{}\"",
                part,
                field.name()
            ))
        };

        if part.eq_ignore_ascii_case("last") {
            if field != CronField::Day {
                return Err(invalid());
            }
            self.last_day = true;
            return Ok(());
        }

        let captures = CRON_TOKEN.captures(part).ok_or_else(invalid)?;
        let step = match captures.name("step") {
            Some(step) => {
                let step: u32 = step.as_str().parse().map_err(|_| invalid())?;
                if step == 0 {
                    return Err(ScheduleParseError::new(format!(
                        "Step must be positive in \"{}\" for field \"{}\"",
                        part,
                        field.name()
                    )));
                }
                step
            }
            None => 1,
        };

        let (first, last) = if captures.name("all").is_some() {
            (min, max)
        } else {
            let first = captures.name("first").ok_or_else(invalid)?.as_str();
            let first = self.value(first)?;
            let last = match captures.name("last") {
                Some(last) => self.value(last.as_str())?,
                // `a/n` runs to the end of the range
                None if captures.name("step").is_some() => max,
                None => first,
            };
            (first, last)
        };

        if first > last {
            return Err(ScheduleParseError::new(format!(
                "The minimum value in \"{}\" must not be higher than the maximum for field \"{}\"",
                part,
                field.name()
            )));
        }

        let mut value = first;
        while value <= last {
            self.allowed[(value - min) as usize] = true;
            value += step;
        }
        Ok(())
    }

    fn value(&self, token: &str) -> Result<u32, ScheduleParseError> {
        let field = self.field;
        let (min, max) = field.range();
        let value = match token.parse::<u32>() {
            Ok(value) => value,
            Err(_) => field.named_value(token).ok_or_else(|| {
                ScheduleParseError::new(format!(
                    "Unrecognized value \"{}\" for field \"{}\"",
                    token,
                    field.name()
                ))
            })?,
        };
        if value < min || value > max {
            return Err(ScheduleParseError::new(format!(
                "Value {} is out of range for field \"{}\" ({}-{})",
                value,
                field.name(),
                min,
                max
            )));
        }
        Ok(value)
    }

    fn is_wildcard(&self) -> bool {
        self.expression == "*"
    }

    fn contains(&self, value: u32) -> bool {
        let (min, max) = self.field.range();
        value >= min && value <= max && self.allowed[(value - min) as usize]
    }

    /// Smallest allowed value not below `value`
    fn next_from(&self, value: u32) -> Option<u32> {
        let (min, max) = self.field.range();
        (value.max(min)..=max).find(|v| self.allowed[(v - min) as usize])
    }
}

/// Calendar based trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronTrigger {
    second: FieldSet,
    minute: FieldSet,
    hour: FieldSet,
    day_of_week: FieldSet,
    week: FieldSet,
    day: FieldSet,
    month: FieldSet,
    year: FieldSet,
}

impl CronTrigger {
    fn from_fields(tokens: &[&str]) -> Result<Self, ScheduleParseError> {
        if tokens.len() > CronField::POSITIONAL.len() {
            return Err(ScheduleParseError::new(format!(
                "Too many fields in cron config: expected at most {}, got {}",
                CronField::POSITIONAL.len(),
                tokens.len()
            )));
        }

        let mut sets = Vec::with_capacity(CronField::POSITIONAL.len());
        for (index, field) in CronField::POSITIONAL.iter().enumerate() {
            let set = match tokens.get(index) {
                Some(expression) => FieldSet::parse(*field, expression)?,
                None => FieldSet::any(*field),
            };
            sets.push(set);
        }

        let mut sets = sets.into_iter();
        let mut next = || {
            sets.next()
                .ok_or_else(|| ScheduleParseError::new("Missing cron field"))
        };
        Ok(Self {
            second: next()?,
            minute: next()?,
            hour: next()?,
            day_of_week: next()?,
            week: next()?,
            day: next()?,
            month: next()?,
            year: next()?,
        })
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let day_ok = self.day.contains(date.day())
            || (self.day.last_day && Some(date.day()) == last_day_of_month(date));
        day_ok
            && self
                .day_of_week
                .contains(date.weekday().num_days_from_monday())
            && self.week.contains(date.iso_week().week())
    }

    pub fn next_fire_time(
        &self,
        previous: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let mut start = ceil_to_second(now.naive_utc())?;
        if let Some(previous) = previous {
            let after = previous.naive_utc().with_nanosecond(0)? + TimeDelta::seconds(1);
            start = start.max(after);
        }
        let limit = start.year() + SEARCH_YEARS;

        let mut t = start;
        loop {
            if t.year() > limit {
                return None;
            }

            let year = u32::try_from(t.year()).ok()?;
            match self.year.next_from(year) {
                None => return None,
                Some(y) if y != year => {
                    t = midnight(i32::try_from(y).ok()?, 1, 1)?;
                    continue;
                }
                Some(_) => {}
            }

            match self.month.next_from(t.month()) {
                None => {
                    t = midnight(t.year() + 1, 1, 1)?;
                    continue;
                }
                Some(m) if m != t.month() => {
                    t = midnight(t.year(), m, 1)?;
                    continue;
                }
                Some(_) => {}
            }

            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }

            match self.hour.next_from(t.hour()) {
                None => {
                    t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                    continue;
                }
                Some(h) if h != t.hour() => {
                    t = t.date().and_hms_opt(h, 0, 0)?;
                    continue;
                }
                Some(_) => {}
            }

            match self.minute.next_from(t.minute()) {
                None => {
                    t = t.date().and_hms_opt(t.hour(), 0, 0)? + TimeDelta::hours(1);
                    continue;
                }
                Some(m) if m != t.minute() => {
                    t = t.date().and_hms_opt(t.hour(), m, 0)?;
                    continue;
                }
                Some(_) => {}
            }

            match self.second.next_from(t.second()) {
                None => {
                    t = t.date().and_hms_opt(t.hour(), t.minute(), 0)? + TimeDelta::minutes(1);
                    continue;
                }
                Some(s) if s != t.second() => {
                    t = t.date().and_hms_opt(t.hour(), t.minute(), s)?;
                    continue;
                }
                Some(_) => return Some(t.and_utc()),
            }
        }
    }
}

impl fmt::Display for CronTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = [
            &self.year,
            &self.month,
            &self.day,
            &self.week,
            &self.day_of_week,
            &self.hour,
            &self.minute,
            &self.second,
        ];
        let parts: Vec<String> = fields
            .iter()
            .filter(|set| !set.is_wildcard())
            .map(|set| format!("{}='{}'", set.field.name(), set.expression))
            .collect();
        write!(f, "cron[{}]", parts.join(", "))
    }
}

fn midnight(year: i32, month: u32, day: u32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)
}

fn ceil_to_second(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let truncated = t.with_nanosecond(0)?;
    if truncated == t {
        Some(t)
    } else {
        Some(truncated + TimeDelta::seconds(1))
    }
}

fn last_day_of_month(date: NaiveDate) -> Option<u32> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?
        .pred_opt()
        .map(|d| d.day())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_interval_hours_and_minutes() {
        let trigger = parse_schedule_trigger("interval", "hours=2 minutes=30").unwrap();
        match &trigger {
            Trigger::Interval(interval) => {
                assert_eq!(interval.interval(), TimeDelta::minutes(150));
            }
            other => panic!("unexpected trigger: {other}"),
        }
        assert_eq!(trigger.to_string(), "interval[2:30:00]");

        let now = at(2024, 1, 1, 12, 0, 0);
        assert_eq!(trigger.next_fire_time(None, now), Some(at(2024, 1, 1, 14, 30, 0)));
    }

    #[test]
    fn test_interval_unknown_key_named() {
        let err = parse_schedule_trigger("interval", "hours=2 bogus=1").unwrap_err();
        assert!(err.message.contains("bogus"));
        assert_eq!(err.message, "Unknown keys found in config: bogus");
    }

    #[test]
    fn test_cron_seven_fields() {
        let trigger = parse_schedule_trigger("cron", "0 30 4 * * * *").unwrap();
        assert_eq!(trigger.to_string(), "cron[hour='4', minute='30', second='0']");

        let now = at(2024, 3, 10, 5, 0, 0);
        assert_eq!(trigger.next_fire_time(None, now), Some(at(2024, 3, 11, 4, 30, 0)));
    }

    #[test]
    fn test_unknown_method_named() {
        let err = parse_schedule_trigger("weekly", "").unwrap_err();
        assert!(err.message.contains("weekly"));
    }

    #[test]
    fn test_empty_config_rejected() {
        assert!(parse_schedule_trigger("cron", "").is_err());
        assert!(parse_schedule_trigger("interval", "   ").is_err());
    }

    #[test]
    fn test_interval_malformed_values() {
        for config in ["hours", "hours=two", "hours=1.5", "minutes=-5"] {
            assert!(
                parse_schedule_trigger("interval", config).is_err(),
                "{config} should not parse"
            );
        }
    }

    #[test]
    fn test_interval_zero_becomes_one_second() {
        let trigger = parse_schedule_trigger("interval", "seconds=0").unwrap();
        let now = at(2024, 1, 1, 0, 0, 0);
        assert_eq!(trigger.next_fire_time(None, now), Some(at(2024, 1, 1, 0, 0, 1)));
    }

    #[test]
    fn test_interval_skips_missed_fires() {
        let trigger = parse_schedule_trigger("interval", "minutes=10").unwrap();
        let previous = at(2024, 1, 1, 0, 0, 0);

        let now = at(2024, 1, 1, 0, 5, 0);
        assert_eq!(
            trigger.next_fire_time(Some(previous), now),
            Some(at(2024, 1, 1, 0, 10, 0))
        );

        let now = at(2024, 1, 1, 0, 35, 0);
        assert_eq!(
            trigger.next_fire_time(Some(previous), now),
            Some(at(2024, 1, 1, 0, 40, 0))
        );
    }

    #[test]
    fn test_cron_rejects_bad_fields() {
        let cases = [
            "0 0 0 * * * * * *",
            "61",
            "0 0 25",
            "*/0",
            "0 0 0 funday",
            "5-1",
            "0 0 0 * * last-3",
            "0 0 0 * 54",
            "0 0 0 * * * * 1969",
        ];
        for config in cases {
            assert!(
                parse_schedule_trigger("cron", config).is_err(),
                "{config} should not parse"
            );
        }
    }

    #[test]
    fn test_cron_steps_and_lists() {
        let trigger = parse_schedule_trigger("cron", "*/15 0,30").unwrap();
        let now = at(2024, 1, 1, 10, 0, 50);
        assert_eq!(trigger.next_fire_time(None, now), Some(at(2024, 1, 1, 10, 30, 0)));

        let previous = at(2024, 1, 1, 10, 30, 0);
        assert_eq!(
            trigger.next_fire_time(Some(previous), previous),
            Some(at(2024, 1, 1, 10, 30, 15))
        );
    }

    #[test]
    fn test_cron_named_weekdays_and_months() {
        // 09:00 on weekdays in March
        let trigger = parse_schedule_trigger("cron", "0 0 9 mon-fri * * mar").unwrap();
        // Saturday 2 March 2024
        let now = at(2024, 3, 2, 12, 0, 0);
        assert_eq!(trigger.next_fire_time(None, now), Some(at(2024, 3, 4, 9, 0, 0)));

        // last weekday of March, then next year
        let now = at(2024, 3, 29, 9, 0, 1);
        assert_eq!(trigger.next_fire_time(None, now), Some(at(2025, 3, 3, 9, 0, 0)));
    }

    #[test]
    fn test_cron_last_day_of_month() {
        let trigger = parse_schedule_trigger("cron", "0 0 0 * * last").unwrap();
        let now = at(2024, 2, 10, 0, 0, 0);
        assert_eq!(trigger.next_fire_time(None, now), Some(at(2024, 2, 29, 0, 0, 0)));

        let now = at(2023, 12, 31, 0, 0, 1);
        assert_eq!(trigger.next_fire_time(None, now), Some(at(2024, 1, 31, 0, 0, 0)));
    }

    #[test]
    fn test_cron_impossible_date_gives_up() {
        let trigger = parse_schedule_trigger("cron", "0 0 0 * * 30 feb").unwrap();
        assert_eq!(trigger.next_fire_time(None, at(2024, 1, 1, 0, 0, 0)), None);
    }

    #[test]
    fn test_cron_rounds_up_subsecond_now() {
        let trigger = parse_schedule_trigger("cron", "*").unwrap();
        let now = at(2024, 1, 1, 0, 0, 0) + TimeDelta::milliseconds(250);
        assert_eq!(trigger.next_fire_time(None, now), Some(at(2024, 1, 1, 0, 0, 1)));
    }
}
