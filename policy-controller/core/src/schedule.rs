//! Standard five-field cron schedules: minute, hour, day-of-month, month and
//! day-of-week.
//!
//! Each field accepts `*` (or `?`), single values, `a-b` ranges, `/n` steps
//! and comma-separated lists of those. Months and weekdays also accept
//! three-letter English names. Weekdays range over `0` (Sunday) to `6`
//! (Saturday).
//!
//! When either the day-of-month or day-of-week field is `*`, a day must
//! satisfy both; otherwise satisfying either is enough.

use chrono::{
    DateTime, Datelike, LocalResult, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Timelike,
};
use std::{fmt, str::FromStr};

#[derive(Clone, PartialEq, Eq)]
pub struct Schedule {
    expr: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_star: bool,
    dow_star: bool,
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("expected exactly 5 fields, found {0}")]
    FieldCount(usize),

    #[error("empty {field} expression")]
    Empty { field: &'static str },

    #[error("invalid {field} value '{value}'")]
    Value { field: &'static str, value: String },

    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("{field} range '{range}' begins after it ends")]
    Reversed { field: &'static str, range: String },

    #[error("invalid {field} step '{step}'")]
    Step { field: &'static str, step: String },
}

struct Bounds {
    field: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

const MINUTES: Bounds = Bounds {
    field: "minute",
    min: 0,
    max: 59,
    names: &[],
};

const HOURS: Bounds = Bounds {
    field: "hour",
    min: 0,
    max: 23,
    names: &[],
};

const DAYS_OF_MONTH: Bounds = Bounds {
    field: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
};

// Names are indexed from `min`.
const MONTHS: Bounds = Bounds {
    field: "month",
    min: 1,
    max: 12,
    names: &[
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ],
};

const DAYS_OF_WEEK: Bounds = Bounds {
    field: "day-of-week",
    min: 0,
    max: 6,
    names: &["sun", "mon", "tue", "wed", "thu", "fri", "sat"],
};

// Searches give up after this many years without a firing, e.g. for
// `0 0 30 2 *`.
const MAX_SEARCH_YEARS: i32 = 5;

// === impl Schedule ===

impl Schedule {
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let fields = expr.split_whitespace().collect::<Vec<_>>();
        let &[minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(ScheduleError::FieldCount(fields.len()));
        };

        let (minutes, _) = parse_field(minute, &MINUTES)?;
        let (hours, _) = parse_field(hour, &HOURS)?;
        let (days_of_month, dom_star) = parse_field(dom, &DAYS_OF_MONTH)?;
        let (months, _) = parse_field(month, &MONTHS)?;
        let (days_of_week, dow_star) = parse_field(dow, &DAYS_OF_WEEK)?;

        Ok(Self {
            expr: expr.to_string(),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_star,
            dow_star,
        })
    }

    /// Returns the first firing strictly after `after`, evaluated in the
    /// time zone of `after`.
    ///
    /// Local times skipped by a daylight-saving transition never fire.
    /// Local times repeated by a transition fire at their earliest instant
    /// that is still after `after`. Returns `None` when nothing fires within
    /// the search horizon.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let local = after.naive_local();
        let limit = NaiveDate::from_ymd_opt(local.year() + MAX_SEARCH_YEARS, 1, 1)?
            .and_hms_opt(0, 0, 0)?;

        let mut t = local.with_second(0)?.with_nanosecond(0)? + TimeDelta::minutes(1);
        while t < limit {
            if !contains(self.months, t.month()) {
                t = start_of_next_month(t)?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !contains(self.hours, t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + TimeDelta::hours(1);
                continue;
            }
            if contains(self.minutes, t.minute()) {
                let found = match tz.from_local_datetime(&t) {
                    LocalResult::Single(dt) => Some(dt).filter(|dt| dt > after),
                    LocalResult::Ambiguous(earliest, latest) => {
                        if earliest > *after {
                            Some(earliest)
                        } else {
                            Some(latest).filter(|dt| dt > after)
                        }
                    }
                    LocalResult::None => None,
                };
                if found.is_some() {
                    return found;
                }
            }
            t += TimeDelta::minutes(1);
        }

        None
    }

    pub fn as_str(&self) -> &str {
        &self.expr
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = contains(self.days_of_month, date.day());
        let dow = contains(self.days_of_week, date.weekday().num_days_from_sunday());
        if self.dom_star || self.dow_star {
            dom && dow
        } else {
            dom || dow
        }
    }
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Schedule").field(&self.expr).finish()
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

fn contains(bits: u64, value: u32) -> bool {
    bits & (1 << value) != 0
}

fn start_of_next_month(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

/// Parses a single field into a bitset of permitted values. The flag is set
/// when the field is an unstepped wildcard.
fn parse_field(expr: &str, bounds: &Bounds) -> Result<(u64, bool), ScheduleError> {
    let mut bits = 0u64;
    let mut star = false;

    for part in expr.split(',') {
        if part.is_empty() {
            return Err(ScheduleError::Empty {
                field: bounds.field,
            });
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (part, None),
        };

        let step = match step {
            None => 1,
            Some(s) => match s.parse::<u32>() {
                Ok(step) if step > 0 => step,
                _ => {
                    return Err(ScheduleError::Step {
                        field: bounds.field,
                        step: s.to_string(),
                    })
                }
            },
        };

        let (start, end) = if range == "*" || range == "?" {
            if step == 1 {
                star = true;
            }
            (bounds.min, bounds.max)
        } else if let Some((start, end)) = range.split_once('-') {
            (parse_value(start, bounds)?, parse_value(end, bounds)?)
        } else {
            let value = parse_value(range, bounds)?;
            // `a/n` means every n-th value starting at a.
            let end = if step > 1 { bounds.max } else { value };
            (value, end)
        };

        if start > end {
            return Err(ScheduleError::Reversed {
                field: bounds.field,
                range: range.to_string(),
            });
        }

        for value in (start..=end).step_by(step as usize) {
            bits |= 1 << value;
        }
    }

    Ok((bits, star))
}

fn parse_value(s: &str, bounds: &Bounds) -> Result<u32, ScheduleError> {
    let lower = s.to_ascii_lowercase();
    if let Some(index) = bounds.names.iter().position(|name| *name == lower) {
        return Ok(bounds.min + index as u32);
    }

    let value = s.parse::<u32>().map_err(|_| ScheduleError::Value {
        field: bounds.field,
        value: s.to_string(),
    })?;
    if value < bounds.min || value > bounds.max {
        return Err(ScheduleError::OutOfRange {
            field: bounds.field,
            value,
            min: bounds.min,
            max: bounds.max,
        });
    }
    Ok(value)
}
