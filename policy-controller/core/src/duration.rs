//! Parses durations in Go's `time.ParseDuration` format, e.g. `1h30m`,
//! `90s` or `1.5h`.
//!
//! Go durations are signed but every duration in a project (window lengths,
//! retry delays) must be non-negative, so a negative, non-zero duration is
//! rejected.

use std::time::Duration;

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum DurationError {
    #[error("invalid duration '{0}'")]
    Invalid(String),

    #[error("invalid unit '{unit}' in duration '{input}': {units}", units = EXPECTED_UNITS)]
    InvalidUnit { input: String, unit: String },

    #[error("missing a unit in duration '{0}': {units}", units = EXPECTED_UNITS)]
    NoUnit(String),

    #[error("duration '{0}' is negative")]
    Negative(String),

    #[error("duration '{0}' is too large")]
    Overflow(String),
}

const EXPECTED_UNITS: &str = "expected one of 'ns', 'us', '\u{00b5}s', 'ms', 's', 'm', or 'h'";

// Go's time.Duration is an int64 count of nanoseconds.
const MAX_NANOS: u128 = i64::MAX as u128;

// Fractional digits beyond this precision cannot affect a nanosecond count.
const MAX_FRACTION_DIGITS: usize = 18;

pub fn parse(input: &str) -> Result<Duration, DurationError> {
    // implements the same format as
    // https://cs.opensource.google/go/go/+/refs/tags/go1.20.4:src/time/format.go;l=1589
    let invalid = || DurationError::Invalid(input.to_string());
    let overflow = || DurationError::Overflow(input.to_string());

    let (negative, mut s) = match input.as_bytes().first() {
        Some(b'-') => (true, &input[1..]),
        Some(b'+') => (false, &input[1..]),
        _ => (false, input),
    };

    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(invalid());
    }

    let mut total: u128 = 0;
    while !s.is_empty() {
        let (whole, rest) = split_digits(s);
        s = rest;

        let mut fraction = "";
        if let Some(rest) = s.strip_prefix('.') {
            let (digits, rest) = split_digits(rest);
            fraction = digits;
            s = rest;
        }
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }

        let unit_len = s
            .find(|c: char| c == '.' || c.is_ascii_digit())
            .unwrap_or(s.len());
        let (unit, rest) = s.split_at(unit_len);
        s = rest;
        if unit.is_empty() {
            return Err(DurationError::NoUnit(input.to_string()));
        }
        let unit_nanos = unit_nanos(unit).ok_or_else(|| DurationError::InvalidUnit {
            input: input.to_string(),
            unit: unit.to_string(),
        })?;

        let whole = if whole.is_empty() {
            0
        } else {
            whole.parse::<u128>().map_err(|_| overflow())?
        };
        let mut nanos = whole.checked_mul(unit_nanos).ok_or_else(overflow)?;

        let mut numerator: u128 = 0;
        let mut scale: u128 = 1;
        for digit in fraction.bytes().take(MAX_FRACTION_DIGITS) {
            numerator = numerator * 10 + u128::from(digit - b'0');
            scale *= 10;
        }
        nanos = nanos
            .checked_add(numerator * unit_nanos / scale)
            .ok_or_else(overflow)?;

        total = total.checked_add(nanos).ok_or_else(overflow)?;
        if total > MAX_NANOS {
            return Err(overflow());
        }
    }

    if negative && total != 0 {
        return Err(DurationError::Negative(input.to_string()));
    }

    // `total` is bounded by `MAX_NANOS`.
    let nanos = u64::try_from(total).map_err(|_| overflow())?;
    Ok(Duration::from_nanos(nanos))
}

fn split_digits(s: &str) -> (&str, &str) {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s.split_at(end)
}

fn unit_nanos(unit: &str) -> Option<u128> {
    // https://cs.opensource.google/go/go/+/refs/tags/go1.20.4:src/time/format.go;l=1573
    let nanos = match unit {
        "ns" => 1,
        // U+00B5 is the "micro sign" while U+03BC is "Greek letter mu"
        "us" | "\u{00b5}s" | "\u{03bc}s" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        "h" => 60 * 60 * 1_000_000_000,
        _ => return None,
    };
    Some(nanos)
}
