use crate::duration::{self, DurationError};
use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

pub const DEFAULT_SYNC_RETRY_DURATION: Duration = Duration::from_secs(5);
pub const DEFAULT_SYNC_RETRY_MAX_DURATION: Duration = Duration::from_secs(3 * 60);
pub const DEFAULT_SYNC_RETRY_FACTOR: i64 = 2;

/// Controls how failed syncs are retried.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetryStrategy {
    /// The maximum number of retries. Negative values retry indefinitely.
    pub limit: i64,
    pub backoff: Option<Backoff>,
}

/// Exponential backoff between retries.
///
/// Durations are either a bare number of seconds or a duration string such
/// as `1m30s`. Empty fields take the defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Backoff {
    pub duration: String,
    pub factor: Option<i64>,
    /// A cap on the delay between retries. `0` disables the cap.
    pub max_duration: String,
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum BackoffError {
    #[error("invalid backoff {field} '{value}': {source}")]
    Duration {
        field: &'static str,
        value: String,
        #[source]
        source: DurationError,
    },

    #[error("invalid backoff factor {0}: must be at least 1")]
    Factor(i64),

    #[error("retry delay overflows")]
    Overflow,
}

// === impl RetryStrategy ===

impl RetryStrategy {
    pub fn has_attempts_remaining(&self, attempts: i64) -> bool {
        self.limit < 0 || attempts < self.limit
    }

    /// Returns when the next retry should happen, given the time of the last
    /// attempt and the number of retries made so far.
    pub fn next_retry_at(
        &self,
        last_attempt: DateTime<Utc>,
        attempt: u32,
    ) -> Result<DateTime<Utc>, BackoffError> {
        let delay = self.delay(attempt)?;
        tracing::trace!(attempt, ?delay, "Computed retry delay");
        let delay = TimeDelta::from_std(delay).map_err(|_| BackoffError::Overflow)?;
        last_attempt
            .checked_add_signed(delay)
            .ok_or(BackoffError::Overflow)
    }

    fn delay(&self, attempt: u32) -> Result<Duration, BackoffError> {
        let default = Backoff::default();
        let backoff = self.backoff.as_ref().unwrap_or(&default);

        let base = parse_backoff_duration("duration", &backoff.duration)?
            .unwrap_or(DEFAULT_SYNC_RETRY_DURATION);
        let max = parse_backoff_duration("max duration", &backoff.max_duration)?
            .unwrap_or(DEFAULT_SYNC_RETRY_MAX_DURATION);
        let factor = backoff.factor.unwrap_or(DEFAULT_SYNC_RETRY_FACTOR);
        if factor < 1 {
            return Err(BackoffError::Factor(factor));
        }

        let nanos = (factor as u128)
            .checked_pow(attempt)
            .and_then(|f| f.checked_mul(base.as_nanos()))
            .filter(|n| *n <= u64::MAX as u128);

        let uncapped = max.is_zero();
        match nanos {
            Some(n) if uncapped || n <= max.as_nanos() => Ok(Duration::from_nanos(n as u64)),
            Some(_) => Ok(max),
            None if uncapped => Err(BackoffError::Overflow),
            None => Ok(max),
        }
    }
}

/// Parses a backoff duration. Returns `None` for an empty value.
fn parse_backoff_duration(
    field: &'static str,
    value: &str,
) -> Result<Option<Duration>, BackoffError> {
    if value.is_empty() {
        return Ok(None);
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Some(Duration::from_secs(secs)));
    }
    duration::parse(value)
        .map(Some)
        .map_err(|source| BackoffError::Duration {
            field,
            value: value.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn delays(strategy: &RetryStrategy, attempts: &[u32]) -> Vec<i64> {
        attempts
            .iter()
            .map(|a| {
                let at = strategy.next_retry_at(start(), *a).unwrap();
                (at - start()).num_seconds()
            })
            .collect()
    }

    #[test]
    fn default_backoff() {
        let strategy = RetryStrategy::default();
        assert_eq!(
            delays(&strategy, &[0, 1, 2, 3, 4, 5, 6]),
            vec![5, 10, 20, 40, 80, 160, 180]
        );
        assert_eq!(delays(&strategy, &[80, 100]), vec![180, 180]);
    }

    #[test]
    fn custom_backoff() {
        let strategy = RetryStrategy {
            limit: 5,
            backoff: Some(Backoff {
                duration: "2s".to_string(),
                factor: Some(3),
                max_duration: "1m".to_string(),
            }),
        };
        assert_eq!(
            delays(&strategy, &[0, 1, 2, 3, 4]),
            vec![2, 6, 18, 54, 60]
        );
    }

    #[test]
    fn bare_seconds() {
        let strategy = RetryStrategy {
            limit: -1,
            backoff: Some(Backoff {
                duration: "10".to_string(),
                factor: Some(1),
                max_duration: "15".to_string(),
            }),
        };
        assert_eq!(delays(&strategy, &[0, 7]), vec![10, 10]);
    }

    #[test]
    fn uncapped() {
        let strategy = RetryStrategy {
            limit: -1,
            backoff: Some(Backoff {
                max_duration: "0".to_string(),
                ..Backoff::default()
            }),
        };
        assert_eq!(delays(&strategy, &[6]), vec![320]);
        assert_eq!(
            strategy.next_retry_at(start(), 100),
            Err(BackoffError::Overflow)
        );
    }

    #[test]
    fn invalid_backoff() {
        let strategy = RetryStrategy {
            limit: 1,
            backoff: Some(Backoff {
                duration: "soon".to_string(),
                ..Backoff::default()
            }),
        };
        assert!(matches!(
            strategy.next_retry_at(start(), 0),
            Err(BackoffError::Duration {
                field: "duration",
                ..
            })
        ));

        let strategy = RetryStrategy {
            limit: 1,
            backoff: Some(Backoff {
                factor: Some(0),
                ..Backoff::default()
            }),
        };
        assert_eq!(
            strategy.next_retry_at(start(), 0),
            Err(BackoffError::Factor(0))
        );
    }

    #[test]
    fn attempts_remaining() {
        let limited = RetryStrategy {
            limit: 2,
            backoff: None,
        };
        assert!(limited.has_attempts_remaining(0));
        assert!(limited.has_attempts_remaining(1));
        assert!(!limited.has_attempts_remaining(2));

        let none = RetryStrategy::default();
        assert!(!none.has_attempts_remaining(0));

        let unlimited = RetryStrategy {
            limit: -1,
            backoff: None,
        };
        assert!(unlimited.has_attempts_remaining(1_000));
    }
}
