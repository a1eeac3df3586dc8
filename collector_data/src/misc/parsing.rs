pub mod interval {
    use std::{fmt, ops::Deref, str::FromStr, time::Duration};

    use itertools::Itertools as _;
    use thiserror::Error;

    /// A strictly positive polling interval.
    ///
    /// Accepts a plain number of seconds (`2`, `0.5`) or an integer with one of the suffixes
    /// `ms`, `s`, `m`, `h` (`500ms`, `30s`, `5m`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    pub struct Interval(pub Duration);

    #[derive(Debug, Clone, PartialEq, Error)]
    pub enum IntervalParseError {
        #[error("parsing interval: empty input")]
        Empty,
        #[error("parsing interval: {0}: invalid suffix (only h, m, s, ms)")]
        InvalidSuffix(String),
        #[error("parsing interval: {0}: not a number")]
        NotANumber(String),
        #[error("parsing interval: {0}: must be greater than zero")]
        NotPositive(String),
    }

    impl FromStr for Interval {
        type Err = IntervalParseError;

        fn from_str(value: &str) -> Result<Self, Self::Err> {
            use IntervalParseError::*;
            let value = value.trim();
            if value.is_empty() {
                return Err(Empty);
            }

            if let Ok(secs) = value.parse::<f64>() {
                return match Duration::try_from_secs_f64(secs) {
                    Ok(duration) if !duration.is_zero() => Ok(Interval(duration)),
                    _ => Err(NotPositive(value.to_owned())),
                };
            }

            let chars = value.chars().collect_vec();
            let (amount, scale): (&[char], fn(u64) -> Duration) = match chars.as_slice() {
                [millis @ .., 'm', 's'] => (millis, Duration::from_millis),
                [secs @ .., 's'] => (secs, Duration::from_secs),
                [mins @ .., 'm'] => (mins, |m| Duration::from_secs(m.saturating_mul(60))),
                [hours @ .., 'h'] => (hours, |h| Duration::from_secs(h.saturating_mul(3600))),
                _ => return Err(InvalidSuffix(value.to_owned())),
            };
            let amount = amount.iter().collect::<String>();
            let amount = amount
                .trim()
                .parse::<u64>()
                .map_err(|_| NotANumber(value.to_owned()))?;
            if amount == 0 {
                return Err(NotPositive(value.to_owned()));
            }
            Ok(Interval(scale(amount)))
        }
    }

    /// Seconds, in a form [`Interval::from_str`] reads back.
    impl fmt::Display for Interval {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0.as_secs_f64())
        }
    }

    impl Deref for Interval {
        type Target = Duration;

        fn deref(&self) -> &Self::Target {
            &self.0
        }
    }

    impl From<Interval> for Duration {
        fn from(value: Interval) -> Self {
            value.0
        }
    }
}

pub use interval::{Interval, IntervalParseError};

/// Numeric part of a unit-suffixed cell such as `1234 MiB`: the first run of ASCII digits,
/// wherever it starts. `None` if the cell holds no digits or the run overflows.
pub fn leading_digits(cell: &str) -> Option<u64> {
    let digits: String = cell
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Splits one line of the telemetry CSV. Whitespace following a delimiter is dropped,
/// everything else (including trailing whitespace) is kept.
pub fn split_csv_line(line: &str) -> Vec<&str> {
    line.split(',').map(str::trim_start).collect()
}
