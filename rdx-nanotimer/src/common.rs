//! Contains common, primitive types shared by the codec, the registry and the
//! timing helpers.
//!
//! Using distinct types for timer ids, kinds and units keeps the wire format
//! and the in-process bookkeeping from drifting apart.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Correlates a command sent to the engine with the notifications it produces.
///
/// Ids are minted by a per-multiplexer counter starting at 1 and are never
/// reused within one multiplexer, which keeps late notifications for a
/// cancelled timer from being mistaken for a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TimerId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(TimerId)
    }
}

/// The two flavours of timer the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Fires once, then is gone.
    Timeout,
    /// Fires repeatedly until cleared.
    Interval,
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerKind::Timeout => f.write_str("timeout"),
            TimerKind::Interval => f.write_str("interval"),
        }
    }
}

/// A time unit, spelled on the wire as a single character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Seconds,
    Milliseconds,
    Microseconds,
    Nanoseconds,
}

impl TimeUnit {
    /// Maps a unit character (`s`, `m`, `u`, `n`) to a unit.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            's' => Some(TimeUnit::Seconds),
            'm' => Some(TimeUnit::Milliseconds),
            'u' => Some(TimeUnit::Microseconds),
            'n' => Some(TimeUnit::Nanoseconds),
            _ => None,
        }
    }

    /// Like [`TimeUnit::from_char`], but for a whole format string. Anything
    /// other than exactly one known unit character yields `None`.
    pub fn from_format(format: &str) -> Option<Self> {
        let mut chars = format.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::from_char(c),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            TimeUnit::Seconds => 's',
            TimeUnit::Milliseconds => 'm',
            TimeUnit::Microseconds => 'u',
            TimeUnit::Nanoseconds => 'n',
        }
    }

    /// Builds a `Duration` of `magnitude` units.
    pub fn duration(self, magnitude: u64) -> Duration {
        match self {
            TimeUnit::Seconds => Duration::from_secs(magnitude),
            TimeUnit::Milliseconds => Duration::from_millis(magnitude),
            TimeUnit::Microseconds => Duration::from_micros(magnitude),
            TimeUnit::Nanoseconds => Duration::from_nanos(magnitude),
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}
