//! Wall-clock measurement of arbitrary work, independent of the engine.
//!
//! Three shapes of work are supported: a plain closure ([`time`]), a closure
//! that reports its own completion through a continuation ([`time_with`]),
//! and a future ([`time_future`]). Each reports the elapsed time in the unit
//! the caller asks for.

use crate::common::TimeUnit;
use std::future::Future;
use std::time::{Duration, Instant};

/// Elapsed time, expressed in the requested unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Elapsed {
    Seconds(f64),
    Milliseconds(f64),
    Microseconds(f64),
    Nanoseconds(u128),
    /// No unit was requested: whole seconds plus the nanosecond remainder.
    Raw { secs: u64, nanos: u32 },
}

impl Elapsed {
    /// Expresses `duration` in `unit`, or as a raw pair when `unit` is `None`.
    pub fn from_duration(duration: Duration, unit: Option<TimeUnit>) -> Self {
        let secs = duration.as_secs_f64();
        match unit {
            Some(TimeUnit::Seconds) => Elapsed::Seconds(secs),
            Some(TimeUnit::Milliseconds) => Elapsed::Milliseconds(secs * 1e3),
            Some(TimeUnit::Microseconds) => Elapsed::Microseconds(secs * 1e6),
            Some(TimeUnit::Nanoseconds) => Elapsed::Nanoseconds(duration.as_nanos()),
            None => Elapsed::Raw {
                secs: duration.as_secs(),
                nanos: duration.subsec_nanos(),
            },
        }
    }

    /// The value as a float in its own unit; raw pairs become seconds.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Elapsed::Seconds(v) | Elapsed::Milliseconds(v) | Elapsed::Microseconds(v) => v,
            Elapsed::Nanoseconds(n) => n as f64,
            Elapsed::Raw { secs, nanos } => secs as f64 + f64::from(nanos) / 1e9,
        }
    }
}

impl std::fmt::Display for Elapsed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Elapsed::Seconds(v) => write!(f, "{v:.6}s"),
            Elapsed::Milliseconds(v) => write!(f, "{v:.3}ms"),
            Elapsed::Microseconds(v) => write!(f, "{v:.3}us"),
            Elapsed::Nanoseconds(n) => write!(f, "{n}ns"),
            Elapsed::Raw { secs, nanos } => write!(f, "{secs}s {nanos}ns"),
        }
    }
}

/// Runs `task` now and reports how long it took.
pub fn time<R>(task: impl FnOnce() -> R, unit: Option<TimeUnit>) -> (R, Elapsed) {
    let start = Instant::now();
    let result = task();
    (result, Elapsed::from_duration(start.elapsed(), unit))
}

/// The continuation handed to a task timed with [`time_with`].
///
/// Calling [`Done::done`] stops the clock and delivers the elapsed time.
/// Dropping it without calling delivers nothing.
pub struct Done {
    start: Instant,
    unit: Option<TimeUnit>,
    callback: Box<dyn FnOnce(Elapsed) + Send>,
}

impl Done {
    pub fn done(self) {
        (self.callback)(Elapsed::from_duration(self.start.elapsed(), self.unit));
    }
}

/// Starts the clock and runs `task`, which signals its own completion by
/// calling the [`Done`] it is given, possibly from another thread and long
/// after `task` has returned.
pub fn time_with(
    task: impl FnOnce(Done),
    unit: Option<TimeUnit>,
    callback: impl FnOnce(Elapsed) + Send + 'static,
) {
    task(Done {
        start: Instant::now(),
        unit,
        callback: Box::new(callback),
    });
}

/// Awaits `future` and reports how long it took.
pub async fn time_future<F: Future>(future: F, unit: Option<TimeUnit>) -> (F::Output, Elapsed) {
    let start = Instant::now();
    let output = future.await;
    (output, Elapsed::from_duration(start.elapsed(), unit))
}
