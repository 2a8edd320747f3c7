//! The line protocol spoken between the multiplexer and the timing engine.
//!
//! Everything here is pure: no I/O and no state. Commands travel host → engine,
//! notifications travel engine → host, one per line, fields separated by
//! whitespace. Lines are produced without their trailing newline; framing is the
//! supervisor's job.
//!
//! ```text
//! setTimeout <id> <spec>        timeout <id> <waitNs>
//! clearTimeout <id>             clearedTimeout <id> <waitNs>
//! setInterval <id> <spec>       interval <id>
//! clearInterval <id>
//! ```

use crate::common::{TimeUnit, TimerId, TimerKind};
use crate::error::{NanoTimerError, ProtocolNoise};
use std::fmt;
use std::str::{FromStr, SplitWhitespace};
use std::time::Duration;

/// A wait length as written on the wire: an integer immediately followed by a
/// unit character, e.g. `500m` or `2s`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DurationSpec {
    pub magnitude: u64,
    pub unit: TimeUnit,
}

impl DurationSpec {
    pub fn new(magnitude: u64, unit: TimeUnit) -> Self {
        Self { magnitude, unit }
    }

    pub fn to_duration(self) -> Duration {
        self.unit.duration(self.magnitude)
    }
}

impl FromStr for DurationSpec {
    type Err = NanoTimerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| NanoTimerError::Validation {
            spec: s.to_string(),
            reason,
        };
        let unit_char = s.chars().last().ok_or_else(|| invalid("empty"))?;
        let unit = TimeUnit::from_char(unit_char)
            .ok_or_else(|| invalid("unit must be one of 's', 'm', 'u' or 'n'"))?;
        let digits = &s[..s.len() - unit_char.len_utf8()];
        if digits.is_empty() {
            return Err(invalid("missing magnitude"));
        }
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("magnitude must be a non-negative integer"));
        }
        let magnitude = digits
            .parse()
            .map_err(|_| invalid("magnitude is out of range"))?;
        Ok(Self { magnitude, unit })
    }
}

impl fmt::Display for DurationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.magnitude, self.unit)
    }
}

/// A host → engine instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetTimeout { id: TimerId, spec: DurationSpec },
    ClearTimeout { id: TimerId },
    SetInterval { id: TimerId, spec: DurationSpec },
    ClearInterval { id: TimerId },
}

impl Command {
    /// Builds the `set*` command for a timer of the given kind.
    pub fn set(kind: TimerKind, id: TimerId, spec: DurationSpec) -> Self {
        match kind {
            TimerKind::Timeout => Command::SetTimeout { id, spec },
            TimerKind::Interval => Command::SetInterval { id, spec },
        }
    }

    /// Builds the `clear*` command for a timer of the given kind.
    pub fn clear(kind: TimerKind, id: TimerId) -> Self {
        match kind {
            TimerKind::Timeout => Command::ClearTimeout { id },
            TimerKind::Interval => Command::ClearInterval { id },
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Command::SetTimeout { .. } => "setTimeout",
            Command::ClearTimeout { .. } => "clearTimeout",
            Command::SetInterval { .. } => "setInterval",
            Command::ClearInterval { .. } => "clearInterval",
        }
    }

    /// Encodes the command as a single line, without the newline.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Decodes a command line. Used by the engine side of the protocol.
    pub fn decode(line: &str) -> Result<Self, ProtocolNoise> {
        let mut fields = line.split_whitespace();
        let verb = fields.next().ok_or(ProtocolNoise::Empty)?;
        if !matches!(
            verb,
            "setTimeout" | "clearTimeout" | "setInterval" | "clearInterval"
        ) {
            return Err(ProtocolNoise::UnknownKind(verb.to_string()));
        }
        let id = parse_id(&mut fields)?;
        let command = match verb {
            "setTimeout" => Command::SetTimeout {
                id,
                spec: parse_spec(&mut fields)?,
            },
            "clearTimeout" => Command::ClearTimeout { id },
            "setInterval" => Command::SetInterval {
                id,
                spec: parse_spec(&mut fields)?,
            },
            "clearInterval" => Command::ClearInterval { id },
            other => return Err(ProtocolNoise::UnknownKind(other.to_string())),
        };
        expect_end(fields)?;
        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetTimeout { id, spec } | Command::SetInterval { id, spec } => {
                write!(f, "{} {} {}", self.verb(), id, spec)
            }
            Command::ClearTimeout { id } | Command::ClearInterval { id } => {
                write!(f, "{} {}", self.verb(), id)
            }
        }
    }
}

/// An engine → host event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// One-shot `id` fired after waiting `wait_time_ns`.
    Timeout { id: TimerId, wait_time_ns: u64 },
    /// One-shot `id` was cancelled `wait_time_ns` after it was set.
    ClearedTimeout { id: TimerId, wait_time_ns: u64 },
    /// Repeating `id` fired once.
    Interval { id: TimerId },
}

impl Notification {
    pub fn id(&self) -> TimerId {
        match *self {
            Notification::Timeout { id, .. }
            | Notification::ClearedTimeout { id, .. }
            | Notification::Interval { id } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Timeout { .. } => "timeout",
            Notification::ClearedTimeout { .. } => "clearedTimeout",
            Notification::Interval { .. } => "interval",
        }
    }

    /// Encodes the notification as a single line, without the newline.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Decodes one engine output line.
    ///
    /// Anything unrecognised comes back as [`ProtocolNoise`] rather than a
    /// panic, so a garbled line can never take the reader down.
    pub fn decode(line: &str) -> Result<Self, ProtocolNoise> {
        let mut fields = line.split_whitespace();
        let kind = fields.next().ok_or(ProtocolNoise::Empty)?;
        if !matches!(kind, "timeout" | "clearedTimeout" | "interval") {
            return Err(ProtocolNoise::UnknownKind(kind.to_string()));
        }
        let id = parse_id(&mut fields)?;
        let notification = match kind {
            "timeout" => Notification::Timeout {
                id,
                wait_time_ns: parse_wait(&mut fields)?,
            },
            "clearedTimeout" => Notification::ClearedTimeout {
                id,
                wait_time_ns: parse_wait(&mut fields)?,
            },
            "interval" => Notification::Interval { id },
            other => return Err(ProtocolNoise::UnknownKind(other.to_string())),
        };
        expect_end(fields)?;
        Ok(notification)
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Timeout { id, wait_time_ns }
            | Notification::ClearedTimeout { id, wait_time_ns } => {
                write!(f, "{} {} {}", self.kind(), id, wait_time_ns)
            }
            Notification::Interval { id } => write!(f, "{} {}", self.kind(), id),
        }
    }
}

fn parse_id(fields: &mut SplitWhitespace<'_>) -> Result<TimerId, ProtocolNoise> {
    let raw = fields.next().ok_or(ProtocolNoise::MissingField("id"))?;
    raw.parse().map_err(|_| ProtocolNoise::Malformed {
        field: "id",
        value: raw.to_string(),
    })
}

fn parse_wait(fields: &mut SplitWhitespace<'_>) -> Result<u64, ProtocolNoise> {
    let raw = fields.next().ok_or(ProtocolNoise::MissingField("waitTime"))?;
    raw.parse().map_err(|_| ProtocolNoise::Malformed {
        field: "waitTime",
        value: raw.to_string(),
    })
}

fn parse_spec(fields: &mut SplitWhitespace<'_>) -> Result<DurationSpec, ProtocolNoise> {
    let raw = fields.next().ok_or(ProtocolNoise::MissingField("duration"))?;
    raw.parse().map_err(|_| ProtocolNoise::Malformed {
        field: "duration",
        value: raw.to_string(),
    })
}

fn expect_end(mut fields: SplitWhitespace<'_>) -> Result<(), ProtocolNoise> {
    match fields.next() {
        Some(_) => Err(ProtocolNoise::Trailing),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_spec_parses_every_unit() {
        for (raw, magnitude, unit) in [
            ("2s", 2, TimeUnit::Seconds),
            ("500m", 500, TimeUnit::Milliseconds),
            ("1000u", 1000, TimeUnit::Microseconds),
            ("0n", 0, TimeUnit::Nanoseconds),
        ] {
            let spec: DurationSpec = raw.parse().unwrap();
            assert_eq!(spec, DurationSpec::new(magnitude, unit));
            assert_eq!(spec.to_string(), raw);
        }
    }

    #[test]
    fn duration_spec_rejects_malformed_input() {
        for raw in ["", "s", "5", "5h", "-5s", "+5s", "1.5s", " 5s", "5 s", "99999999999999999999s"] {
            let err = raw.parse::<DurationSpec>().unwrap_err();
            assert!(
                matches!(err, NanoTimerError::Validation { .. }),
                "{raw:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn duration_spec_converts_to_duration() {
        let spec: DurationSpec = "250u".parse().unwrap();
        assert_eq!(spec.to_duration(), Duration::from_micros(250));
    }

    #[test]
    fn commands_encode_without_newline() {
        let spec = DurationSpec::new(500, TimeUnit::Milliseconds);
        assert_eq!(
            Command::set(TimerKind::Timeout, TimerId(1), spec).encode(),
            "setTimeout 1 500m"
        );
        assert_eq!(
            Command::set(TimerKind::Interval, TimerId(2), DurationSpec::new(1, TimeUnit::Seconds))
                .encode(),
            "setInterval 2 1s"
        );
        assert_eq!(Command::clear(TimerKind::Timeout, TimerId(1)).encode(), "clearTimeout 1");
        assert_eq!(Command::clear(TimerKind::Interval, TimerId(2)).encode(), "clearInterval 2");
    }

    #[test]
    fn command_decode_reads_engine_input() {
        assert_eq!(
            Command::decode("setTimeout 7 3s").unwrap(),
            Command::SetTimeout {
                id: TimerId(7),
                spec: DurationSpec::new(3, TimeUnit::Seconds)
            }
        );
        assert_eq!(
            Command::decode("  clearInterval   9 ").unwrap(),
            Command::ClearInterval { id: TimerId(9) }
        );
        assert_eq!(
            Command::decode("setInterval 1").unwrap_err(),
            ProtocolNoise::MissingField("duration")
        );
        assert!(matches!(
            Command::decode("fire 1").unwrap_err(),
            ProtocolNoise::UnknownKind(_)
        ));
    }

    #[test]
    fn notifications_decode() {
        assert_eq!(
            Notification::decode("timeout 1 500000000").unwrap(),
            Notification::Timeout {
                id: TimerId(1),
                wait_time_ns: 500_000_000
            }
        );
        assert_eq!(
            Notification::decode("clearedTimeout 3 1200\r").unwrap(),
            Notification::ClearedTimeout {
                id: TimerId(3),
                wait_time_ns: 1200
            }
        );
        assert_eq!(
            Notification::decode("interval 2").unwrap(),
            Notification::Interval { id: TimerId(2) }
        );
    }

    #[test]
    fn noise_is_reported_not_raised() {
        assert_eq!(Notification::decode("").unwrap_err(), ProtocolNoise::Empty);
        assert_eq!(Notification::decode("   ").unwrap_err(), ProtocolNoise::Empty);
        assert_eq!(
            Notification::decode("timeout").unwrap_err(),
            ProtocolNoise::MissingField("id")
        );
        assert_eq!(
            Notification::decode("timeout 1").unwrap_err(),
            ProtocolNoise::MissingField("waitTime")
        );
        assert!(matches!(
            Notification::decode("timeout one 5").unwrap_err(),
            ProtocolNoise::Malformed { field: "id", .. }
        ));
        assert!(matches!(
            Notification::decode("timeout 1 -5").unwrap_err(),
            ProtocolNoise::Malformed { field: "waitTime", .. }
        ));
        assert_eq!(
            Notification::decode("Debugging enabled").unwrap_err(),
            ProtocolNoise::UnknownKind("Debugging".to_string())
        );
        assert_eq!(
            Notification::decode("interval 2 extra").unwrap_err(),
            ProtocolNoise::Trailing
        );
    }

    #[test]
    fn notification_encoding_matches_engine_output() {
        let fired = Notification::Timeout {
            id: TimerId(4),
            wait_time_ns: 10,
        };
        assert_eq!(fired.encode(), "timeout 4 10");
        assert_eq!(Notification::decode(&fired.encode()).unwrap(), fired);
        assert_eq!(Notification::Interval { id: TimerId(5) }.encode(), "interval 5");
    }
}
