//! Defines the events broadcast by a [`crate::timer::NanoTimer`].
//!
//! These are purely observational: dispatch never waits on subscribers, and a
//! lagging subscriber only loses events, never blocks timers.

use crate::common::{TimerId, TimerKind};
use crate::protocol::DurationSpec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    /// A timer was registered and its command sent to the engine.
    Scheduled {
        id: TimerId,
        kind: TimerKind,
        spec: DurationSpec,
    },
    /// A timer's task ran.
    Fired { id: TimerId, kind: TimerKind },
    /// The engine acknowledged a cancelled timeout.
    Cancelled { id: TimerId },
    /// A notification arrived for an id with no live entry and was discarded.
    Dropped { id: TimerId },
    /// The engine link was torn down. Sent at most once per multiplexer.
    Retired,
}
