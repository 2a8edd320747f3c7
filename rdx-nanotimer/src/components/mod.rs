//! Contains the building blocks the multiplexer is assembled from.
//!
//! `task` holds what a caller hands in (the work and its completion callback);
//! `registry` tracks which of those are still waiting on the engine. The
//! [`crate::timer::NanoTimer`] owns one registry and drives it from the
//! engine's notification stream.

pub mod registry;
pub mod task;
