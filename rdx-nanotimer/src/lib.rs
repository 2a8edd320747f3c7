//! # Nanotimer
//!
//! High-resolution timeouts and intervals, delegated to an external timing
//! engine process.
//!
//! Nanotimer does no waiting of its own. It spawns a timing engine, writes
//! one-line commands to the engine's stdin, and turns the engine's one-line
//! notifications back into calls to your closures.
//!
//! ## Core Concepts
//!
//! - **Engine**: a separate process that sleeps with whatever precision it
//!   can manage and reports back. This crate ships a reference engine,
//!   `nanoengine`, but any binary speaking the same protocol will do.
//! - **Multiplexer**: a [`NanoTimer`](timer::NanoTimer) owns one engine and
//!   correlates its notifications with the timers that asked for them. It
//!   tracks at most one active timeout and one active interval at a time.
//! - **Self-retiring**: once neither a timeout nor an interval is active, the
//!   multiplexer shuts its engine down.
//! - **Duration specs**: waits are written as an integer and a unit
//!   character: `2s`, `500m` (milliseconds), `250u` (microseconds), `900n`.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use nanotimer::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // 1. Point the multiplexer at an engine binary.
//!     let config = NanoTimerConfig::with_engine("/usr/local/bin/nanoengine");
//!
//!     // 2. Start the engine.
//!     let timer = NanoTimer::new(config)?;
//!
//!     // 3. Schedule work.
//!     timer
//!         .set_timeout_with(
//!             "500m",
//!             || println!("half a second has passed"),
//!             |done| println!("engine waited {}ns", done.wait_time),
//!         )
//!         .await?;
//!
//!     // 4. The engine retires itself after the timeout fires.
//!     timer.closed().await;
//!     Ok(())
//! }
//! ```

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Declare all the modules in the crate.
pub mod common;
pub mod components;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod supervisor;
pub mod time;
pub mod timer;

/// A prelude module for easy importing of the most common Nanotimer types.
pub mod prelude {
    pub use crate::common::{TimeUnit, TimerId, TimerKind};
    pub use crate::components::task::{Completion, Task};
    pub use crate::config::NanoTimerConfig;
    pub use crate::error::NanoTimerError;
    pub use crate::events::TimerEvent;
    pub use crate::protocol::DurationSpec;
    pub use crate::time::Elapsed;
    pub use crate::timer::NanoTimer;
}
