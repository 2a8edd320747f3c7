//! Configuration for the multiplexer and the engine process it supervises.
//!
//! The struct is designed to be deserialized from a TOML file with `serde`,
//! layered with `NANOTIMER_*` environment overrides through the `config`
//! crate. Every field has a default, so an empty file (or no file at all) is a
//! valid configuration.

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings for one [`crate::timer::NanoTimer`] instance.
#[derive(Debug, Clone, Deserialize)]
pub struct NanoTimerConfig {
    /// Path to the timing engine binary. A bare name is looked up on `PATH`.
    #[serde(default = "default_engine_path")]
    pub engine_path: PathBuf,

    /// Passes `-d` to the engine so it writes diagnostics to stderr.
    #[serde(default)]
    pub engine_debug: bool,

    /// How long teardown waits for the engine to exit on its own after its
    /// stdin is closed, before killing it.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Reports the engine's exit status at `info` instead of `debug`.
    #[serde(default)]
    pub logging: bool,
}

impl NanoTimerConfig {
    /// Builds a configuration pointing at a specific engine binary, with every
    /// other setting at its default.
    pub fn with_engine(path: impl Into<PathBuf>) -> Self {
        Self {
            engine_path: path.into(),
            ..Self::default()
        }
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Loads settings from an optional TOML file, then applies `NANOTIMER_*`
    /// environment variables on top (e.g. `NANOTIMER_ENGINE_PATH`).
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder
            .add_source(config::Environment::with_prefix("NANOTIMER").try_parsing(true))
            .build()
            .context("failed to assemble nanotimer configuration")?
            .try_deserialize()
            .context("invalid nanotimer configuration")
    }
}

// --- Default value functions for serde ---

fn default_engine_path() -> PathBuf {
    PathBuf::from("nanoengine")
}

fn default_grace_period_ms() -> u64 {
    50
}

impl Default for NanoTimerConfig {
    fn default() -> Self {
        Self {
            engine_path: default_engine_path(),
            engine_debug: false,
            grace_period_ms: default_grace_period_ms(),
            logging: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_stock_engine() {
        let config = NanoTimerConfig::default();
        assert_eq!(config.engine_path, PathBuf::from("nanoengine"));
        assert_eq!(config.grace_period(), Duration::from_millis(50));
        assert!(!config.engine_debug);
        assert!(!config.logging);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: NanoTimerConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "engine_path = \"/opt/bin/timer\"\ngrace_period_ms = 200\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.engine_path, PathBuf::from("/opt/bin/timer"));
        assert_eq!(config.grace_period_ms, 200);
        assert!(!config.logging);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let config =
            NanoTimerConfig::load(Some(Path::new("/nonexistent/nanotimer.toml"))).unwrap();
        assert_eq!(config.grace_period_ms, 50);
    }
}
