use anyhow::{Context, Result};
use chrono::Local;
use colored::Colorize;
use nanotimer::prelude::*;
use nanotimer::time::time_future;
use nanotimer::VERSION as LIB_VERSION;
use rustyline::highlight::Highlighter;
use rustyline::Editor;
use rustyline_derive::{Completer, Helper, Hinter, Validator};
use std::borrow::Cow;
use std::env;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const SHELL_VERSION: &str = env!("CARGO_PKG_VERSION");
const CONFIG_FILE: &str = "nanoshell.toml";

/// A custom helper struct for rustyline that enables syntax highlighting.
#[derive(Completer, Helper, Hinter, Validator)]
struct ShellHighlighter;

impl Highlighter for ShellHighlighter {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if let Some((command, rest)) = line.split_once(' ') {
            Cow::Owned(format!("{} {}", command.yellow().bold(), rest.yellow()))
        } else {
            Cow::Owned(line.yellow().bold().to_string())
        }
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

fn print_banner() {
    if env::var("QUIET_MODE").is_ok() {
        return;
    }
    let rule = "-".repeat(72);
    println!("{}", "nanoshell: high-resolution timers over a timing engine".cyan());
    println!("{}", rule.dimmed());
    println!(
        "          Shell   v{:<8} Library   v{:<8}",
        SHELL_VERSION, LIB_VERSION
    );
    println!(
        "{}",
        "    Distributed under the MIT OR Apache-2.0 license. Use at your own risk.".dimmed()
    );
    println!("{}", rule.dimmed());
}

fn print_help() {
    println!("Available commands:");
    println!("  timeout <spec>        - Runs a one-shot timer (e.g. 'timeout 500m').");
    println!("  interval <spec>       - Starts a repeating timer (e.g. 'interval 1s').");
    println!("  clear timeout         - Cancels the active timeout.");
    println!("  clear interval        - Stops the active interval.");
    println!("  status                - Shows the active timers and engine state.");
    println!("  time <spec>           - Measures how long a local sleep of <spec> takes.");
    println!("  exit                  - Quits the shell.");
    println!("Specs are an integer and a unit: s, m (ms), u (us) or n (ns).");
}

fn stamp() -> String {
    Local::now().format("%H:%M:%S%.6f").to_string()
}

/// Finds the engine binary. A bare default name prefers a `nanoengine` built
/// alongside this shell over whatever `PATH` resolves.
fn resolve_engine(configured: &Path) -> PathBuf {
    if configured != Path::new("nanoengine") {
        return configured.to_path_buf();
    }
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("nanoengine")))
        .filter(|sibling| sibling.is_file())
        .unwrap_or_else(|| configured.to_path_buf())
}

/// Prints lifecycle events for one multiplexer in the background.
fn spawn_event_listener(timer: &NanoTimer) {
    tokio::spawn(listen(timer.subscribe_events(), |line| println!("{line}")));
}

/// Reports events until every handle to the multiplexer is gone. A
/// cancellation ack can arrive after the engine has retired, so `Retired`
/// does not end the listener.
async fn listen(mut events: broadcast::Receiver<TimerEvent>, mut report: impl FnMut(String)) {
    loop {
        match events.recv().await {
            Ok(TimerEvent::Cancelled { id }) => {
                report(format!("<-- [{}] timeout #{} cancelled", stamp(), id));
            }
            Ok(TimerEvent::Retired) => {
                report(format!("<-- [{}] {}", stamp(), "engine retired".dimmed()));
            }
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => {
                debug!(missed, "event listener fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Holds the current multiplexer and replaces it once it has retired.
struct Session {
    config: NanoTimerConfig,
    timer: Option<NanoTimer>,
}

impl Session {
    async fn timer(&mut self) -> Result<&NanoTimer> {
        let stale = match &self.timer {
            Some(timer) => timer.is_destroyed().await,
            None => true,
        };
        if stale {
            let timer = NanoTimer::new(self.config.clone()).with_context(|| {
                format!(
                    "failed to start engine '{}'",
                    self.config.engine_path.display()
                )
            })?;
            spawn_event_listener(&timer);
            info!("engine started");
            self.timer = Some(timer);
        }
        self.timer
            .as_ref()
            .context("no timer after start")
    }

    /// The current multiplexer, only if it is still live.
    async fn live(&self) -> Option<&NanoTimer> {
        let timer = self.timer.as_ref()?;
        if timer.is_destroyed().await {
            return None;
        }
        Some(timer)
    }

    async fn set_timeout(&mut self, spec: &str) -> Result<()> {
        let label = spec.to_string();
        let id = self
            .timer()
            .await?
            .set_timeout_with(
                spec,
                move || println!("<-- [{}] {} timeout fired", stamp(), label.green()),
                |done| println!("    engine waited {}ns", done.wait_time),
            )
            .await?;
        println!("--> Timeout #{} set for {}", id, spec);
        Ok(())
    }

    async fn set_interval(&mut self, spec: &str) -> Result<()> {
        let label = spec.to_string();
        let mut count: u64 = 0;
        let id = self
            .timer()
            .await?
            .set_interval(spec, move || {
                count += 1;
                println!(
                    "<-- [{}] {} interval fired (#{})",
                    stamp(),
                    label.green(),
                    count
                );
            })
            .await?;
        println!("--> Interval #{} running every {}", id, spec);
        Ok(())
    }

    async fn clear(&mut self, kind: TimerKind) -> Result<()> {
        let Some(timer) = self.live().await else {
            println!("--> No engine is running.");
            return Ok(());
        };
        match kind {
            TimerKind::Timeout => timer.clear_timeout().await?,
            TimerKind::Interval => timer.clear_interval().await?,
        }
        println!("--> Cleared {}.", kind);
        Ok(())
    }

    async fn status(&self) {
        match self.live().await {
            Some(timer) => {
                let mark = |active: bool| if active { "active".green() } else { "idle".dimmed() };
                println!("Engine: {}", "running".green());
                println!("  timeout:  {}", mark(timer.has_timeout().await));
                println!("  interval: {}", mark(timer.has_interval().await));
                println!("  awaiting engine: {}", timer.pending().await);
            }
            None => println!("Engine: {}", "retired".dimmed()),
        }
    }

    async fn shutdown(self) {
        if let Some(timer) = self.timer {
            timer.destroy().await;
            timer.closed().await;
        }
    }
}

async fn time_sleep(spec: &str) -> Result<()> {
    let spec: DurationSpec = spec.parse()?;
    let ((), elapsed) =
        time_future(tokio::time::sleep(spec.to_duration()), Some(spec.unit)).await;
    println!("--> Sleeping {} took {}", spec, elapsed.to_string().cyan());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let mut config = NanoTimerConfig::load(Some(Path::new(CONFIG_FILE)))?;
    config.engine_path = resolve_engine(&config.engine_path);
    info!("Using engine {}", config.engine_path.display().to_string().cyan());

    let mut session = Session {
        config,
        timer: None,
    };

    let mut rl = Editor::new()?;
    rl.set_helper(Some(ShellHighlighter));

    println!("{} is ready. Type 'help' for commands or 'exit' to quit.", "nanoshell".cyan());

    loop {
        let prompt = format!("{}", ">> ".cyan().bold());
        let line = match rl.readline(&prompt) {
            Ok(line) => line,
            Err(_) => {
                println!("Exiting nanoshell...");
                break;
            }
        };
        rl.add_history_entry(line.as_str())?;
        let args = line.split_whitespace().collect::<Vec<_>>();

        let outcome = match args.as_slice() {
            ["timeout", spec] => session.set_timeout(spec).await,
            ["interval", spec] => session.set_interval(spec).await,
            ["clear", "timeout"] => session.clear(TimerKind::Timeout).await,
            ["clear", "interval"] => session.clear(TimerKind::Interval).await,
            ["status"] => {
                session.status().await;
                Ok(())
            }
            ["time", spec] => time_sleep(spec).await,
            ["help"] => {
                print_help();
                Ok(())
            }
            ["exit"] => break,
            [] => Ok(()),
            ["timeout" | "interval" | "time", ..] => {
                println!("Usage: {} <spec>", args[0]);
                Ok(())
            }
            ["clear", ..] => {
                println!("Usage: clear timeout | clear interval");
                Ok(())
            }
            _ => {
                println!("Unknown command: '{}'. Type 'help'.", line.trim());
                Ok(())
            }
        };
        if let Err(e) = outcome {
            println!("{} {:#}", "Error:".red().bold(), e);
        }
    }

    session.shutdown().await;
    Ok(())
}
