//! `nanoengine`: the reference timing engine.
//!
//! Reads commands from stdin, waits on Tokio timers, and writes notifications
//! to stdout, one line each. Exits when stdin closes.

use anyhow::{Context, Result};
use clap::Parser;
use nanotimer::common::TimerId;
use nanotimer::protocol::{Command, Notification};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, Level};

const PROTOCOL_HELP: &str = "\
Commands (to be sent via stdin):
  setTimeout <id> <duration>    Set a timeout with a unique ID and duration
  clearTimeout <id>             Clear a timeout with the given ID
  setInterval <id> <duration>   Set an interval with a unique ID and duration
  clearInterval <id>            Clear an interval with the given ID

Events (written to stdout):
  timeout <id> <waitNs>         The timeout fired after waitNs nanoseconds
  clearedTimeout <id> <waitNs>  The timeout was cleared waitNs nanoseconds after it was set
  interval <id>                 The interval fired

Duration format: an integer followed by a unit
  s - seconds (2s)   m - milliseconds (500m)   u - microseconds (1000u)   n - nanoseconds (500000n)";

/// High-precision timer engine, driven over stdin/stdout.
#[derive(Debug, Parser)]
#[command(name = "nanoengine", version, after_help = PROTOCOL_HELP)]
struct Args {
    /// Enable debug output on stderr
    #[arg(short, long)]
    debug: bool,
}

const OUTPUT_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout carries the protocol, so diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if args.debug { Level::DEBUG } else { Level::WARN })
        .with_target(false)
        .init();
    debug!(?args, "debugging enabled");

    Engine::run(tokio::io::stdin(), tokio::io::stdout()).await
}

struct PendingTimeout {
    started: Instant,
    handle: JoinHandle<()>,
}

/// Owns every live timer. Only the command loop touches these maps, so a
/// firing and a clear for the same id can never both report.
struct Engine {
    timeouts: HashMap<TimerId, PendingTimeout>,
    intervals: HashMap<TimerId, JoinHandle<()>>,
    output: mpsc::Sender<Notification>,
    fired: mpsc::UnboundedSender<TimerId>,
}

impl Engine {
    async fn run(
        input: impl AsyncRead + Unpin,
        output: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Result<()> {
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CAPACITY);
        let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_notifications(output_rx, output));
        let mut engine = Engine {
            timeouts: HashMap::new(),
            intervals: HashMap::new(),
            output: output_tx,
            fired: fired_tx,
        };

        debug!("waiting for commands");
        let mut lines = BufReader::new(input).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => match line.context("failed to read stdin")? {
                    Some(line) => engine.handle_line(&line).await,
                    None => break,
                },
                Some(id) = fired_rx.recv() => engine.complete_timeout(id).await,
            }
        }
        debug!("stdin closed, shutting down");

        engine.shutdown();
        writer.await.context("notification writer panicked")??;
        Ok(())
    }

    async fn handle_line(&mut self, line: &str) {
        debug!(line, "received line");
        let command = match Command::decode(line) {
            Ok(command) => command,
            Err(noise) => {
                debug!(%noise, "invalid command");
                return;
            }
        };
        match command {
            Command::SetTimeout { id, spec } => self.set_timeout(id, spec.to_duration()),
            Command::ClearTimeout { id } => self.clear_timeout(id).await,
            Command::SetInterval { id, spec } => self.set_interval(id, spec.to_duration()),
            Command::ClearInterval { id } => self.clear_interval(id),
        }
    }

    fn set_timeout(&mut self, id: TimerId, duration: Duration) {
        if self.timeouts.contains_key(&id) {
            debug!(%id, "timeout already exists");
            return;
        }
        debug!(%id, ?duration, "setting timeout");
        let fired = self.fired.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            fired.send(id).ok();
        });
        self.timeouts.insert(
            id,
            PendingTimeout {
                started: Instant::now(),
                handle,
            },
        );
    }

    async fn complete_timeout(&mut self, id: TimerId) {
        if let Some(pending) = self.timeouts.remove(&id) {
            let wait_time_ns = elapsed_ns(pending.started);
            self.emit(Notification::Timeout { id, wait_time_ns }).await;
        }
    }

    async fn clear_timeout(&mut self, id: TimerId) {
        match self.timeouts.remove(&id) {
            Some(pending) => {
                debug!(%id, "clearing timeout");
                pending.handle.abort();
                let wait_time_ns = elapsed_ns(pending.started);
                self.emit(Notification::ClearedTimeout { id, wait_time_ns })
                    .await;
            }
            None => debug!(%id, "no timeout found"),
        }
    }

    fn set_interval(&mut self, id: TimerId, period: Duration) {
        if self.intervals.contains_key(&id) {
            debug!(%id, "interval already exists");
            return;
        }
        debug!(%id, ?period, "setting interval");
        let handle = tokio::spawn(run_interval(id, period, self.output.clone()));
        self.intervals.insert(id, handle);
    }

    fn clear_interval(&mut self, id: TimerId) {
        match self.intervals.remove(&id) {
            Some(handle) => {
                debug!(%id, "clearing interval");
                handle.abort();
            }
            None => debug!(%id, "no interval found"),
        }
    }

    async fn emit(&self, notification: Notification) {
        if self.output.send(notification).await.is_err() {
            debug!(%notification, "stdout is gone, dropping event");
        }
    }

    /// Stops every timer. Notifications already queued are still written once
    /// the engine's own sender is dropped.
    fn shutdown(self) {
        for (_, pending) in self.timeouts {
            pending.handle.abort();
        }
        for (_, handle) in self.intervals {
            handle.abort();
        }
    }
}

async fn run_interval(id: TimerId, period: Duration, output: mpsc::Sender<Notification>) {
    if period.is_zero() {
        // No period to wait on: fire as fast as the writer keeps up.
        while output.send(Notification::Interval { id }).await.is_ok() {
            tokio::task::yield_now().await;
        }
        return;
    }
    let Some(first) = Instant::now().checked_add(period) else {
        debug!(%id, ?period, "interval lies beyond the clock, it will never fire");
        return std::future::pending().await;
    };
    let mut ticker = tokio::time::interval_at(first, period);
    loop {
        ticker.tick().await;
        if output.send(Notification::Interval { id }).await.is_err() {
            return;
        }
    }
}

async fn write_notifications(
    mut notifications: mpsc::Receiver<Notification>,
    output: impl AsyncWrite + Unpin,
) -> Result<()> {
    let mut output = BufWriter::new(output);
    while let Some(notification) = notifications.recv().await {
        output
            .write_all(format!("{notification}\n").as_bytes())
            .await
            .context("failed to write stdout")?;
        output.flush().await.context("failed to flush stdout")?;
    }
    Ok(())
}

fn elapsed_ns(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX)
}
