//! Ownership of the timing engine process and its pipes.
//!
//! A [`Supervisor`] is the write half of the engine link: it frames commands
//! onto the engine's stdin and sequences teardown. The matching
//! [`NotificationStream`] is the read half, handed to whoever dispatches.
//! Both halves can also be built over in-memory streams, which is how the
//! multiplexer is tested without an OS process.

use crate::config::NanoTimerConfig;
use crate::error::{NanoTimerError, Result};
use crate::protocol::{Command, Notification};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Anything the engine's commands can be written to.
pub type EngineInput = Box<dyn AsyncWrite + Send + Unpin>;
/// Anything the engine's notifications can be read from.
pub type EngineOutput = Box<dyn AsyncRead + Send + Unpin>;

/// The write half of an engine link.
pub struct Supervisor {
    input: Option<EngineInput>,
    child: Option<Child>,
    stop: Option<watch::Sender<bool>>,
    grace_period: Duration,
    log_exit: bool,
}

/// The decoded, line-by-line output of the engine.
///
/// Ends when the engine closes its stdout, or once teardown has given up
/// waiting for it to do so.
pub struct NotificationStream {
    lines: Lines<BufReader<EngineOutput>>,
    stop: watch::Receiver<bool>,
}

impl Supervisor {
    /// Starts the engine binary named by `config` and wires up its pipes.
    ///
    /// Must be called from within a Tokio runtime: the engine's stderr is
    /// forwarded to `tracing` by a background task.
    pub fn spawn(config: &NanoTimerConfig) -> Result<(Self, NotificationStream)> {
        let path = &config.engine_path;
        let spawn_error = |source| NanoTimerError::Spawn {
            path: path.clone(),
            source,
        };
        let mut command = tokio::process::Command::new(path);
        if config.engine_debug {
            command.arg("-d");
        }
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let missing = |pipe: &str| {
            spawn_error(std::io::Error::other(format!("engine {pipe} was not captured")))
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }
        info!(pid = ?child.id(), path = %path.display(), "timing engine started");

        let (mut supervisor, notifications) =
            Self::from_streams(Box::new(stdin), Box::new(stdout), config.grace_period());
        supervisor.child = Some(child);
        supervisor.log_exit = config.logging;
        Ok((supervisor, notifications))
    }

    /// Builds a link over arbitrary streams, with no process behind it.
    pub fn from_streams(
        input: EngineInput,
        output: EngineOutput,
        grace_period: Duration,
    ) -> (Self, NotificationStream) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let supervisor = Self {
            input: Some(input),
            child: None,
            stop: Some(stop_tx),
            grace_period,
            log_exit: false,
        };
        let notifications = NotificationStream {
            lines: BufReader::new(output).lines(),
            stop: stop_rx,
        };
        (supervisor, notifications)
    }

    /// True once teardown has begun.
    pub fn is_closed(&self) -> bool {
        self.input.is_none()
    }

    /// Writes one command line and flushes it.
    pub async fn write_line(&mut self, command: &Command) -> Result<()> {
        let input = self.input.as_mut().ok_or(NanoTimerError::Closed)?;
        let line = format!("{command}\n");
        input.write_all(line.as_bytes()).await?;
        input.flush().await?;
        debug!(%command, "sent to engine");
        Ok(())
    }

    /// Asks the engine to exit by closing its stdin, and kills it if it is
    /// still running after the grace period.
    ///
    /// Only the first call does anything; it returns `true`. The notification
    /// stream keeps delivering whatever the engine writes before it exits, and
    /// is cut off once the grace period is over.
    pub async fn destroy(&mut self) -> bool {
        let Some(mut input) = self.input.take() else {
            return false;
        };
        if let Err(e) = input.shutdown().await {
            debug!(error = %e, "engine stdin was already closed");
        }
        drop(input);

        let child = self.child.take();
        let stop = self.stop.take();
        let grace_period = self.grace_period;
        let log_exit = self.log_exit;
        tokio::spawn(async move {
            match child {
                Some(child) => reap(child, grace_period, log_exit).await,
                None => tokio::time::sleep(grace_period).await,
            }
            if let Some(stop) = stop {
                stop.send_replace(true);
            }
        });
        true
    }
}

impl NotificationStream {
    /// Waits for the next well-formed notification.
    ///
    /// Lines that do not decode are logged and skipped. Returns `None` once the
    /// engine's output has closed or teardown has cut the stream off.
    pub async fn next(&mut self) -> Option<Notification> {
        loop {
            let line = tokio::select! {
                biased;
                _ = self.stop.wait_for(|stopped| *stopped) => return None,
                line = self.lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) => match Notification::decode(&line) {
                    Ok(notification) => {
                        trace!(%notification, "received from engine");
                        return Some(notification);
                    }
                    Err(noise) => debug!(%noise, line = %line, "ignoring engine output"),
                },
                Ok(None) => return None,
                Err(e) => {
                    warn!(error = %e, "failed to read from engine");
                    return None;
                }
            }
        }
    }
}

/// Waits for the engine to exit, killing it if the grace period runs out.
async fn reap(mut child: Child, grace_period: Duration, log_exit: bool) {
    let status = match tokio::time::timeout(grace_period, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            debug!(?grace_period, "timing engine still running, killing it");
            match child.kill().await {
                Ok(()) => child.wait().await,
                Err(e) => Err(e),
            }
        }
    };
    match status {
        Ok(status) if log_exit => info!(%status, "timing engine exited"),
        Ok(status) => debug!(%status, "timing engine exited"),
        Err(e) => warn!(error = %e, "failed to reap timing engine"),
    }
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => warn!(target: "nanotimer::engine", "{line}"),
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "engine stderr closed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::TimerId;
    use crate::protocol::DurationSpec;
    use std::path::PathBuf;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn link() -> (
        Supervisor,
        NotificationStream,
        tokio::io::DuplexStream,
        tokio::io::DuplexStream,
    ) {
        let (host_in, engine_in) = duplex(1024);
        let (engine_out, host_out) = duplex(1024);
        let (supervisor, notifications) = Supervisor::from_streams(
            Box::new(host_in),
            Box::new(host_out),
            Duration::from_millis(20),
        );
        (supervisor, notifications, engine_in, engine_out)
    }

    #[tokio::test]
    async fn commands_are_newline_framed() {
        let (mut supervisor, _notifications, engine_in, _engine_out) = link();
        let spec: DurationSpec = "500m".parse().unwrap();
        supervisor
            .write_line(&Command::SetTimeout {
                id: TimerId(1),
                spec,
            })
            .await
            .unwrap();
        supervisor
            .write_line(&Command::ClearTimeout { id: TimerId(1) })
            .await
            .unwrap();

        let mut lines = BufReader::new(engine_in).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "setTimeout 1 500m");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "clearTimeout 1");
    }

    #[tokio::test]
    async fn stream_skips_noise_and_ends_at_eof() {
        let (_supervisor, mut notifications, _engine_in, mut engine_out) = link();
        engine_out
            .write_all(b"Debugging enabled\ninterval 3\n\ntimeout x 1\ntimeout 4 99\n")
            .await
            .unwrap();
        drop(engine_out);

        assert_eq!(
            notifications.next().await,
            Some(Notification::Interval { id: TimerId(3) })
        );
        assert_eq!(
            notifications.next().await,
            Some(Notification::Timeout {
                id: TimerId(4),
                wait_time_ns: 99
            })
        );
        assert_eq!(notifications.next().await, None);
    }

    #[tokio::test]
    async fn destroy_closes_input_once_and_rejects_writes() {
        let (mut supervisor, _notifications, engine_in, _engine_out) = link();
        assert!(!supervisor.is_closed());
        assert!(supervisor.destroy().await);
        assert!(!supervisor.destroy().await);
        assert!(supervisor.is_closed());

        let mut lines = BufReader::new(engine_in).lines();
        assert_eq!(lines.next_line().await.unwrap(), None);

        let err = supervisor
            .write_line(&Command::ClearInterval { id: TimerId(1) })
            .await
            .unwrap_err();
        assert!(matches!(err, NanoTimerError::Closed));
    }

    #[tokio::test]
    async fn destroy_releases_the_reader_after_the_grace_period() {
        // The fake engine never closes its output; teardown must still end
        // the stream.
        let (mut supervisor, mut notifications, _engine_in, mut engine_out) = link();
        supervisor.destroy().await;
        engine_out.write_all(b"interval 1\n").await.unwrap();
        let drained = tokio::time::timeout(Duration::from_secs(2), async {
            let mut seen = 0;
            while notifications.next().await.is_some() {
                seen += 1;
            }
            seen
        })
        .await
        .expect("stream was not released");
        assert!(drained <= 1);
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let config = NanoTimerConfig::with_engine("/nonexistent/nanoengine");
        match Supervisor::spawn(&config) {
            Err(NanoTimerError::Spawn { path, .. }) => {
                assert_eq!(path, PathBuf::from("/nonexistent/nanoengine"))
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("spawning a missing binary succeeded"),
        }
    }
}
