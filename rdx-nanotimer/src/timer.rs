//! The multiplexer that turns one engine process into timeouts and intervals.

use crate::common::{TimerId, TimerKind};
use crate::components::registry::{Dispatched, Registry};
use crate::components::task::{Completion, OnComplete, Task};
use crate::config::NanoTimerConfig;
use crate::error::{NanoTimerError, Result};
use crate::events::TimerEvent;
use crate::protocol::{Command, DurationSpec, Notification};
use crate::supervisor::{EngineInput, EngineOutput, NotificationStream, Supervisor};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, error, trace, warn};

/// A handle to one timing engine and the timers multiplexed over it.
///
/// At most one timeout and one interval are active at a time: setting a new
/// one of either kind cancels the previous one of that kind. Once neither is
/// active the engine is retired and the handle refuses new timers with
/// [`NanoTimerError::Closed`]; create a fresh `NanoTimer` to start again.
///
/// Tasks and callbacks run on the dispatcher task while it holds the
/// multiplexer's state, so they must not block. To schedule from inside a
/// callback, spawn a task that uses a cloned handle. A task that panics
/// retires the engine as if its output had closed.
#[derive(Clone)]
pub struct NanoTimer {
    state: Arc<Mutex<State>>,
    event_sender: broadcast::Sender<TimerEvent>,
    reader_done: watch::Receiver<bool>,
}

struct State {
    supervisor: Supervisor,
    registry: Registry,
}

impl State {
    async fn send(&mut self, command: Command) -> Result<()> {
        self.supervisor.write_line(&command).await
    }

    /// Tears the engine link down. `true` only for the call that did it.
    async fn retire(&mut self) -> bool {
        self.registry.abandon_active();
        self.supervisor.destroy().await
    }
}

// Core implementation block for internal logic.
impl NanoTimer {
    /// Starts the engine named by `config` and begins dispatching its output.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: NanoTimerConfig) -> Result<Self> {
        let (supervisor, notifications) = Supervisor::spawn(&config)?;
        Ok(Self::with_supervisor(supervisor, notifications))
    }

    /// Multiplexes over an already-running engine reachable through `input`
    /// and `output`, such as an in-memory fake.
    pub fn from_streams(input: EngineInput, output: EngineOutput, grace_period: Duration) -> Self {
        let (supervisor, notifications) = Supervisor::from_streams(input, output, grace_period);
        Self::with_supervisor(supervisor, notifications)
    }

    fn with_supervisor(supervisor: Supervisor, notifications: NotificationStream) -> Self {
        let (event_sender, _) = broadcast::channel(64);
        let (done_tx, reader_done) = watch::channel(false);
        let timer = Self {
            state: Arc::new(Mutex::new(State {
                supervisor,
                registry: Registry::new(),
            })),
            event_sender,
            reader_done,
        };
        let dispatcher = timer.clone();
        tokio::spawn(async move { dispatcher.dispatcher_loop(notifications, done_tx).await });
        timer
    }

    #[doc(hidden)]
    async fn dispatcher_loop(self, mut notifications: NotificationStream, done: watch::Sender<bool>) {
        // Dispatch runs in its own task so a panicking timer task still ends
        // up at the teardown below.
        let reader = self.clone();
        let reading = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                reader.dispatch(notification).await;
            }
        });
        let panicked = match reading.await {
            Ok(()) => false,
            Err(e) => {
                error!(error = %e, "timer task panicked, retiring engine");
                true
            }
        };
        {
            let mut state = self.state.lock().await;
            // The engine is gone; nothing left in the registry can complete.
            if state.retire().await {
                if !panicked {
                    warn!("timing engine output closed unexpectedly");
                }
                self.event_sender.send(TimerEvent::Retired).ok();
            }
            state.registry.clear();
        }
        debug!("notification reader released");
        done.send_replace(true);
    }

    #[doc(hidden)]
    async fn dispatch(&self, notification: Notification) {
        let id = notification.id();
        let mut state = self.state.lock().await;
        let event = match state.registry.dispatch(notification) {
            Dispatched::Dropped => {
                trace!(%notification, "no live timer, discarding");
                self.event_sender.send(TimerEvent::Dropped { id }).ok();
                return;
            }
            Dispatched::Fired { kind, finished } => {
                debug!(%id, %kind, finished, "timer fired");
                TimerEvent::Fired { id, kind }
            }
            Dispatched::Cancelled => TimerEvent::Cancelled { id },
        };
        self.event_sender.send(event).ok();
        if state.registry.is_idle() && state.retire().await {
            debug!("no timers left, retiring engine");
            self.event_sender.send(TimerEvent::Retired).ok();
        }
    }

    async fn schedule(
        &self,
        kind: TimerKind,
        spec: &str,
        task: Task,
        on_complete: Option<OnComplete>,
    ) -> Result<TimerId> {
        let spec: DurationSpec = spec.parse()?;
        let mut state = self.state.lock().await;
        if state.supervisor.is_closed() {
            return Err(NanoTimerError::Closed);
        }
        let registration = state.registry.register(kind, task, on_complete);
        let id = registration.id;
        if let Some(replaced) = registration.replaced {
            debug!(%replaced, %kind, "replacing active timer");
            if let Err(e) = state.send(Command::clear(kind, replaced)).await {
                state.registry.forget(id);
                return Err(e);
            }
        }
        if let Err(e) = state.send(Command::set(kind, id, spec)).await {
            state.registry.forget(id);
            return Err(e);
        }
        self.event_sender
            .send(TimerEvent::Scheduled { id, kind, spec })
            .ok();
        Ok(id)
    }

    async fn cancel(&self, kind: TimerKind) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(id) = state.registry.cancel(kind) else {
            return Ok(());
        };
        state.send(Command::clear(kind, id)).await?;
        if state.registry.is_idle() && state.retire().await {
            debug!("no timers left, retiring engine");
            self.event_sender.send(TimerEvent::Retired).ok();
        }
        Ok(())
    }
}

// Public API implementation block.
impl NanoTimer {
    /// Runs `task` once after `spec` (e.g. `"500m"`) has elapsed.
    ///
    /// A malformed `spec` is rejected with [`NanoTimerError::Validation`]
    /// before anything is registered or sent. An active timeout is cancelled
    /// first; its completion callback will not run.
    pub async fn set_timeout(&self, spec: &str, task: impl Into<Task>) -> Result<TimerId> {
        self.schedule(TimerKind::Timeout, spec, task.into(), None)
            .await
    }

    /// Like [`NanoTimer::set_timeout`], and calls `on_complete` with the
    /// engine-measured wait once the timeout has fired or been cancelled.
    pub async fn set_timeout_with(
        &self,
        spec: &str,
        task: impl Into<Task>,
        on_complete: impl FnOnce(Completion) + Send + 'static,
    ) -> Result<TimerId> {
        self.schedule(
            TimerKind::Timeout,
            spec,
            task.into(),
            Some(OnComplete::timeout(on_complete)),
        )
        .await
    }

    /// Cancels the active timeout, if any.
    ///
    /// The task will not run. A completion callback still runs once the engine
    /// acknowledges the cancellation.
    pub async fn clear_timeout(&self) -> Result<()> {
        self.cancel(TimerKind::Timeout).await
    }

    /// Runs `task` every `spec` until cleared. An active interval is cancelled
    /// first.
    pub async fn set_interval(&self, spec: &str, task: impl Into<Task>) -> Result<TimerId> {
        self.schedule(TimerKind::Interval, spec, task.into(), None)
            .await
    }

    /// Like [`NanoTimer::set_interval`], and calls `on_complete` after every
    /// firing.
    pub async fn set_interval_with(
        &self,
        spec: &str,
        task: impl Into<Task>,
        on_complete: impl FnMut() + Send + 'static,
    ) -> Result<TimerId> {
        self.schedule(
            TimerKind::Interval,
            spec,
            task.into(),
            Some(OnComplete::interval(on_complete)),
        )
        .await
    }

    /// Stops the active interval, if any. Firings already in flight are
    /// discarded.
    pub async fn clear_interval(&self) -> Result<()> {
        self.cancel(TimerKind::Interval).await
    }

    pub async fn has_timeout(&self) -> bool {
        self.state
            .lock()
            .await
            .registry
            .active(TimerKind::Timeout)
            .is_some()
    }

    pub async fn has_interval(&self) -> bool {
        self.state
            .lock()
            .await
            .registry
            .active(TimerKind::Interval)
            .is_some()
    }

    /// Number of timers still waiting on the engine, counting cancelled
    /// timeouts whose acknowledgment has not arrived.
    pub async fn pending(&self) -> usize {
        self.state.lock().await.registry.len()
    }

    pub async fn is_destroyed(&self) -> bool {
        self.state.lock().await.supervisor.is_closed()
    }

    /// Abandons the active timers and retires the engine.
    ///
    /// Safe to call any number of times; returns `true` only for the call
    /// that performed the teardown.
    pub async fn destroy(&self) -> bool {
        let retired = self.state.lock().await.retire().await;
        if retired {
            self.event_sender.send(TimerEvent::Retired).ok();
        }
        retired
    }

    /// Resolves once the notification reader has been released.
    pub async fn closed(&self) {
        let mut done = self.reader_done.clone();
        // An error means the dispatcher is gone, which is just as final.
        done.wait_for(|done| *done).await.ok();
    }

    /// Subscribes to the `TimerEvent` stream.
    pub fn subscribe_events(&self) -> broadcast::Receiver<TimerEvent> {
        self.event_sender.subscribe()
    }
}
