//! Bookkeeping for outstanding timers.
//!
//! The registry is a plain state machine: it mints ids, tracks the single
//! active timeout and single active interval, and runs callbacks when handed a
//! notification. It never touches the engine; the caller turns its answers into
//! protocol commands.

use super::task::{OnComplete, Task, TimerEntry};
use crate::common::{TimerId, TimerKind};
use crate::protocol::Notification;
use std::collections::HashMap;

/// The result of registering a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Registration {
    pub id: TimerId,
    /// The previously active timer of the same kind, dropped to make room.
    /// The engine still has to be told to cancel it.
    pub replaced: Option<TimerId>,
}

/// What a notification did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatched {
    /// No entry matched: a late firing after cancellation, or noise.
    Dropped,
    /// A task ran. `finished` is true when its entry is gone.
    Fired { kind: TimerKind, finished: bool },
    /// A cancelled timeout's acknowledgment was consumed.
    Cancelled,
}

#[doc(hidden)]
pub(crate) struct Registry {
    entries: HashMap<TimerId, TimerEntry>,
    active_timeout: Option<TimerId>,
    active_interval: Option<TimerId>,
    next_id: u64,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
            active_timeout: None,
            active_interval: None,
            next_id: 1,
        }
    }

    pub(crate) fn active(&self, kind: TimerKind) -> Option<TimerId> {
        match kind {
            TimerKind::Timeout => self.active_timeout,
            TimerKind::Interval => self.active_interval,
        }
    }

    fn slot(&mut self, kind: TimerKind) -> &mut Option<TimerId> {
        match kind {
            TimerKind::Timeout => &mut self.active_timeout,
            TimerKind::Interval => &mut self.active_interval,
        }
    }

    /// True when neither a timeout nor an interval is active.
    pub(crate) fn is_idle(&self) -> bool {
        self.active_timeout.is_none() && self.active_interval.is_none()
    }

    /// Number of entries still awaiting a notification, including cancelled
    /// timeouts whose acknowledgment has not arrived yet.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Registers a new timer under a fresh id and makes it the active one of
    /// its kind. An already-active timer of that kind is dropped outright.
    pub(crate) fn register(
        &mut self,
        kind: TimerKind,
        task: Task,
        on_complete: Option<OnComplete>,
    ) -> Registration {
        let replaced = self.slot(kind).take();
        if let Some(old) = replaced {
            self.entries.remove(&old);
        }
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.entries
            .insert(id, TimerEntry::new(id, kind, task, on_complete));
        *self.slot(kind) = Some(id);
        Registration { id, replaced }
    }

    /// Undoes a registration whose command never reached the engine.
    pub(crate) fn forget(&mut self, id: TimerId) {
        if let Some(entry) = self.entries.remove(&id) {
            let slot = self.slot(entry.kind);
            if *slot == Some(id) {
                *slot = None;
            }
        }
    }

    /// Releases the active slot of `kind`, returning the id the engine must be
    /// told to cancel.
    ///
    /// A cancelled timeout keeps its entry until the engine acknowledges with
    /// `clearedTimeout`, so a firing already in flight is still recognised. A
    /// cancelled interval is removed at once; stray firings are then dropped.
    pub(crate) fn cancel(&mut self, kind: TimerKind) -> Option<TimerId> {
        let id = self.slot(kind).take()?;
        if kind == TimerKind::Interval {
            self.entries.remove(&id);
        }
        Some(id)
    }

    /// Applies one engine notification, running whatever callbacks it owes.
    pub(crate) fn dispatch(&mut self, notification: Notification) -> Dispatched {
        let id = notification.id();
        let kind = match self.entries.get(&id) {
            Some(entry) => entry.kind,
            None => return Dispatched::Dropped,
        };
        match (notification, kind) {
            (Notification::Timeout { wait_time_ns, .. }, TimerKind::Timeout) => {
                if let Some(entry) = self.take(id) {
                    entry.fire_once(wait_time_ns);
                }
                Dispatched::Fired {
                    kind,
                    finished: true,
                }
            }
            (Notification::ClearedTimeout { wait_time_ns, .. }, TimerKind::Timeout) => {
                if let Some(entry) = self.take(id) {
                    entry.cancelled(wait_time_ns);
                }
                Dispatched::Cancelled
            }
            (Notification::Interval { .. }, TimerKind::Interval) => {
                if let Some(entry) = self.entries.get_mut(&id) {
                    entry.fire_repeating();
                }
                Dispatched::Fired {
                    kind,
                    finished: false,
                }
            }
            // A notification of the wrong kind for this id.
            _ => Dispatched::Dropped,
        }
    }

    /// Removes an entry together with its slot, if the slot still names it.
    fn take(&mut self, id: TimerId) -> Option<TimerEntry> {
        let entry = self.entries.remove(&id)?;
        debug_assert_eq!(entry.id, id);
        let slot = self.slot(entry.kind);
        if *slot == Some(id) {
            *slot = None;
        }
        Some(entry)
    }

    /// Drops the active timers of both kinds without running anything.
    /// Cancelled timeouts still awaiting acknowledgment are kept.
    pub(crate) fn abandon_active(&mut self) {
        for kind in [TimerKind::Timeout, TimerKind::Interval] {
            if let Some(id) = self.slot(kind).take() {
                self.entries.remove(&id);
            }
        }
    }

    /// Drops every entry and both slots without running anything.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.active_timeout = None;
        self.active_interval = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::task::Completion;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    fn counting_task(counter: &Arc<AtomicU32>) -> Task {
        let counter = counter.clone();
        Task::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let mut registry = Registry::new();
        let first = registry.register(TimerKind::Timeout, Task::new(|| {}), None);
        let second = registry.register(TimerKind::Interval, Task::new(|| {}), None);
        assert_eq!(first.id, TimerId(1));
        assert_eq!(second.id, TimerId(2));
        assert_eq!(first.replaced, None);
    }

    #[test]
    fn second_timeout_replaces_the_first() {
        let mut registry = Registry::new();
        let fired = Arc::new(AtomicU32::new(0));
        registry.register(TimerKind::Timeout, counting_task(&fired), None);
        let second = registry.register(TimerKind::Timeout, counting_task(&fired), None);
        assert_eq!(second.replaced, Some(TimerId(1)));
        assert_eq!(registry.active(TimerKind::Timeout), Some(TimerId(2)));
        assert_eq!(registry.len(), 1);

        // The replaced timer's firing, if the engine still sends it, is dropped.
        let late = Notification::Timeout {
            id: TimerId(1),
            wait_time_ns: 5,
        };
        assert_eq!(registry.dispatch(late), Dispatched::Dropped);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn timeout_fires_once_and_clears_its_slot() {
        let mut registry = Registry::new();
        let fired = Arc::new(AtomicU32::new(0));
        let waited = Arc::new(Mutex::new(None));
        let w = waited.clone();
        registry.register(
            TimerKind::Timeout,
            counting_task(&fired),
            Some(OnComplete::timeout(move |c| *w.lock().unwrap() = Some(c))),
        );
        let notification = Notification::Timeout {
            id: TimerId(1),
            wait_time_ns: 500_000_000,
        };
        assert_eq!(
            registry.dispatch(notification),
            Dispatched::Fired {
                kind: TimerKind::Timeout,
                finished: true
            }
        );
        assert_eq!(registry.dispatch(notification), Dispatched::Dropped);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(
            *waited.lock().unwrap(),
            Some(Completion {
                wait_time: 500_000_000
            })
        );
        assert!(registry.is_idle());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn cancelled_timeout_waits_for_acknowledgment() {
        let mut registry = Registry::new();
        let fired = Arc::new(AtomicU32::new(0));
        let waited = Arc::new(Mutex::new(None));
        let w = waited.clone();
        registry.register(
            TimerKind::Timeout,
            counting_task(&fired),
            Some(OnComplete::timeout(move |c| *w.lock().unwrap() = Some(c))),
        );
        assert_eq!(registry.cancel(TimerKind::Timeout), Some(TimerId(1)));
        assert!(registry.is_idle());
        assert_eq!(registry.len(), 1);

        let ack = Notification::ClearedTimeout {
            id: TimerId(1),
            wait_time_ns: 7,
        };
        assert_eq!(registry.dispatch(ack), Dispatched::Cancelled);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(*waited.lock().unwrap(), Some(Completion { wait_time: 7 }));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn cancel_without_active_timer_is_a_no_op() {
        let mut registry = Registry::new();
        assert_eq!(registry.cancel(TimerKind::Timeout), None);
        assert_eq!(registry.cancel(TimerKind::Interval), None);
    }

    #[test]
    fn interval_keeps_firing_until_cancelled() {
        let mut registry = Registry::new();
        let fired = Arc::new(AtomicU32::new(0));
        let id = registry
            .register(TimerKind::Interval, counting_task(&fired), None)
            .id;
        for _ in 0..3 {
            registry.dispatch(Notification::Interval { id });
        }
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert_eq!(registry.active(TimerKind::Interval), Some(id));

        assert_eq!(registry.cancel(TimerKind::Interval), Some(id));
        assert_eq!(registry.len(), 0);
        assert_eq!(
            registry.dispatch(Notification::Interval { id }),
            Dispatched::Dropped
        );
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn mismatched_notification_kind_is_dropped() {
        let mut registry = Registry::new();
        let fired = Arc::new(AtomicU32::new(0));
        let id = registry
            .register(TimerKind::Interval, counting_task(&fired), None)
            .id;
        let confused = Notification::Timeout {
            id,
            wait_time_ns: 1,
        };
        assert_eq!(registry.dispatch(confused), Dispatched::Dropped);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(registry.active(TimerKind::Interval), Some(id));
    }

    #[test]
    fn abandon_keeps_pending_acknowledgments() {
        let mut registry = Registry::new();
        registry.register(TimerKind::Timeout, Task::new(|| {}), None);
        registry.cancel(TimerKind::Timeout);
        registry.register(TimerKind::Timeout, Task::new(|| {}), None);
        registry.register(TimerKind::Interval, Task::new(|| {}), None);
        assert_eq!(registry.len(), 3);

        registry.abandon_active();
        assert!(registry.is_idle());
        assert_eq!(registry.len(), 1);
        let ack = Notification::ClearedTimeout {
            id: TimerId(1),
            wait_time_ns: 3,
        };
        assert_eq!(registry.dispatch(ack), Dispatched::Cancelled);

        registry.clear();
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn forget_rolls_back_a_registration() {
        let mut registry = Registry::new();
        let id = registry
            .register(TimerKind::Timeout, Task::new(|| {}), None)
            .id;
        registry.forget(id);
        assert!(registry.is_idle());
        assert_eq!(registry.len(), 0);
    }
}
