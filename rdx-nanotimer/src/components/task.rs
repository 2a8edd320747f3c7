//! Defines the units of work a timer carries: the task itself, the optional
//! completion callback, and the registry entry that binds them to an id.

use crate::common::{TimerId, TimerKind};

/// Metadata handed to a timeout's completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Nanoseconds between the engine accepting the timeout and it either
    /// firing or being cancelled, as measured by the engine.
    pub wait_time: u64,
}

/// A function closure invoked each time a timer fires.
///
/// Arguments the caller wants passed on every firing are bound at
/// construction with [`Task::with_args`].
pub struct Task(Box<dyn FnMut() + Send>);

impl Task {
    pub fn new(task: impl FnMut() + Send + 'static) -> Self {
        Self(Box::new(task))
    }

    /// Binds `args` to `task`; they are passed by reference on every firing.
    pub fn with_args<A>(mut task: impl FnMut(&A) + Send + 'static, args: A) -> Self
    where
        A: Send + 'static,
    {
        Self(Box::new(move || task(&args)))
    }

    pub(crate) fn run(&mut self) {
        (self.0)()
    }
}

impl<F> From<F> for Task
where
    F: FnMut() + Send + 'static,
{
    fn from(task: F) -> Self {
        Task::new(task)
    }
}

/// The callback run after a timer fires.
///
/// Timeouts report a [`Completion`] once; intervals report nothing, after
/// every firing.
pub(crate) enum OnComplete {
    Timeout(Box<dyn FnOnce(Completion) + Send>),
    Interval(Box<dyn FnMut() + Send>),
}

impl OnComplete {
    pub(crate) fn timeout(callback: impl FnOnce(Completion) + Send + 'static) -> Self {
        OnComplete::Timeout(Box::new(callback))
    }

    pub(crate) fn interval(callback: impl FnMut() + Send + 'static) -> Self {
        OnComplete::Interval(Box::new(callback))
    }
}

/// One outstanding request, as tracked by the registry.
#[doc(hidden)]
pub(crate) struct TimerEntry {
    pub id: TimerId,
    pub kind: TimerKind,
    task: Task,
    on_complete: Option<OnComplete>,
}

impl TimerEntry {
    pub(crate) fn new(
        id: TimerId,
        kind: TimerKind,
        task: Task,
        on_complete: Option<OnComplete>,
    ) -> Self {
        Self {
            id,
            kind,
            task,
            on_complete,
        }
    }

    /// Runs a timeout's task, then its completion callback. Consumes the entry.
    pub(crate) fn fire_once(mut self, wait_time: u64) {
        self.task.run();
        self.complete(wait_time);
    }

    /// Runs only the completion callback of a timeout that was cancelled
    /// before it fired. Consumes the entry.
    pub(crate) fn cancelled(self, wait_time: u64) {
        self.complete(wait_time);
    }

    /// Runs an interval's task and its per-firing callback. The entry stays
    /// registered.
    pub(crate) fn fire_repeating(&mut self) {
        self.task.run();
        if let Some(OnComplete::Interval(callback)) = self.on_complete.as_mut() {
            callback();
        }
    }

    fn complete(self, wait_time: u64) {
        if let Some(OnComplete::Timeout(callback)) = self.on_complete {
            callback(Completion { wait_time });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn task_with_args_sees_its_arguments_every_time() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut task = Task::with_args(
            move |(label, n): &(&str, u32)| sink.lock().unwrap().push(format!("{label}{n}")),
            ("tick", 3),
        );
        task.run();
        task.run();
        assert_eq!(*seen.lock().unwrap(), vec!["tick3", "tick3"]);
    }

    #[test]
    fn timeout_entry_reports_wait_time_after_task() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (order.clone(), order.clone());
        let entry = TimerEntry::new(
            TimerId(1),
            TimerKind::Timeout,
            Task::new(move || a.lock().unwrap().push("task".to_string())),
            Some(OnComplete::timeout(move |c| {
                b.lock().unwrap().push(format!("done {}", c.wait_time))
            })),
        );
        entry.fire_once(500);
        assert_eq!(*order.lock().unwrap(), vec!["task", "done 500"]);
    }

    #[test]
    fn cancelled_entry_skips_the_task() {
        let runs = Arc::new(AtomicU32::new(0));
        let waited = Arc::new(Mutex::new(None));
        let (r, w) = (runs.clone(), waited.clone());
        let entry = TimerEntry::new(
            TimerId(2),
            TimerKind::Timeout,
            Task::new(move || {
                r.fetch_add(1, Ordering::SeqCst);
            }),
            Some(OnComplete::timeout(move |c| *w.lock().unwrap() = Some(c))),
        );
        entry.cancelled(42);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(*waited.lock().unwrap(), Some(Completion { wait_time: 42 }));
    }

    #[test]
    fn interval_entry_calls_back_after_each_firing() {
        let runs = Arc::new(AtomicU32::new(0));
        let callbacks = Arc::new(AtomicU32::new(0));
        let (r, c) = (runs.clone(), callbacks.clone());
        let mut entry = TimerEntry::new(
            TimerId(3),
            TimerKind::Interval,
            Task::new(move || {
                r.fetch_add(1, Ordering::SeqCst);
            }),
            Some(OnComplete::interval(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })),
        );
        entry.fire_repeating();
        entry.fire_repeating();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(callbacks.load(Ordering::SeqCst), 2);
    }
}
