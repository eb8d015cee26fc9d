use std::collections::VecDeque;
use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex};
use tracing::{debug, error};

use crate::lock;

/// A callback handed to a [`Scheduler`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The host's task queue.
///
/// Tasks must run after the code that enqueued them has returned, in FIFO
/// order, one at a time.
pub trait Scheduler: Send + Sync {
    fn enqueue(&self, task: Task);
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    fn enqueue(&self, task: Task) {
        (**self).enqueue(task)
    }
}

/// Receives rejections that no continuation ever observed.
///
/// Returning `true` suppresses the default report; otherwise the runtime logs
/// the reason at error level.
pub trait RejectionSink: Send + Sync {
    fn notify_unobserved_rejection(&self, reason: &dyn Debug) -> bool;
}

impl<F> RejectionSink for F
where
    F: Fn(&dyn Debug) -> bool + Send + Sync,
{
    fn notify_unobserved_rejection(&self, reason: &dyn Debug) -> bool {
        self(reason)
    }
}

/// A FIFO [`Scheduler`] drained explicitly by its owner.
///
/// Clones share the same queue, so one clone can be handed to a [`Runtime`]
/// while another one drives it.
///
/// # Examples
///
/// ```
/// use deferred_value::{MicrotaskQueue, Scheduler};
/// use std::sync::{Arc, Mutex};
///
/// let queue = MicrotaskQueue::new();
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// for n in 0..3 {
///     let seen = seen.clone();
///     queue.enqueue(Box::new(move || seen.lock().unwrap().push(n)));
/// }
/// assert_eq!(queue.run_until_idle(), 3);
/// assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
/// ```
#[derive(Clone, Default)]
pub struct MicrotaskQueue {
    inner: Arc<Mutex<QueueInner>>,
}

#[derive(Default)]
struct QueueInner {
    tasks: VecDeque<Task>,
    total_enqueued: u64,
}

impl MicrotaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the oldest task, if any.
    pub fn run_next(&self) -> bool {
        let task = lock(&self.inner).tasks.pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs tasks until the queue is empty, including tasks enqueued while
    /// draining. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    pub fn run_at_most(&self, limit: usize) -> usize {
        let mut ran = 0;
        while ran < limit && self.run_next() {
            ran += 1;
        }
        ran
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).tasks.is_empty()
    }

    pub fn total_enqueued(&self) -> u64 {
        lock(&self.inner).total_enqueued
    }
}

impl Scheduler for MicrotaskQueue {
    fn enqueue(&self, task: Task) {
        let mut inner = lock(&self.inner);
        inner.tasks.push_back(task);
        inner.total_enqueued += 1;
    }
}

impl Debug for MicrotaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("MicrotaskQueue")
            .field("pending", &inner.tasks.len())
            .field("total_enqueued", &inner.total_enqueued)
            .finish()
    }
}

/// The collaborators every deferred value needs: where continuations run and
/// where unobserved rejections go.
///
/// Cloning is cheap; derived deferred values share their source's runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    scheduler: Box<dyn Scheduler>,
    sink: Option<Box<dyn RejectionSink>>,
    report_unobserved: bool,
}

impl Runtime {
    pub fn new(scheduler: impl Scheduler + 'static) -> Self {
        Self::builder(scheduler).build()
    }

    pub fn builder(scheduler: impl Scheduler + 'static) -> RuntimeBuilder {
        RuntimeBuilder {
            scheduler: Box::new(scheduler),
            sink: None,
            report_unobserved: true,
        }
    }

    pub fn enqueue(&self, task: Task) {
        self.inner.scheduler.enqueue(task);
    }

    pub(crate) fn reports_unobserved(&self) -> bool {
        self.inner.report_unobserved
    }

    pub(crate) fn report_unobserved(&self, reason: &dyn Debug) {
        let suppressed = match &self.inner.sink {
            Some(sink) => sink.notify_unobserved_rejection(reason),
            None => false,
        };
        if suppressed {
            debug!(?reason, "unobserved rejection suppressed by sink");
        } else {
            error!("Uncaught (in deferred value) {:?}", reason);
        }
    }
}

impl Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("has_sink", &self.inner.sink.is_some())
            .field("report_unobserved", &self.inner.report_unobserved)
            .finish_non_exhaustive()
    }
}

/// Configures a [`Runtime`].
///
/// ```
/// use deferred_value::{MicrotaskQueue, Runtime};
/// use std::fmt::Debug;
///
/// let runtime = Runtime::builder(MicrotaskQueue::new())
///     .rejection_sink(|reason: &dyn Debug| {
///         eprintln!("unobserved: {reason:?}");
///         true
///     })
///     .build();
/// # let _ = runtime;
/// ```
pub struct RuntimeBuilder {
    scheduler: Box<dyn Scheduler>,
    sink: Option<Box<dyn RejectionSink>>,
    report_unobserved: bool,
}

impl RuntimeBuilder {
    pub fn rejection_sink(mut self, sink: impl RejectionSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// When off, settling to rejected schedules no unobserved-rejection check.
    pub fn report_unobserved_rejections(mut self, enabled: bool) -> Self {
        self.report_unobserved = enabled;
        self
    }

    pub fn build(self) -> Runtime {
        Runtime {
            inner: Arc::new(RuntimeInner {
                scheduler: self.scheduler,
                sink: self.sink,
                report_unobserved: self.report_unobserved,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MicrotaskQueue, Runtime, Scheduler};
    use std::fmt::Debug;
    use std::sync::{Arc, Mutex};

    fn recorder(queue: &MicrotaskQueue, log: &Arc<Mutex<Vec<String>>>, name: &'static str) {
        let log = log.clone();
        queue.enqueue(Box::new(move || log.lock().unwrap().push(name.to_string())));
    }

    #[test]
    fn queue_runs_in_fifo_order() {
        let queue = MicrotaskQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        recorder(&queue, &log, "a");
        recorder(&queue, &log, "b");
        recorder(&queue, &log, "c");
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.run_until_idle(), 3);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        assert!(queue.is_empty());
        assert_eq!(queue.total_enqueued(), 3);
    }

    #[test]
    fn tasks_enqueued_while_draining_run_last() {
        let queue = MicrotaskQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let queue2 = queue.clone();
            let log2 = log.clone();
            queue.enqueue(Box::new(move || {
                log2.lock().unwrap().push("outer".to_string());
                recorder(&queue2, &log2, "inner");
            }));
        }
        recorder(&queue, &log, "second");
        assert_eq!(queue.run_until_idle(), 3);
        assert_eq!(*log.lock().unwrap(), vec!["outer", "second", "inner"]);
    }

    #[test]
    fn run_at_most_respects_limit() {
        let queue = MicrotaskQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b", "c", "d"] {
            recorder(&queue, &log, name);
        }
        assert_eq!(queue.run_at_most(2), 2);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.run_at_most(10), 2);
        assert!(!queue.run_next());
    }

    #[test]
    fn sink_sees_reported_reason() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let runtime = Runtime::builder(MicrotaskQueue::new())
            .rejection_sink(move |reason: &dyn Debug| {
                sink_seen.lock().unwrap().push(format!("{reason:?}"));
                true
            })
            .build();
        runtime.report_unobserved(&"boom");
        assert_eq!(*seen.lock().unwrap(), vec!["\"boom\"".to_string()]);
    }

    #[test]
    fn builder_defaults() {
        let runtime = Runtime::new(MicrotaskQueue::new());
        assert!(runtime.reports_unobserved());
        let quiet = Runtime::builder(MicrotaskQueue::new())
            .report_unobserved_rejections(false)
            .build();
        assert!(!quiet.reports_unobserved());
    }
}
