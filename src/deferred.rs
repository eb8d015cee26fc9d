use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};
use tracing::{debug, trace};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::resolve::{resolving_functions, settle_handled};
use crate::{
    identity, lock, rethrow, Handled, Reason, Rejecter, Resolution, Resolver, Runtime, Thenable,
    Value,
};

/// A value that is not known yet.
///
/// A `Deferred` starts pending and settles at most once, to fulfilled or
/// rejected. Clones are handles to the same value; every clone observes the
/// same settlement.
///
/// # Examples
///
/// ```
/// use deferred_value::{rethrow, Deferred, MicrotaskQueue, Resolution, Runtime};
/// use futures::executor::block_on;
///
/// let queue = MicrotaskQueue::new();
/// let runtime = Runtime::new(queue.clone());
/// let deferred = Deferred::<&str, String>::new(&runtime, |resolve, _reject| {
///     resolve.resolve("first");
///     resolve.resolve("second");
///     Ok(())
/// });
/// let observed = deferred.then(|value| Ok(Resolution::Value(value.len())), rethrow);
///
/// queue.run_until_idle();
/// assert_eq!(block_on(deferred), Ok("first"));
/// assert_eq!(block_on(observed), Ok(5));
/// ```
pub struct Deferred<T, E> {
    inner: Arc<Mutex<Inner<T, E>>>,
    runtime: Runtime,
}

type Reaction<T, E> = Box<dyn FnOnce(Result<T, E>) + Send>;

struct Inner<T, E> {
    state: State<T, E>,
    reactions: Vec<Reaction<T, E>>,
    wakers: Vec<Waker>,
    observed: bool,
}

enum State<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

/// Where a deferred value is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "lowercase"))]
pub enum DeferredState {
    Pending,
    Fulfilled,
    Rejected,
}

impl<T: Clone, E: Clone> State<T, E> {
    fn kind(&self) -> DeferredState {
        match self {
            State::Pending => DeferredState::Pending,
            State::Fulfilled(_) => DeferredState::Fulfilled,
            State::Rejected(_) => DeferredState::Rejected,
        }
    }

    fn outcome(&self) -> Option<Result<T, E>> {
        match self {
            State::Pending => None,
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(reason) => Some(Err(reason.clone())),
        }
    }
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            runtime: self.runtime.clone(),
        }
    }
}

impl<T: Value, E: Reason> Deferred<T, E> {
    /// Runs `producer` synchronously with the functions that settle the new
    /// value. If `producer` returns `Err`, the value is rejected with it
    /// unless it was already resolved.
    pub fn new<P>(runtime: &Runtime, producer: P) -> Self
    where
        P: FnOnce(Resolver<T, E>, Rejecter<T, E>) -> Result<(), E>,
    {
        let deferred = Self::pending(runtime);
        let (resolve, reject) = resolving_functions(&deferred);
        if let Err(reason) = producer(resolve, reject.clone()) {
            debug!("producer failed, rejecting");
            reject.reject(reason);
        }
        deferred
    }

    pub(crate) fn pending(runtime: &Runtime) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: State::Pending,
                reactions: Vec::new(),
                wakers: Vec::new(),
                observed: false,
            })),
            runtime: runtime.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T, E>> {
        lock(&self.inner)
    }

    /// The runtime continuations of this value are scheduled on.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Current lifecycle state; does not count as observing the value.
    pub fn state(&self) -> DeferredState {
        self.lock().state.kind()
    }

    /// Neither fulfilled nor rejected yet.
    pub fn is_pending(&self) -> bool {
        self.state() == DeferredState::Pending
    }

    /// Fulfilled or rejected.
    pub fn is_settled(&self) -> bool {
        !self.is_pending()
    }

    /// The settled outcome, without registering as an observer.
    pub fn peek(&self) -> Option<Result<T, E>> {
        self.lock().state.outcome()
    }

    /// Whether both handles point at the same deferred value.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Moves from pending to settled. Later calls are no-ops.
    pub(crate) fn settle(&self, outcome: Result<T, E>) {
        let (reactions, wakers) = {
            let mut inner = self.lock();
            if !matches!(inner.state, State::Pending) {
                return;
            }
            inner.state = match &outcome {
                Ok(value) => State::Fulfilled(value.clone()),
                Err(reason) => State::Rejected(reason.clone()),
            };
            (mem::take(&mut inner.reactions), mem::take(&mut inner.wakers))
        };
        trace!(fulfilled = outcome.is_ok(), reactions = reactions.len(), "deferred value settled");

        for reaction in reactions {
            let outcome = outcome.clone();
            self.runtime.enqueue(Box::new(move || reaction(outcome)));
        }
        for waker in wakers {
            waker.wake();
        }

        if let Err(reason) = outcome {
            if self.runtime.reports_unobserved() {
                let this = self.clone();
                self.runtime.enqueue(Box::new(move || {
                    let observed = this.lock().observed;
                    if !observed {
                        this.runtime.report_unobserved(&reason);
                    }
                }));
            }
        }
    }

    /// Registers `reaction` to run, through the scheduler, once this value
    /// settles. Runs on a later turn even if already settled.
    pub(crate) fn subscribe<F>(&self, reaction: F)
    where
        F: FnOnce(Result<T, E>) + Send + 'static,
    {
        let settled = {
            let mut inner = self.lock();
            inner.observed = true;
            match inner.state.outcome() {
                Some(outcome) => outcome,
                None => {
                    inner.reactions.push(Box::new(reaction));
                    return;
                }
            }
        };
        self.runtime.enqueue(Box::new(move || reaction(settled)));
    }

    /// Registers a continuation and returns the value it produces.
    ///
    /// Exactly one of the handlers runs, on a later scheduler turn. Its
    /// `Ok` result resolves the returned value, adopting a deferred value or
    /// thenable. An `Err` rejects it, except that a thrown deferred value or
    /// thenable is adopted too.
    ///
    /// Pass [`identity`] or [`rethrow`] for the default behavior of a
    /// missing handler.
    pub fn then<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Deferred<U, E>
    where
        U: Value,
        F: FnOnce(T) -> Handled<U, E> + Send + 'static,
        R: FnOnce(E) -> Handled<U, E> + Send + 'static,
    {
        let derived = Deferred::pending(&self.runtime);
        let target = derived.clone();
        self.subscribe(move |outcome| {
            let handled = match outcome {
                Ok(value) => on_fulfilled(value),
                Err(reason) => on_rejected(reason),
            };
            settle_handled(&target, handled);
        });
        derived
    }

    /// `then` with [`identity`] as the fulfillment handler.
    pub fn catch<R>(&self, on_rejected: R) -> Deferred<T, E>
    where
        R: FnOnce(E) -> Handled<T, E> + Send + 'static,
    {
        self.then(identity, on_rejected)
    }

    /// Transforms the fulfillment value; rejections pass through unchanged.
    pub fn map<U, F>(&self, f: F) -> Deferred<U, E>
    where
        U: Value,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.then(move |value| Ok(Resolution::Value(f(value))), rethrow)
    }

    /// Like [`map`](Self::map), but an `Err` from `f` rejects the result.
    pub fn and_then<U, F>(&self, f: F) -> Deferred<U, E>
    where
        U: Value,
        F: FnOnce(T) -> Result<U, E> + Send + 'static,
    {
        self.then(move |value| Ok(Resolution::Value(f(value)?)), rethrow)
    }

    /// Runs `on_finally` on either outcome and passes the outcome through.
    /// An `Err` from `on_finally` replaces it with a rejection.
    pub fn finally<F>(&self, on_finally: F) -> Deferred<T, E>
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
    {
        let derived = Deferred::pending(&self.runtime);
        let target = derived.clone();
        self.subscribe(move |outcome| match on_finally() {
            Ok(()) => target.settle(outcome),
            Err(reason) => target.settle(Err(reason)),
        });
        derived
    }
}

impl<T: Value, E: Reason> Thenable<T, E> for Deferred<T, E> {
    fn register_continuation(self: Box<Self>, resolve: Resolver<T, E>, reject: Rejecter<T, E>) {
        self.subscribe(move |outcome| match outcome {
            Ok(value) => resolve.resolve(value),
            Err(reason) => reject.reject(reason),
        });
    }
}

impl<T: Value, E: Reason> Future for Deferred<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.lock();
        inner.observed = true;
        match inner.state.outcome() {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                if !inner.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    inner.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        let mut out = f.debug_struct("Deferred");
        match &inner.state {
            State::Pending => out.field("state", &DeferredState::Pending),
            State::Fulfilled(value) => out.field("fulfilled", value),
            State::Rejected(reason) => out.field("rejected", reason),
        };
        out.field("observers", &inner.reactions.len()).finish()
    }
}
