//! Constructors and combinators built on [`Deferred`] continuations.
use std::sync::{Arc, Mutex};
use tracing::trace;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::resolve::{resolve_with, resolving_functions};
use crate::{
    lock, AggregateFailure, Deferred, Reason, Rejecter, Resolution, Resolver, Runtime, Value,
};

/// How one input of [`Runtime::all_settled`] ended.
///
/// With the `serde` feature this serializes as
/// `{"status": "fulfilled", "value": ..}` or
/// `{"status": "rejected", "reason": ..}`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(tag = "status", rename_all = "lowercase")
)]
pub enum SettledOutcome<T, E> {
    Fulfilled { value: T },
    Rejected { reason: E },
}

impl<T, E> SettledOutcome<T, E> {
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, SettledOutcome::Fulfilled { .. })
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            SettledOutcome::Fulfilled { value } => Ok(value),
            SettledOutcome::Rejected { reason } => Err(reason),
        }
    }
}

/// Combinator input: a deferred value, or a [`Resolution`] that becomes one.
pub trait IntoDeferred<T, E> {
    fn into_deferred(self, runtime: &Runtime) -> Deferred<T, E>;
}

impl<T: Value, E: Reason> IntoDeferred<T, E> for Deferred<T, E> {
    fn into_deferred(self, _runtime: &Runtime) -> Deferred<T, E> {
        self
    }
}

impl<T: Value, E: Reason> IntoDeferred<T, E> for Resolution<T, E> {
    fn into_deferred(self, runtime: &Runtime) -> Deferred<T, E> {
        runtime.resolve(self)
    }
}

struct JoinState<T> {
    slots: Vec<Option<T>>,
    fulfilled: usize,
}

impl Runtime {
    /// Creates a deferred value settled by `producer`. See [`Deferred::new`].
    pub fn deferred<T, E, P>(&self, producer: P) -> Deferred<T, E>
    where
        T: Value,
        E: Reason,
        P: FnOnce(Resolver<T, E>, Rejecter<T, E>) -> Result<(), E>,
    {
        Deferred::new(self, producer)
    }

    /// A pending deferred value together with the functions that settle it.
    ///
    /// ```
    /// use deferred_value::{MicrotaskQueue, Runtime};
    ///
    /// let runtime = Runtime::new(MicrotaskQueue::new());
    /// let (deferred, resolve, reject) = runtime.with_resolvers::<&str, String>();
    /// resolve.resolve("resolved");
    /// reject.reject("ignored".to_string());
    /// assert_eq!(deferred.peek(), Some(Ok("resolved")));
    /// ```
    pub fn with_resolvers<T: Value, E: Reason>(
        &self,
    ) -> (Deferred<T, E>, Resolver<T, E>, Rejecter<T, E>) {
        let deferred = Deferred::pending(self);
        let (resolve, reject) = resolving_functions(&deferred);
        (deferred, resolve, reject)
    }

    /// An already fulfilled deferred value.
    pub fn resolved<T: Value, E: Reason>(&self, value: T) -> Deferred<T, E> {
        let deferred = Deferred::pending(self);
        deferred.settle(Ok(value));
        deferred
    }

    /// An already rejected deferred value. `reason` is kept as-is even if it
    /// is itself a deferred value.
    pub fn rejected<T: Value, E: Reason>(&self, reason: E) -> Deferred<T, E> {
        let deferred = Deferred::pending(self);
        deferred.settle(Err(reason));
        deferred
    }

    /// Runs `resolution` through the resolution algorithm. A deferred value
    /// is returned unchanged.
    pub fn resolve<T: Value, E: Reason>(&self, resolution: Resolution<T, E>) -> Deferred<T, E> {
        match resolution {
            Resolution::Deferred(deferred) => deferred,
            resolution => {
                let deferred = Deferred::pending(self);
                resolve_with(&deferred, resolution);
                deferred
            }
        }
    }

    fn collect<T, E, I>(&self, items: I) -> Vec<Deferred<T, E>>
    where
        I: IntoIterator,
        I::Item: IntoDeferred<T, E>,
    {
        items.into_iter().map(|item| item.into_deferred(self)).collect()
    }

    /// Fulfills with every input's value, in input order, once all of them
    /// fulfilled. Rejects with the first rejection to arrive.
    ///
    /// ```
    /// use deferred_value::{MicrotaskQueue, Resolution, Runtime};
    ///
    /// let queue = MicrotaskQueue::new();
    /// let runtime = Runtime::new(queue.clone());
    /// let (slow, resolve_slow, _) = runtime.with_resolvers::<i32, String>();
    /// let all = runtime.join_all(vec![
    ///     slow,
    ///     runtime.resolved(2),
    ///     runtime.resolve(Resolution::Value(3)),
    /// ]);
    /// queue.run_until_idle();
    /// resolve_slow.resolve(1);
    /// queue.run_until_idle();
    /// assert_eq!(all.peek(), Some(Ok(vec![1, 2, 3])));
    /// ```
    pub fn join_all<T, E, I>(&self, items: I) -> Deferred<Vec<T>, E>
    where
        T: Value,
        E: Reason,
        I: IntoIterator,
        I::Item: IntoDeferred<T, E>,
    {
        let items = self.collect(items);
        let (all, resolve, reject) = self.with_resolvers();
        let total = items.len();
        if total == 0 {
            resolve.resolve(Vec::new());
            return all;
        }

        let state = Arc::new(Mutex::new(JoinState {
            slots: (0..total).map(|_| None).collect(),
            fulfilled: 0,
        }));
        for (index, item) in items.into_iter().enumerate() {
            let state = state.clone();
            let resolve = resolve.clone();
            let reject = reject.clone();
            item.subscribe(move |outcome| match outcome {
                Ok(value) => {
                    let complete = {
                        let mut state = lock(&state);
                        if state.slots[index].is_none() {
                            state.slots[index] = Some(value);
                            state.fulfilled += 1;
                        }
                        if state.fulfilled == total {
                            let values: Vec<T> =
                                state.slots.iter_mut().filter_map(Option::take).collect();
                            Some(values)
                        } else {
                            None
                        }
                    };
                    if let Some(values) = complete {
                        trace!(total, "join_all complete");
                        resolve.resolve(values);
                    }
                }
                Err(reason) => reject.reject(reason),
            });
        }
        all
    }

    /// Fulfills with the first input to fulfill. If every input rejects,
    /// rejects with all reasons in arrival order; an empty input rejects
    /// immediately with an empty [`AggregateFailure`].
    pub fn first_to_fulfill<T, E, I>(&self, items: I) -> Deferred<T, AggregateFailure<E>>
    where
        T: Value,
        E: Reason,
        I: IntoIterator,
        I::Item: IntoDeferred<T, E>,
    {
        let items = self.collect(items);
        let (any, resolve, reject) = self.with_resolvers();
        let total = items.len();
        if total == 0 {
            reject.reject(AggregateFailure::new());
            return any;
        }

        let failure = Arc::new(Mutex::new(AggregateFailure::new()));
        for item in items {
            let failure = failure.clone();
            let resolve = resolve.clone();
            let reject = reject.clone();
            item.subscribe(move |outcome| match outcome {
                Ok(value) => resolve.resolve(value),
                Err(reason) => {
                    let complete = {
                        let mut failure = lock(&failure);
                        failure.push(reason);
                        (failure.len() == total).then(|| failure.clone())
                    };
                    if let Some(failure) = complete {
                        reject.reject(failure);
                    }
                }
            });
        }
        any
    }

    /// Settles like whichever input settles first. An empty input never
    /// settles.
    pub fn first_to_settle<T, E, I>(&self, items: I) -> Deferred<T, E>
    where
        T: Value,
        E: Reason,
        I: IntoIterator,
        I::Item: IntoDeferred<T, E>,
    {
        let (race, resolve, reject) = self.with_resolvers();
        for item in self.collect(items) {
            let resolve = resolve.clone();
            let reject = reject.clone();
            item.subscribe(move |outcome| match outcome {
                Ok(value) => resolve.resolve(value),
                Err(reason) => reject.reject(reason),
            });
        }
        race
    }

    /// Fulfills with one [`SettledOutcome`] per input, in input order, once
    /// every input settled. Never rejects.
    pub fn all_settled<T, E, I>(&self, items: I) -> Deferred<Vec<SettledOutcome<T, E>>, E>
    where
        T: Value,
        E: Reason,
        I: IntoIterator,
        I::Item: IntoDeferred<T, E>,
    {
        let described: Vec<Deferred<SettledOutcome<T, E>, E>> = self
            .collect(items)
            .into_iter()
            .map(|item| {
                item.then(
                    |value| Ok(Resolution::Value(SettledOutcome::Fulfilled { value })),
                    |reason| Ok(Resolution::Value(SettledOutcome::Rejected { reason })),
                )
            })
            .collect();
        self.join_all(described)
    }
}
