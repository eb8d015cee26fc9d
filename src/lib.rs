//! Deferred values: containers for a result that is not known yet.
//!
//! A [`Deferred`] settles exactly once, either fulfilled with a `T` or
//! rejected with an `E`. Continuations registered with [`Deferred::then`] run
//! through an injected [`Scheduler`], never synchronously, and each
//! registration produces a new `Deferred` driven by the handler's outcome.
//!
//! # Examples
//!
//! ```
//! use deferred_value::{MicrotaskQueue, Runtime};
//! use futures::executor::block_on;
//!
//! let queue = MicrotaskQueue::new();
//! let runtime = Runtime::new(queue.clone());
//!
//! let (deferred, resolve, _reject) = runtime.with_resolvers::<i32, String>();
//! let doubled = deferred.map(|n| n * 2);
//! resolve.resolve(21);
//!
//! queue.run_until_idle();
//! assert_eq!(block_on(doubled), Ok(42));
//! ```
use std::fmt::Debug;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod aggregate;
pub mod combinators;
pub mod deferred;
pub mod resolve;
pub mod runtime;

pub use aggregate::AggregateFailure;
pub use combinators::{IntoDeferred, SettledOutcome};
pub use deferred::{Deferred, DeferredState};
pub use resolve::{identity, rethrow, Handled, Rejecter, Resolution, Resolver, Thenable, Thrown};
pub use runtime::{MicrotaskQueue, RejectionSink, Runtime, RuntimeBuilder, Scheduler, Task};

/// Anything a deferred value can be fulfilled with.
pub trait Value: Clone + Send + 'static {}

impl<T: Clone + Send + 'static> Value for T {}

/// Anything a deferred value can be rejected with.
///
/// `Debug` is required so unobserved rejections can be reported.
pub trait Reason: Clone + Send + Debug + 'static {}

impl<E: Clone + Send + Debug + 'static> Reason for E {}

/// User code never runs while one of our locks is held, so a poisoned lock
/// still guards consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
