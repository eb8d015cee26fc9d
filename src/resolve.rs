//! The resolution algorithm: deciding whether a value settles a deferred value
//! directly or has to be adopted first.
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::{Deferred, Reason, Value};

/// A value that can register continuations for its own eventual outcome.
///
/// Resolving a deferred value with a thenable adopts the thenable's outcome
/// instead of settling with it. The thenable may call `resolve` with another
/// continuation-capable value, which is adopted in turn.
///
/// ```
/// use deferred_value::{MicrotaskQueue, Rejecter, Resolution, Resolver, Runtime, Thenable};
///
/// struct Ready(i32);
///
/// impl Thenable<i32, String> for Ready {
///     fn register_continuation(
///         self: Box<Self>,
///         resolve: Resolver<i32, String>,
///         _reject: Rejecter<i32, String>,
///     ) {
///         resolve.resolve(self.0);
///     }
/// }
///
/// let runtime = Runtime::new(MicrotaskQueue::new());
/// let thenable: Box<dyn Thenable<i32, String>> = Box::new(Ready(7));
/// let adopted = runtime.resolve(Resolution::Thenable(thenable));
/// assert_eq!(adopted.peek(), Some(Ok(7)));
/// ```
pub trait Thenable<T, E>: Send {
    fn register_continuation(self: Box<Self>, resolve: Resolver<T, E>, reject: Rejecter<T, E>);
}

/// What a deferred value is resolved with.
pub enum Resolution<T, E> {
    Value(T),
    Deferred(Deferred<T, E>),
    Thenable(Box<dyn Thenable<T, E>>),
}

impl<T, E> From<T> for Resolution<T, E> {
    fn from(value: T) -> Self {
        Resolution::Value(value)
    }
}

impl<T, E> From<Deferred<T, E>> for Resolution<T, E> {
    fn from(deferred: Deferred<T, E>) -> Self {
        Resolution::Deferred(deferred)
    }
}

impl<T: fmt::Debug, E> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolution::Deferred(_) => f.write_str("Deferred(..)"),
            Resolution::Thenable(_) => f.write_str("Thenable(..)"),
        }
    }
}

/// What a continuation handler raised instead of returning.
///
/// A thrown deferred value or thenable is adopted rather than used as the
/// rejection reason.
pub enum Thrown<T, E> {
    Reason(E),
    Deferred(Deferred<T, E>),
    Thenable(Box<dyn Thenable<T, E>>),
}

impl<T, E> From<E> for Thrown<T, E> {
    fn from(reason: E) -> Self {
        Thrown::Reason(reason)
    }
}

/// The outcome of a continuation handler.
pub type Handled<T, E> = Result<Resolution<T, E>, Thrown<T, E>>;

/// Default fulfillment handler: passes the value through.
pub fn identity<T, E>(value: T) -> Handled<T, E> {
    Ok(Resolution::Value(value))
}

/// Default rejection handler: raises the reason again.
pub fn rethrow<T, E>(reason: E) -> Handled<T, E> {
    Err(Thrown::Reason(reason))
}

/// Resolves one deferred value.
///
/// Shares an "already resolved" flag with the [`Rejecter`] it was created
/// with; only the first call through either of them has any effect.
pub struct Resolver<T, E> {
    target: Deferred<T, E>,
    already_resolved: Arc<AtomicBool>,
}

/// Rejects one deferred value. See [`Resolver`].
pub struct Rejecter<T, E> {
    target: Deferred<T, E>,
    already_resolved: Arc<AtomicBool>,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            already_resolved: self.already_resolved.clone(),
        }
    }
}

impl<T, E> Clone for Rejecter<T, E> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            already_resolved: self.already_resolved.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("already_resolved", &self.already_resolved.load(Ordering::Acquire))
            .finish()
    }
}

impl<T, E> fmt::Debug for Rejecter<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejecter")
            .field("already_resolved", &self.already_resolved.load(Ordering::Acquire))
            .finish()
    }
}

pub(crate) fn resolving_functions<T, E>(
    target: &Deferred<T, E>,
) -> (Resolver<T, E>, Rejecter<T, E>) {
    let already_resolved = Arc::new(AtomicBool::new(false));
    (
        Resolver {
            target: target.clone(),
            already_resolved: already_resolved.clone(),
        },
        Rejecter {
            target: target.clone(),
            already_resolved,
        },
    )
}

impl<T: Value, E: Reason> Resolver<T, E> {
    /// Settles the target with `value`, adopting it first if it is a deferred
    /// value or thenable.
    ///
    /// Resolving a value with itself leaves it pending and registers nothing
    /// on it. Longer cycles, such as two values adopting each other, also
    /// stay pending, and each keeps the other alive through its reaction.
    pub fn resolve(&self, value: impl Into<Resolution<T, E>>) {
        if self.already_resolved.swap(true, Ordering::AcqRel) {
            debug!("ignoring resolve of an already resolved deferred value");
            return;
        }
        resolve_with(&self.target, value.into());
    }
}

impl<T: Value, E: Reason> Rejecter<T, E> {
    /// Rejects with `reason` as-is; rejection reasons are never adopted.
    pub fn reject(&self, reason: E) {
        if self.already_resolved.swap(true, Ordering::AcqRel) {
            debug!("ignoring reject of an already resolved deferred value");
            return;
        }
        self.target.settle(Err(reason));
    }
}

pub(crate) fn resolve_with<T: Value, E: Reason>(
    target: &Deferred<T, E>,
    resolution: Resolution<T, E>,
) {
    if !target.is_pending() {
        return;
    }
    match resolution {
        Resolution::Value(value) => target.settle(Ok(value)),
        Resolution::Deferred(source) if source.ptr_eq(target) => {
            debug!("deferred value resolved with itself, leaving it pending");
        }
        Resolution::Deferred(source) => {
            trace!("adopting deferred value");
            let (resolve, reject) = resolving_functions(target);
            source.subscribe(move |outcome| match outcome {
                Ok(value) => resolve.resolve(value),
                Err(reason) => reject.reject(reason),
            });
        }
        Resolution::Thenable(thenable) => {
            trace!("adopting thenable");
            let (resolve, reject) = resolving_functions(target);
            thenable.register_continuation(resolve, reject);
        }
    }
}

/// Settles `target` from a handler's outcome.
pub(crate) fn settle_handled<T: Value, E: Reason>(
    target: &Deferred<T, E>,
    handled: Handled<T, E>,
) {
    match handled {
        Ok(resolution) => resolve_with(target, resolution),
        Err(Thrown::Reason(reason)) => target.settle(Err(reason)),
        Err(Thrown::Deferred(deferred)) => resolve_with(target, Resolution::Deferred(deferred)),
        Err(Thrown::Thenable(thenable)) => resolve_with(target, Resolution::Thenable(thenable)),
    }
}

#[cfg(test)]
mod tests {
    use super::{Rejecter, Resolution, Resolver, Thenable};
    use crate::{Deferred, DeferredState, MicrotaskQueue, Runtime};

    fn runtime() -> (Runtime, MicrotaskQueue) {
        let queue = MicrotaskQueue::new();
        (Runtime::new(queue.clone()), queue)
    }

    struct Later(Deferred<i32, String>);

    impl Thenable<i32, String> for Later {
        fn register_continuation(
            self: Box<Self>,
            resolve: Resolver<i32, String>,
            _reject: Rejecter<i32, String>,
        ) {
            resolve.resolve(self.0);
        }
    }

    struct Refuses;

    impl Thenable<i32, String> for Refuses {
        fn register_continuation(
            self: Box<Self>,
            _resolve: Resolver<i32, String>,
            reject: Rejecter<i32, String>,
        ) {
            reject.reject("refused".to_string());
        }
    }

    #[test]
    fn plain_value_fulfills_immediately() {
        let (runtime, _queue) = runtime();
        let (deferred, resolve, _reject) = runtime.with_resolvers::<i32, String>();
        resolve.resolve(5);
        assert_eq!(deferred.peek(), Some(Ok(5)));
    }

    #[test]
    fn second_resolve_is_ignored() {
        let (runtime, _queue) = runtime();
        let (deferred, resolve, reject) = runtime.with_resolvers::<&str, String>();
        resolve.resolve("first");
        resolve.resolve("second");
        reject.reject("late".to_string());
        assert_eq!(deferred.peek(), Some(Ok("first")));
    }

    #[test]
    fn adoption_locks_out_later_calls() {
        let (runtime, queue) = runtime();
        let (source, resolve_source, _) = runtime.with_resolvers::<i32, String>();
        let (deferred, resolve, reject) = runtime.with_resolvers::<i32, String>();
        resolve.resolve(source);
        reject.reject("too late".to_string());
        assert_eq!(deferred.state(), DeferredState::Pending);

        resolve_source.resolve(3);
        queue.run_until_idle();
        assert_eq!(deferred.peek(), Some(Ok(3)));
    }

    #[test]
    fn thenable_resolving_to_deferred_flattens() {
        let (runtime, queue) = runtime();
        let inner = runtime.resolved::<i32, String>(11);
        let thenable: Box<dyn Thenable<i32, String>> = Box::new(Later(inner));
        let outer = runtime.resolve(Resolution::Thenable(thenable));
        assert!(outer.is_pending());
        queue.run_until_idle();
        assert_eq!(outer.peek(), Some(Ok(11)));
    }

    #[test]
    fn resolving_with_itself_stays_pending() {
        let (runtime, queue) = runtime();
        let (deferred, resolve, reject) = runtime.with_resolvers::<i32, String>();
        resolve.resolve(deferred.clone());
        reject.reject("ignored".to_string());
        queue.run_until_idle();
        assert!(deferred.is_pending());
        assert_eq!(format!("{deferred:?}"), "Deferred { state: Pending, observers: 0 }");
    }

    #[test]
    fn thenable_rejection_is_adopted() {
        let (runtime, _queue) = runtime();
        let thenable: Box<dyn Thenable<i32, String>> = Box::new(Refuses);
        let outer = runtime.resolve(Resolution::Thenable(thenable));
        assert_eq!(outer.peek(), Some(Err("refused".to_string())));
    }

    #[test]
    fn deferred_reason_is_not_adopted() {
        let (runtime, _queue) = runtime();
        let reason = runtime.resolved::<i32, String>(1);
        let (deferred, _resolve, reject) = runtime.with_resolvers::<i32, Deferred<i32, String>>();
        reject.reject(reason.clone());
        assert_eq!(deferred.state(), DeferredState::Rejected);
        match deferred.peek() {
            Some(Err(held)) => assert!(held.ptr_eq(&reason)),
            other => panic!("expected opaque rejection, got {other:?}"),
        }
    }
}
