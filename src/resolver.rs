use crate::{Disposable, ResolutionSlot, SerialDisposable};
use log::{debug, trace};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Disposal-guarded sink shared by a promise and its resolvers.
///
/// The first resolution or cancellation disposes the guard; from then on the
/// sink and the cancellation cell are released and resolutions are dropped.
pub(crate) struct Guard<T> {
    disposed: AtomicBool,
    sink: Mutex<Option<ResolutionSlot<T>>>,
    cancellation: SerialDisposable,
}

impl<T: Clone + Send + 'static> Guard<T> {
    pub(crate) fn new(sink: ResolutionSlot<T>) -> Self {
        Self {
            disposed: AtomicBool::new(false),
            sink: Mutex::new(Some(sink)),
            cancellation: SerialDisposable::new(),
        }
    }

    /// Flips the guard, returning the sink if this call was the first.
    fn claim(&self) -> Option<ResolutionSlot<T>> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return None;
        }
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn resolve(&self, value: T) {
        match self.claim() {
            Some(sink) => {
                if let Err(err) = sink.resolve(value) {
                    debug!("resolver forwarded into a settled slot: {}", err);
                }
                self.cancellation.dispose();
            }
            None => trace!("dropping resolution after the resolver was disposed"),
        }
    }

    /// Cancels pending forwarding; a no-op once the guard is disposed.
    pub(crate) fn dispose(&self) -> bool {
        if self.claim().is_none() {
            return false;
        }
        self.cancellation.dispose();
        true
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

/// The capability an action uses to deliver its value.
///
/// Clones share one guard: whichever clone resolves first wins and every
/// later call is ignored.
///
/// # Examples
///
/// ```
/// use lazy_promise::Promise;
///
/// let promise = Promise::new(|resolver| {
///     resolver.resolve("first");
///     resolver.resolve("second");
/// });
/// assert_eq!(promise.wait(), "first");
/// ```
pub struct Resolver<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    guard: Arc<Guard<T>>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Resolver<T> {
    pub(crate) fn new(guard: Arc<Guard<T>>) -> Self {
        Self {
            inner: Arc::new(Inner { guard }),
        }
    }

    pub fn resolve(&self, value: T) {
        self.inner.guard.resolve(value)
    }

    /// Whether the promise has been resolved or cancelled.
    pub fn is_disposed(&self) -> bool {
        self.inner.guard.is_disposed()
    }

    /// Makes `handle` the stage that cancelling the promise tears down,
    /// disposing the stage it replaces.
    pub fn set_cancellation(&self, handle: Disposable) {
        self.inner.guard.cancellation.set(handle)
    }

    /// Like [`Resolver::set_cancellation`], but only if no stage has been
    /// installed yet. Otherwise `handle` is disposed and `false` returned.
    pub fn set_cancellation_if_empty(&self, handle: Disposable) -> bool {
        self.inner.guard.cancellation.set_if_empty(handle)
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        if !self.guard.disposed.load(Ordering::Acquire) {
            debug!("resolver dropped without resolving; the promise will never settle");
        }
    }
}

impl<T> Debug for Resolver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("disposed", &self.inner.guard.disposed.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Guard, Resolver};
    use crate::{Disposable, ResolutionSlot};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn resolver_for(slot: &ResolutionSlot<u32>) -> (Arc<Guard<u32>>, Resolver<u32>) {
        let guard = Arc::new(Guard::new(slot.clone()));
        let resolver = Resolver::new(guard.clone());
        (guard, resolver)
    }

    #[test]
    fn test_first_resolution_wins() {
        let slot = ResolutionSlot::new();
        let (_guard, resolver) = resolver_for(&slot);
        let deliveries = Arc::new(AtomicUsize::new(0));
        let counter = deliveries.clone();
        let _subscription = slot.observe(move |value| {
            if value.is_some() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        resolver.resolve(1);
        resolver.resolve(2);
        resolver.clone().resolve(3);
        assert_eq!(slot.current(), Some(1));
        assert_eq!(deliveries.load(Ordering::SeqCst), 1);
        assert!(resolver.is_disposed());
    }

    #[test]
    fn test_racing_resolvers() {
        let slot = ResolutionSlot::new();
        let (_guard, resolver) = resolver_for(&slot);
        let tasks: Vec<_> = (0..8)
            .map(|n| {
                let resolver = resolver.clone();
                thread::spawn(move || resolver.resolve(n))
            })
            .collect();
        for task in tasks {
            task.join().expect("The resolver thread has panicked");
        }
        assert!(slot.current().is_some());
    }

    #[test]
    fn test_dispose_drops_later_resolution() {
        let slot = ResolutionSlot::new();
        let (guard, resolver) = resolver_for(&slot);
        let stage = Disposable::empty();
        resolver.set_cancellation(stage.clone());
        assert!(guard.dispose());
        assert!(!guard.dispose());
        assert!(stage.is_disposed());
        resolver.resolve(5);
        assert_eq!(slot.current(), None);
    }

    #[test]
    fn test_resolution_releases_stage() {
        let slot = ResolutionSlot::new();
        let (guard, resolver) = resolver_for(&slot);
        let stage = Disposable::empty();
        resolver.set_cancellation(stage.clone());
        resolver.resolve(5);
        assert!(stage.is_disposed());
        assert!(!guard.dispose());
        assert_eq!(slot.current(), Some(5));
    }
}
