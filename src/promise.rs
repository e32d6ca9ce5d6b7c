use crate::resolver::Guard;
use crate::state::StateCell;
use crate::{Disposable, ResolutionSlot, Resolver, SerialDisposable};
use log::trace;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

/// A one-shot deferred value.
///
/// Cloning a `Promise` clones the handle, not the work: all clones share the
/// same action, state and value.
///
/// # Examples
///
/// ```
/// use lazy_promise::Promise;
/// use std::thread;
///
/// let promise = Promise::new(|resolver| {
///     thread::spawn(move || resolver.resolve(String::from("🍓")));
/// });
/// let waiter = promise.clone();
/// let task1 = thread::spawn(move || waiter.wait());
/// assert_eq!(promise.wait(), "🍓");
/// assert_eq!(task1.join().expect("The task1 thread has panicked"), "🍓");
/// ```
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    state: StateCell<T>,
    slot: ResolutionSlot<T>,
    guard: Arc<Guard<T>>,
    cancelled: AtomicBool,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Wraps `action` without running it.
    ///
    /// The action receives a [`Resolver`] and is expected to call
    /// [`Resolver::resolve`] once, now or later, from any thread.
    pub fn new<F>(action: F) -> Self
    where
        F: FnOnce(Resolver<T>) + Send + 'static,
    {
        let slot = ResolutionSlot::new();
        let guard = Arc::new(Guard::new(slot.clone()));
        Self {
            inner: Arc::new(Inner {
                state: StateCell::new(Box::new(action)),
                slot,
                guard,
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    /// A promise whose action resolves to `value` as soon as it is started.
    pub fn resolved(value: T) -> Self {
        Self::new(move |resolver| resolver.resolve(value))
    }

    /// Runs the action on this thread if no one has started it yet.
    ///
    /// The action may resolve the promise before this returns. A panic in the
    /// action propagates to the caller and leaves the promise started but
    /// never resolved.
    pub fn start(&self) {
        if let Some(action) = self.inner.state.exchange_started() {
            trace!("starting promise action");
            action(Resolver::new(self.inner.guard.clone()));
        }
    }

    /// Starts the promise and blocks until it resolves.
    ///
    /// There is no timeout: if the action never resolves, this never returns.
    pub fn wait(&self) -> T {
        self.start();

        let signal = Arc::new((Mutex::new(()), Condvar::new()));
        let wake = signal.clone();
        // The wake-up takes the same lock the waiter checks under, so it
        // cannot fall between the check and the wait.
        let subscription = self.inner.slot.observe(move |value| {
            if value.is_some() {
                let (lock, condvar) = &*wake;
                let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
                condvar.notify_all();
            }
        });

        let (lock, condvar) = &*signal;
        let mut guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let value = loop {
            if let Some(value) = self.inner.slot.current() {
                break value;
            }
            guard = condvar
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        };
        drop(guard);
        subscription.dispose();
        value
    }

    /// Calls `callback` once when the promise resolves, without starting it.
    ///
    /// Disposing the returned handle before resolution keeps the callback
    /// from ever running.
    pub fn notify<F>(&self, callback: F) -> Disposable
    where
        F: FnOnce(T) + Send + 'static,
    {
        let subscription = SerialDisposable::new();
        let handle = subscription.as_disposable();
        let this = handle.clone();
        let mut callback = Some(callback);
        let observation = self.inner.slot.observe(move |value| {
            let Some(value) = value else { return };
            if !this.try_dispose() {
                return;
            }
            if let Some(callback) = callback.take() {
                callback(value)
            }
        });
        subscription.set(observation);
        handle
    }

    /// Chains a dependent promise chosen from this promise's value.
    ///
    /// Nothing runs until the returned promise is started; then this promise
    /// is started, and once it resolves `continuation` picks the next promise,
    /// whose value becomes the result. Cancelling the returned promise stops
    /// whichever stage is still pending, but never stops an action that is
    /// already running. A chained promise cancelled before it starts runs
    /// nothing at all.
    pub fn then<U, F>(&self, continuation: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        let receiver = self.clone();
        Promise::new(move |resolver: Resolver<U>| {
            if resolver.is_disposed() {
                trace!("chained promise cancelled before it started");
                return;
            }
            let forward = resolver.clone();
            let upstream = receiver.notify(move |value| {
                if forward.is_disposed() {
                    return;
                }
                let dependent = continuation(value);
                let sink = forward.clone();
                let downstream = dependent.notify(move |value| sink.resolve(value));
                forward.set_cancellation(downstream);
                dependent.start();
            });
            // If the receiver had already resolved, the dependent stage is
            // installed by now and must not be displaced.
            resolver.set_cancellation_if_empty(upstream);
            receiver.start();
        })
    }

    /// Chains a plain transformation of the value.
    pub fn map<U, F>(&self, transform: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.then(move |value| Promise::resolved(transform(value)))
    }

    /// Stops forwarding into this promise.
    ///
    /// An unresolved promise will never resolve after this, and its observers
    /// never fire. Running actions are not interrupted and a resolved promise
    /// keeps its value.
    pub fn cancel(&self) {
        if self.inner.guard.dispose() {
            trace!("promise cancelled before resolving");
            self.inner.cancelled.store(true, Ordering::Release);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    pub fn is_started(&self) -> bool {
        self.inner.state.is_started()
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.slot.is_resolved()
    }

    /// The value, if the promise has already resolved. Never starts it.
    pub fn try_value(&self) -> Option<T> {
        self.inner.slot.current()
    }

    pub(crate) fn slot(&self) -> &ResolutionSlot<T> {
        &self.inner.slot
    }
}

impl<T: Clone + Send + 'static> Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("started", &self.is_started())
            .field("resolved", &self.is_resolved())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
