//! A broadcast cell that starts empty and is resolved exactly once.
use crate::{Disposable, Error};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Callback<T> = Box<dyn FnMut(Option<T>) + Send>;

/// Multicast single-value store.
///
/// Every observer sees `None` first and then, once, `Some(value)`. Observers
/// are always invoked outside the slot's own lock.
///
/// # Examples
///
/// ```
/// use lazy_promise::ResolutionSlot;
/// use std::sync::{Arc, Mutex};
///
/// let slot = ResolutionSlot::<u8>::new();
/// let seen = Arc::new(Mutex::new(vec![]));
/// let log = seen.clone();
/// let _subscription = slot.observe(move |value| log.lock().unwrap().push(value));
/// slot.resolve(7).unwrap();
/// assert!(slot.resolve(8).is_err());
/// assert_eq!(*seen.lock().unwrap(), vec![None, Some(7)]);
/// assert_eq!(slot.current(), Some(7));
/// ```
pub struct ResolutionSlot<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ResolutionSlot<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    value: Option<T>,
    next_id: u64,
    observers: HashMap<u64, Arc<Observer<T>>>,
}

struct Observer<T> {
    live: AtomicBool,
    // Held for the whole of a delivery, so the empty delivery always lands
    // before the resolved one.
    callback: Mutex<Callback<T>>,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone + Send + 'static> ResolutionSlot<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    value: None,
                    next_id: 0,
                    observers: HashMap::new(),
                }),
            }),
        }
    }

    /// Registers `callback`, delivering `None` right away and the resolved
    /// value once it exists.
    ///
    /// Disposing the returned handle before resolution guarantees the
    /// callback never sees the value.
    pub fn observe<F>(&self, callback: F) -> Disposable
    where
        F: FnMut(Option<T>) + Send + 'static,
    {
        let observer = Arc::new(Observer {
            live: AtomicBool::new(true),
            callback: Mutex::new(Box::new(callback) as Callback<T>),
        });
        let mut callback = observer
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let (id, resolved) = {
            let mut inner = self.shared.lock();
            match inner.value {
                Some(ref value) => (None, Some(value.clone())),
                None => {
                    let id = inner.next_id;
                    inner.next_id += 1;
                    inner.observers.insert(id, observer.clone());
                    (Some(id), None)
                }
            }
        };

        let subscription = {
            let observer = Arc::downgrade(&observer);
            let shared = Arc::downgrade(&self.shared);
            Disposable::new(move || {
                if let Some(observer) = observer.upgrade() {
                    observer.live.store(false, Ordering::SeqCst);
                }
                if let Some(id) = id {
                    remove_observer(&shared, id);
                }
            })
        };

        (*callback)(None);
        if let Some(value) = resolved {
            if observer.live.swap(false, Ordering::SeqCst) {
                (*callback)(Some(value));
            }
        }
        drop(callback);
        subscription
    }

    /// Reads the value without blocking.
    pub fn current(&self) -> Option<T> {
        self.shared.lock().value.clone()
    }

    pub fn is_resolved(&self) -> bool {
        self.shared.lock().value.is_some()
    }

    /// Number of observers still waiting for the value.
    pub fn observer_count(&self) -> usize {
        self.shared.lock().observers.len()
    }

    /// Stores `value` and delivers it to every registered observer.
    ///
    /// A slot can only be resolved once; later calls return
    /// [`Error::AlreadyResolved`] and leave the first value in place.
    pub fn resolve(&self, value: T) -> Result<(), Error> {
        let observers = {
            let mut inner = self.shared.lock();
            if inner.value.is_some() {
                return Err(Error::AlreadyResolved);
            }
            inner.value = Some(value.clone());
            std::mem::take(&mut inner.observers)
        };

        for observer in observers.into_values() {
            let mut callback = observer
                .callback
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if observer.live.swap(false, Ordering::SeqCst) {
                (*callback)(Some(value.clone()));
            }
        }
        Ok(())
    }
}

fn remove_observer<T>(shared: &Weak<Shared<T>>, id: u64) {
    if let Some(shared) = shared.upgrade() {
        shared.lock().observers.remove(&id);
    }
}

impl<T: Clone + Send + 'static> Default for ResolutionSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for ResolutionSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("ResolutionSlot")
            .field("resolved", &inner.value.is_some())
            .field("observers", &inner.observers.len())
            .finish()
    }
}
