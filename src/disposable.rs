//! Idempotent cancellation handles.
//!
//! A [`Disposable`] runs its teardown at most once no matter how many clones
//! call [`Disposable::dispose`]. A [`SerialDisposable`] holds one inner handle
//! at a time and disposes the previous one whenever a new one is installed.
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type Teardown = Box<dyn FnOnce() + Send>;

/// A cloneable, idempotent cancellation handle.
///
/// # Examples
///
/// ```
/// use lazy_promise::Disposable;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let count = Arc::new(AtomicUsize::new(0));
/// let counter = count.clone();
/// let handle = Disposable::new(move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
/// let other = handle.clone();
/// handle.dispose();
/// other.dispose();
/// assert_eq!(count.load(Ordering::SeqCst), 1);
/// assert!(other.is_disposed());
/// ```
#[derive(Clone)]
pub struct Disposable {
    inner: Arc<Inner>,
}

struct Inner {
    disposed: AtomicBool,
    teardown: Mutex<Option<Teardown>>,
}

impl Disposable {
    pub fn new<F>(teardown: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                disposed: AtomicBool::new(false),
                teardown: Mutex::new(Some(Box::new(teardown))),
            }),
        }
    }

    /// A handle with nothing to tear down.
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(Inner {
                disposed: AtomicBool::new(false),
                teardown: Mutex::new(None),
            }),
        }
    }

    /// Runs the teardown if this is the first call on any clone of the handle.
    pub fn dispose(&self) {
        self.try_dispose();
    }

    /// Like [`Disposable::dispose`], but reports whether this call was the one
    /// that disposed the handle.
    pub fn try_dispose(&self) -> bool {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let teardown = self
            .inner
            .teardown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(teardown) = teardown {
            teardown()
        }
        true
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }
}

impl Default for Disposable {
    fn default() -> Self {
        Self::empty()
    }
}

impl Debug for Disposable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A cell holding one active [`Disposable`].
///
/// Installing a new handle disposes the one it replaces, and disposing the
/// serial disposes whatever it currently holds. Anything installed after the
/// serial was disposed is disposed on the spot.
#[derive(Clone, Default)]
pub struct SerialDisposable {
    inner: Arc<Mutex<Serial>>,
}

#[derive(Default)]
struct Serial {
    disposed: bool,
    // `true` once any handle has been installed, even if later replaced.
    used: bool,
    current: Option<Disposable>,
}

impl SerialDisposable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Serial> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Swaps in `next` and disposes the previous handle.
    pub fn set(&self, next: Disposable) {
        let previous = {
            let mut serial = self.lock();
            if serial.disposed {
                Some(next)
            } else {
                serial.used = true;
                serial.current.replace(next)
            }
        };
        if let Some(previous) = previous {
            previous.dispose()
        }
    }

    /// Installs `next` only if no handle was ever installed before.
    ///
    /// Returns `false` and disposes `next` otherwise.
    pub fn set_if_empty(&self, next: Disposable) -> bool {
        let rejected = {
            let mut serial = self.lock();
            if serial.disposed || serial.used {
                Some(next)
            } else {
                serial.used = true;
                serial.current = Some(next);
                None
            }
        };
        match rejected {
            Some(next) => {
                next.dispose();
                false
            }
            None => true,
        }
    }

    pub fn dispose(&self) {
        let current = {
            let mut serial = self.lock();
            if serial.disposed {
                return;
            }
            serial.disposed = true;
            serial.current.take()
        };
        if let Some(current) = current {
            current.dispose()
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    /// A plain handle that disposes this serial.
    pub fn as_disposable(&self) -> Disposable {
        let serial = self.clone();
        Disposable::new(move || serial.dispose())
    }
}

impl Debug for SerialDisposable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let serial = self.lock();
        f.debug_struct("SerialDisposable")
            .field("disposed", &serial.disposed)
            .field("current", &serial.current)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Disposable, SerialDisposable};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn counted(count: &Arc<AtomicUsize>) -> Disposable {
        let count = count.clone();
        Disposable::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_dispose_runs_once_across_threads() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = counted(&count);
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let handle = handle.clone();
                thread::spawn(move || handle.dispose())
            })
            .collect();
        for task in tasks {
            task.join().expect("The dispose thread has panicked");
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(handle.is_disposed());
    }

    #[test]
    fn test_try_dispose_reports_single_winner() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = counted(&count);
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let handle = handle.clone();
                thread::spawn(move || handle.try_dispose())
            })
            .collect();
        let winners = tasks
            .into_iter()
            .map(|task| task.join().expect("The dispose thread has panicked"))
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!handle.try_dispose());
    }

    #[test]
    fn test_empty_handle() {
        let handle = Disposable::empty();
        assert!(!handle.is_disposed());
        handle.dispose();
        assert!(handle.is_disposed());
    }

    #[test]
    fn test_serial_set_disposes_previous() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let serial = SerialDisposable::new();
        serial.set(counted(&first));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        serial.set(counted(&second));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
        serial.dispose();
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_serial_disposes_late_arrivals() {
        let count = Arc::new(AtomicUsize::new(0));
        let serial = SerialDisposable::new();
        serial.dispose();
        serial.set(counted(&count));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!serial.set_if_empty(counted(&count)));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_set_if_empty_keeps_later_stage() {
        let upstream = Arc::new(AtomicUsize::new(0));
        let downstream = Arc::new(AtomicUsize::new(0));
        let serial = SerialDisposable::new();
        serial.set(counted(&downstream));
        assert!(!serial.set_if_empty(counted(&upstream)));
        assert_eq!(upstream.load(Ordering::SeqCst), 1);
        assert_eq!(downstream.load(Ordering::SeqCst), 0);

        let fresh = SerialDisposable::new();
        assert!(fresh.set_if_empty(Disposable::empty()));
    }

    #[test]
    fn test_as_disposable() {
        let count = Arc::new(AtomicUsize::new(0));
        let serial = SerialDisposable::new();
        serial.set(counted(&count));
        let handle = serial.as_disposable();
        handle.dispose();
        assert!(serial.is_disposed());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
