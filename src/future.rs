use crate::{Disposable, Promise};
use std::fmt::Debug;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, Waker};

/// Awaits a [`Promise`] from async code.
///
/// The promise is started on the first poll. Dropping the future only drops
/// its subscription; the promise itself keeps going.
///
/// # Examples
///
/// ```
/// use lazy_promise::Promise;
/// use futures::executor::block_on;
/// use std::thread;
///
/// let promise = Promise::new(|resolver| {
///     thread::spawn(move || resolver.resolve(String::from("🍓")));
/// });
/// let task1 = thread::spawn(move || block_on(async {
///     println!("我等到了{:?}", promise.await);
/// }));
/// task1.join().expect("The task1 thread has panicked");
/// ```
pub struct PromiseFuture<T> {
    promise: Promise<T>,
    waker: Arc<Mutex<Option<Waker>>>,
    subscription: Option<Disposable>,
}

impl<T: Clone + Send + 'static> IntoFuture for Promise<T> {
    type Output = T;
    type IntoFuture = PromiseFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        PromiseFuture {
            promise: self,
            waker: Arc::new(Mutex::new(None)),
            subscription: None,
        }
    }
}

impl<T: Clone + Send + 'static> Future for PromiseFuture<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.promise.start();
        if let Some(value) = self.promise.try_value() {
            return Poll::Ready(value);
        }

        *self.waker.lock().unwrap_or_else(PoisonError::into_inner) = Some(cx.waker().clone());
        if self.subscription.is_none() {
            let waker = self.waker.clone();
            let subscription = self.promise.slot().observe(move |value| {
                if value.is_none() {
                    return;
                }
                if let Some(waker) = waker.lock().unwrap_or_else(PoisonError::into_inner).take() {
                    waker.wake()
                }
            });
            self.subscription = Some(subscription);
        }

        // The value may have landed before the waker was stored.
        match self.promise.try_value() {
            Some(value) => Poll::Ready(value),
            None => Poll::Pending,
        }
    }
}

impl<T> Drop for PromiseFuture<T> {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.dispose()
        }
    }
}

impl<T: Clone + Send + 'static> Debug for PromiseFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromiseFuture")
            .field("promise", &self.promise)
            .field("subscribed", &self.subscription.is_some())
            .finish()
    }
}
