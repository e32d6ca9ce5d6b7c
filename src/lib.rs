//! A one-shot deferred value that runs its work on demand.
//!
//! A [`Promise`] owns an action that produces a single value. Nothing runs
//! until [`Promise::start`] (or [`Promise::wait`], or polling the promise as a
//! future) is called, and however many threads race to start it the action
//! runs once. The value is handed to the action's [`Resolver`]; only the first
//! resolution counts.
//!
//! # Examples
//!
//! ```
//! use lazy_promise::Promise;
//! use std::thread;
//!
//! let first = Promise::new(|resolver| {
//!     thread::spawn(move || resolver.resolve(1));
//! });
//! let second = first.then(|value| Promise::new(move |resolver| resolver.resolve(value + 1)));
//! assert_eq!(second.wait(), 2);
//! ```
use thiserror::Error;

pub mod disposable;
mod future;
mod promise;
mod resolver;
pub mod slot;
mod state;

pub use disposable::{Disposable, SerialDisposable};
pub use future::PromiseFuture;
pub use promise::Promise;
pub use resolver::Resolver;
pub use slot::ResolutionSlot;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("the slot has already been resolved")]
    AlreadyResolved,
}
