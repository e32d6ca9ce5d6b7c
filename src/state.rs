use crate::Resolver;
use std::sync::{Mutex, PoisonError};

pub(crate) type Action<T> = Box<dyn FnOnce(Resolver<T>) + Send>;

enum State<T> {
    Suspended(Action<T>),
    Started,
}

/// Two-state cell: `Suspended(action)` until the first exchange, `Started`
/// forever after.
pub(crate) struct StateCell<T> {
    state: Mutex<State<T>>,
}

impl<T> StateCell<T> {
    pub(crate) fn new(action: Action<T>) -> Self {
        Self {
            state: Mutex::new(State::Suspended(action)),
        }
    }

    /// Moves the cell to `Started` and hands the action to the one caller
    /// that saw it suspended.
    pub(crate) fn exchange_started(&self) -> Option<Action<T>> {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, State::Started)
        };
        match previous {
            State::Suspended(action) => Some(action),
            State::Started => None,
        }
    }

    pub(crate) fn is_started(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(*state, State::Started)
    }
}

#[cfg(test)]
mod tests {
    use super::StateCell;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_single_winner() {
        let cell = Arc::new(StateCell::<u8>::new(Box::new(|_: crate::Resolver<u8>| {})));
        let winners = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(16));
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cell = cell.clone();
                let winners = winners.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    if cell.exchange_started().is_some() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for task in tasks {
            task.join().expect("The start thread has panicked");
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert!(cell.is_started());
    }

    #[test]
    fn test_starts_suspended() {
        let cell = StateCell::<u8>::new(Box::new(|_: crate::Resolver<u8>| {}));
        assert!(!cell.is_started());
        assert!(cell.exchange_started().is_some());
        assert!(cell.exchange_started().is_none());
    }
}
