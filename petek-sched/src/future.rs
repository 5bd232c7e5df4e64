//! Promise/future pair with multi-future waiting
//!
//! A [`Promise`] is fulfilled exactly once; the paired [`Future`] blocks in
//! [`get`](Future::get) until then. [`wait_any`] waits on a whole set by
//! registering a park/unpark signal with every future and re-checking on
//! each wake; a pending interruption on the calling thread ends the wait
//! early, exactly like a timeout.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::TaskError;
use crate::interrupt;
use crate::signal::Signal;

enum State<T> {
    Pending,
    Ready(Result<T, TaskError>),
}

struct Shared<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
    signals: Mutex<Vec<Arc<Signal>>>,
}

/// Producing half of a future; fulfilled exactly once.
pub struct Promise<T>(Arc<Shared<T>>);

/// Consuming half of a promise.
pub struct Future<T>(Arc<Shared<T>>);

/// Creates a connected promise/future pair.
pub fn promise<T>() -> (Promise<T>, Future<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::Pending),
        cond: Condvar::new(),
        signals: Mutex::new(Vec::new()),
    });
    (Promise(shared.clone()), Future(shared))
}

impl<T> Promise<T> {
    /// Fulfills the future, waking every waiter.
    pub fn set(self, result: Result<T, TaskError>) {
        *self.0.state.lock().unwrap() = State::Ready(result);
        self.0.cond.notify_all();
        for signal in self.0.signals.lock().unwrap().drain(..) {
            signal.notify();
        }
    }
}

impl<T> Future<T> {
    /// Whether the promise has been fulfilled.
    pub fn is_ready(&self) -> bool {
        matches!(*self.0.state.lock().unwrap(), State::Ready(_))
    }

    /// Blocks until fulfilled and takes the outcome.
    pub fn get(self) -> Result<T, TaskError> {
        let mut state = self.0.state.lock().unwrap();
        loop {
            match std::mem::replace(&mut *state, State::Pending) {
                State::Ready(result) => return result,
                State::Pending => state = self.0.cond.wait(state).unwrap(),
            }
        }
    }

    /// Blocks until fulfilled or `timeout` elapses. Returns whether the
    /// future is ready.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.0.state.lock().unwrap();
        loop {
            if matches!(*state, State::Ready(_)) {
                return true;
            }
            match deadline {
                None => state = self.0.cond.wait(state).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    state = self.0.cond.wait_timeout(state, deadline - now).unwrap().0;
                }
            }
        }
    }

    fn register(&self, signal: &Arc<Signal>) {
        let mut signals = self.0.signals.lock().unwrap();
        if matches!(*self.0.state.lock().unwrap(), State::Ready(_)) {
            signal.notify();
        } else {
            signals.push(signal.clone());
        }
    }
}

/// Waits until some future in `futures` is ready and returns its index.
///
/// Returns `None` once `timeout` elapses (pass `None` to wait forever) or
/// when an interruption is pending on the calling thread; the caller is
/// expected to hit an interrupt point right after.
pub fn wait_any<T>(futures: &[Future<T>], timeout: Option<Duration>) -> Option<usize> {
    let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
    let signal = Arc::new(Signal::new());
    for future in futures {
        // a completion during registration already guarantees a ready future
        if signal.is_notified() {
            break;
        }
        future.register(&signal);
    }
    loop {
        if let Some(index) = futures.iter().position(|f| f.is_ready()) {
            return Some(index);
        }
        if interrupt::is_pending() {
            return None;
        }
        match deadline {
            None => thread::park(),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return None;
                }
                thread::park_timeout(deadline - now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_then_get() {
        let (promise, future) = promise::<u32>();
        promise.set(Ok(7));
        assert!(future.is_ready());
        assert_eq!(future.get(), Ok(7));
    }

    #[test]
    fn test_get_blocks_until_set() {
        let (promise, future) = promise::<u32>();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            promise.set(Ok(42));
        });
        assert_eq!(future.get(), Ok(42));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_any_timeout() {
        let (_promise, future) = promise::<u32>();
        let futures = [future];
        assert_eq!(wait_any(&futures, Some(Duration::from_millis(10))), None);
    }

    #[test]
    fn test_wait_any_ready() {
        let (p1, f1) = promise::<u32>();
        let (_p2, f2) = promise::<u32>();
        let futures = [f1, f2];
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            p1.set(Ok(1));
        });
        assert_eq!(wait_any(&futures, None), Some(0));
        handle.join().unwrap();
    }
}
