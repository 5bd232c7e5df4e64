use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, Thread};

/// A mechanism for thread synchronization and notification.
///
/// A signal belongs to the thread that created it; any thread may notify it,
/// waking the owner out of a park.
pub(crate) struct Signal {
    state: AtomicUsize,
    thread: Thread,
}

impl Signal {
    /// Creates a new signal for the current thread.
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicUsize::new(0),
            thread: thread::current(),
        }
    }

    /// Notifies the signal, waking up the waiting thread.
    pub(crate) fn notify(&self) {
        self.state.store(1, Ordering::Release);
        self.thread.unpark();
    }

    /// Returns true if the signal has been notified.
    pub(crate) fn is_notified(&self) -> bool {
        self.state.load(Ordering::Acquire) != 0
    }
}
