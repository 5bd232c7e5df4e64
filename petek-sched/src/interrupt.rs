//! Cooperative thread interruption
//!
//! Every thread owns an interrupt state. Delivering a reason through a
//! [`ThreadHandle`] sets it pending and unparks the target; the reason is
//! raised at the target's next [`interrupt_point`] and consumed there.

use std::sync::{Arc, Mutex};
use std::thread::{self, Thread};

use crate::error::TaskError;

struct State {
    pending: Mutex<Option<TaskError>>,
    thread: Thread,
}

std::thread_local! {
    static CURRENT: Arc<State> = Arc::new(State {
        pending: Mutex::new(None),
        thread: thread::current(),
    });
}

/// Remote handle to a thread's interrupt state.
#[derive(Clone)]
pub struct ThreadHandle(Arc<State>);

impl ThreadHandle {
    /// Delivers `reason` to the owning thread. The target observes it at its
    /// next interrupt point; a blocked `wait_any` is woken early.
    pub fn interrupt(&self, reason: TaskError) {
        *self.0.pending.lock().unwrap() = Some(reason);
        self.0.thread.unpark();
    }
}

/// Handle to the current thread's interrupt state.
pub fn current() -> ThreadHandle {
    CURRENT.with(|state| ThreadHandle(state.clone()))
}

/// Raises and consumes a pending interruption, if any.
pub fn interrupt_point() -> Result<(), TaskError> {
    match CURRENT.with(|state| state.pending.lock().unwrap().take()) {
        Some(reason) => Err(reason),
        None => Ok(()),
    }
}

/// Whether an interruption is pending without consuming it.
pub(crate) fn is_pending() -> bool {
    CURRENT.with(|state| state.pending.lock().unwrap().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deliver_and_consume() {
        assert!(interrupt_point().is_ok());
        current().interrupt(TaskError::Terminated);
        assert!(is_pending());
        assert_eq!(interrupt_point(), Err(TaskError::Terminated));
        // one-shot: consumed by the point above
        assert!(interrupt_point().is_ok());
    }
}
