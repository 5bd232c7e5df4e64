//! Schedulable tasks
//!
//! A [`Task`] couples a one-shot body with a name-derived [`Id`], a
//! predecessor set, and a future carrying its outcome. The body receives a
//! [`TaskContext`] and is expected to call
//! [`interrupt_point`](TaskContext::interrupt_point) at reasonable
//! intervals so cancellation can land.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, Thread};

use crate::error::TaskError;
use crate::future::{promise, Future};
use crate::id::Id;

/// Scheduler-side task life cycle.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum TaskState {
    /// Inserted into the graph
    Registered = 0,
    /// Part of an enqueued closure, waiting on predecessors
    Queued = 1,
    /// Handed to the worker pool
    Ready = 2,
    /// Body executing on a worker
    Running = 3,
    /// Completed normally
    Done = 4,
    /// Failed, or never started because a predecessor failed
    Failed = 5,
}

impl TaskState {
    fn from_u8(raw: u8) -> TaskState {
        match raw {
            0 => TaskState::Registered,
            1 => TaskState::Queued,
            2 => TaskState::Ready,
            3 => TaskState::Running,
            4 => TaskState::Done,
            _ => TaskState::Failed,
        }
    }

    /// Whether the task can no longer change state.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed)
    }
}

/// How the scheduler disposes of a task body.
pub(crate) enum Exec<'a> {
    /// Run the body on the current worker
    Run(&'a TaskContext<'a>),
    /// Resolve the future with a failure without running
    Fail(TaskError),
}

type ExecFn = Box<dyn for<'a> FnOnce(Exec<'a>) -> Result<(), TaskError> + Send>;

pub(crate) struct TaskCore {
    pub(crate) name: Arc<str>,
    pub(crate) id: Id,
    pub(crate) deps: Box<[(Id, Arc<str>)]>,
    state: AtomicU8,
    exec: Mutex<Option<ExecFn>>,
    interrupted: Mutex<Option<TaskError>>,
    running_thread: Mutex<Option<Thread>>,
}

impl TaskCore {
    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn try_transition(&self, from: TaskState, to: TaskState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn take_exec(&self) -> Option<ExecFn> {
        self.exec.lock().unwrap().take()
    }

    pub(crate) fn interrupt(&self, reason: TaskError) {
        *self.interrupted.lock().unwrap() = Some(reason);
        if let Some(thread) = &*self.running_thread.lock().unwrap() {
            thread.unpark();
        }
    }

    pub(crate) fn enter_running(&self) {
        *self.running_thread.lock().unwrap() = Some(thread::current());
    }

    pub(crate) fn exit_running(&self) {
        *self.running_thread.lock().unwrap() = None;
    }
}

/// Execution context handed to a task body.
pub struct TaskContext<'a> {
    core: &'a TaskCore,
}

impl TaskContext<'_> {
    /// Raises and consumes a pending interruption of this task, if any.
    pub fn interrupt_point(&self) -> Result<(), TaskError> {
        match self.core.interrupted.lock().unwrap().take() {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }

    /// The task's name.
    pub fn name(&self) -> &str {
        &self.core.name
    }
}

/// A unit of work with a declared predecessor set.
///
/// Created with a name (from which the [`Id`] derives), the names of its
/// predecessors, and a one-shot body producing the future's value.
pub struct Task<T> {
    core: Arc<TaskCore>,
    future: Mutex<Option<Future<T>>>,
}

impl<T: Send + 'static> Task<T> {
    /// Creates a task named `name` that runs after every task in `deps`.
    pub fn new<F>(name: &str, deps: &[&str], body: F) -> Task<T>
    where
        F: FnOnce(&TaskContext) -> Result<T, TaskError> + Send + 'static,
    {
        let (promise, future) = promise::<T>();
        let exec: ExecFn = Box::new(move |mode| match mode {
            Exec::Run(ctx) => {
                let result = panic::catch_unwind(AssertUnwindSafe(|| body(ctx)))
                    .unwrap_or_else(|payload| Err(TaskError::Failed(panic_message(&payload))));
                let status = result.as_ref().map(|_| ()).map_err(TaskError::clone);
                promise.set(result);
                status
            }
            Exec::Fail(reason) => {
                promise.set(Err(reason.clone()));
                Err(reason)
            }
        });
        Task {
            core: Arc::new(TaskCore {
                name: Arc::from(name),
                id: Id::of(name),
                deps: deps
                    .iter()
                    .map(|dep| (Id::of(dep), Arc::from(*dep)))
                    .collect(),
                state: AtomicU8::new(TaskState::Registered as u8),
                exec: Mutex::new(Some(exec)),
                interrupted: Mutex::new(None),
                running_thread: Mutex::new(None),
            }),
            future: Mutex::new(Some(future)),
        }
    }
}

impl<T> Task<T> {
    /// The task's id.
    pub fn id(&self) -> Id {
        self.core.id
    }

    /// The task's name.
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Current life-cycle state.
    pub fn state(&self) -> TaskState {
        self.core.state()
    }

    /// Takes the future carrying the task's outcome. Yields once.
    pub fn future(&self) -> Option<Future<T>> {
        self.future.lock().unwrap().take()
    }

    /// Delivers `reason` to the task; the body observes it at its next
    /// interrupt point.
    pub fn interrupt(&self, reason: TaskError) {
        self.core.interrupt(reason);
    }

    pub(crate) fn core(&self) -> Arc<TaskCore> {
        self.core.clone()
    }
}

pub(crate) fn run_core(core: &TaskCore) -> Result<(), TaskError> {
    let ctx = TaskContext { core };
    let exec = core.take_exec();
    match exec {
        Some(exec) => exec(Exec::Run(&ctx)),
        // a failure propagation already resolved the future
        None => Err(TaskError::Failed("task body already consumed".into())),
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "task panicked".to_string()
    }
}
