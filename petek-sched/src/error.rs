use std::fmt;

/// Typed errors for graph registration and enqueueing.
#[derive(Debug, Clone)]
pub enum SchedError {
    /// A different task with the same id is already registered
    DuplicateTask { task: String },
    /// The task is not registered
    UnknownTask { task: String },
    /// A predecessor is not registered at enqueue time
    UnknownDependency { task: String, dep: String },
    /// Registering the task would close a dependency cycle
    Cycle { task: String },
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::DuplicateTask { task } => {
                write!(f, "Task '{}' is already registered", task)
            }
            SchedError::UnknownTask { task } => {
                write!(f, "Task '{}' is not registered", task)
            }
            SchedError::UnknownDependency { task, dep } => {
                write!(
                    f,
                    "Task '{}' depends on unregistered task '{}'",
                    task, dep
                )
            }
            SchedError::Cycle { task } => {
                write!(f, "Task '{}' closes a dependency cycle", task)
            }
        }
    }
}

impl std::error::Error for SchedError {}

/// Outcome carried by a task's future when it does not complete normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Cooperative cancellation; not a fault
    Terminated,
    /// The task body failed or panicked
    Failed(String),
    /// A predecessor failed, so the task was never started
    DependencyFailed { dep: String },
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Terminated => write!(f, "Terminated"),
            TaskError::Failed(msg) => write!(f, "Task failed: {}", msg),
            TaskError::DependencyFailed { dep } => {
                write!(f, "Dependency '{}' failed", dep)
            }
        }
    }
}

impl std::error::Error for TaskError {}
