//! Dependency-graph task scheduling and application lifecycle for Petek.
//!
//! ## Features
//!
//! - [`DepSched`]: DAG scheduler running [`Task`]s over a worker pool in
//!   dependency order, with failure propagation to descendants.
//! - [`Future`] / [`Promise`]: One-shot futures with [`wait_any`] over a
//!   set and cooperative interruption.
//! - [`App`]: Application driver that registers [`Module`]s, enqueues the
//!   `root` module, and coordinates graceful termination.
//!
//! ## Usage
//!
//! ```rust
//! use petek_sched::{DepSched, Task};
//!
//! let sched = DepSched::new(2);
//! let a = Task::new("a", &[], |_| Ok(1));
//! let b = Task::new("b", &["a"], |_| Ok(2));
//! sched.reg(&a).unwrap();
//! sched.reg(&b).unwrap();
//! let fut = b.future().unwrap();
//! sched.enqueue(&b).unwrap();
//! assert_eq!(fut.get(), Ok(2));
//! ```

#![warn(missing_docs)]

mod app;
mod error;
mod future;
mod id;
pub mod interrupt;
mod module;
mod pool;
mod sched;
mod signal;
mod task;

pub use app::App;
pub use error::{SchedError, TaskError};
pub use future::{promise, wait_any, Future, Promise};
pub use id::Id;
pub use module::{Module, ModuleRegistry};
pub use sched::DepSched;
pub use task::{Task, TaskContext, TaskState};
