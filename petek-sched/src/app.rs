//! Application driver
//!
//! Registers every module's task with a scheduler, enqueues the `root`
//! module, and drains module futures on the calling thread. Interrupting
//! the driver flips it into terminate mode: remaining modules are
//! interrupted with [`TaskError::Terminated`] on every poll until all of
//! them have wound down.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crate::error::TaskError;
use crate::future::wait_any;
use crate::interrupt::{self, ThreadHandle};
use crate::module::{Module, ModuleRegistry};
use crate::sched::DepSched;

const MODE_TERM: u8 = 0;
const MODE_RUN: u8 = 1;

/// Application driver owning a module registry.
pub struct App {
    registry: ModuleRegistry,
    interrupt_freq: u32,
    workers: usize,
    thread: Mutex<Option<ThreadHandle>>,
    run_mode: AtomicU8,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    /// Creates a driver with no modules.
    pub fn new() -> App {
        App {
            registry: ModuleRegistry::new(),
            interrupt_freq: 30,
            workers: thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            thread: Mutex::new(None),
            run_mode: AtomicU8::new(MODE_TERM),
        }
    }

    /// How often per second remaining modules are re-interrupted while
    /// terminating.
    pub fn set_interrupt_freq(&mut self, freq: u32) {
        self.interrupt_freq = freq.max(1);
    }

    /// Number of scheduler worker threads.
    pub fn set_workers(&mut self, workers: usize) {
        self.workers = workers.max(1);
    }

    /// Adds a module to the registry.
    pub fn register(&mut self, module: Module) {
        self.registry.register(module);
    }

    /// Runs the application to completion on the calling thread.
    pub fn entry(&self) {
        {
            let mut thread = self.thread.lock().unwrap();
            *thread = Some(interrupt::current());
        }
        self.run_mode.store(MODE_RUN, Ordering::Release);
        self.run();
        {
            let mut thread = self.thread.lock().unwrap();
            *thread = None;
        }
    }

    /// Interrupts the driver thread. No-op when the application is not
    /// running.
    pub fn interrupt(&self, reason: TaskError) {
        let thread = self.thread.lock().unwrap();
        if let Some(handle) = &*thread {
            handle.interrupt(reason);
        }
    }

    fn run(&self) {
        let sched = DepSched::new(self.workers);
        for module in self.registry.iter() {
            if let Err(err) = sched.reg(module.task()) {
                tracing::error!("{}", err);
                return;
            }
        }
        let Some(root) = self.registry.get("root") else {
            tracing::error!("no root module registered");
            return;
        };
        if let Err(err) = sched.enqueue(root.task()) {
            tracing::error!("{}", err);
            return;
        }

        let mut pending: Vec<&Module> = self.registry.iter().collect();
        let mut futures: Vec<_> = pending
            .iter()
            .map(|m| m.task().future().expect("module future already taken"))
            .collect();

        while !pending.is_empty() {
            if interrupt::interrupt_point().is_err()
                && self.run_mode.swap(MODE_TERM, Ordering::AcqRel) == MODE_RUN
            {
                tracing::info!("terminating...");
            }

            let timeout = match self.run_mode.load(Ordering::Acquire) {
                MODE_RUN => None,
                _ => Some(Duration::from_millis(1000) / self.interrupt_freq),
            };
            if let Some(index) = wait_any(&futures, timeout) {
                let future = futures.remove(index);
                let module = pending.remove(index);
                match future.get() {
                    Ok(()) => {}
                    Err(TaskError::Terminated) => {}
                    Err(err) => tracing::error!(module = module.name(), "{}", err),
                }
            }

            if self.run_mode.load(Ordering::Acquire) == MODE_TERM {
                for module in &pending {
                    module.task().interrupt(TaskError::Terminated);
                }
            }
        }
    }
}
