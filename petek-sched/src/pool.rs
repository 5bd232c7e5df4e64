//! Worker pool
//!
//! Fixed worker threads draining a lock-free FIFO of jobs. Idle workers
//! park briefly and are unparked on submission; shutdown drains nothing,
//! it only stops workers once the queue runs dry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use petek_queue::Queue;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolShared {
    queue: Queue<Job>,
    shutdown: AtomicBool,
    sleepers: Mutex<Vec<Thread>>,
}

/// Cloneable submission side of the pool.
#[derive(Clone)]
pub(crate) struct PoolHandle {
    shared: Arc<PoolShared>,
}

impl PoolHandle {
    pub(crate) fn submit(&self, job: Job) {
        self.shared.queue.push(job);
        for sleeper in self.shared.sleepers.lock().unwrap().iter() {
            sleeper.unpark();
        }
    }
}

pub(crate) struct WorkerPool {
    handle: PoolHandle,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn new(workers: usize) -> WorkerPool {
        let shared = Arc::new(PoolShared {
            queue: Queue::new(),
            shutdown: AtomicBool::new(false),
            sleepers: Mutex::new(Vec::with_capacity(workers)),
        });
        let workers = (0..workers)
            .map(|_| {
                let shared = shared.clone();
                thread::spawn(move || {
                    shared
                        .sleepers
                        .lock()
                        .unwrap()
                        .push(thread::current());
                    loop {
                        if let Some(job) = shared.queue.pop() {
                            job();
                            continue;
                        }
                        if shared.shutdown.load(Ordering::Acquire) {
                            break;
                        }
                        thread::park_timeout(Duration::from_millis(1));
                    }
                })
            })
            .collect();
        WorkerPool {
            handle: PoolHandle { shared },
            workers,
        }
    }

    pub(crate) fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.handle.shared.shutdown.store(true, Ordering::Release);
        for sleeper in self.handle.shared.sleepers.lock().unwrap().iter() {
            sleeper.unpark();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
