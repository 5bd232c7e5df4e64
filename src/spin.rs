//! Test-and-set spin lock with RAII and manual acquisition

use core::sync::atomic::{AtomicBool, Ordering};
use crossbeam_utils::Backoff;

/// A non-reentrant spin lock.
///
/// Intended for short critical sections only. Callers that need to interleave
/// two locks in a specific order can use the manual [`lock`](SpinLock::lock) /
/// [`unlock`](SpinLock::unlock) pair; everyone else should prefer
/// [`guard`](SpinLock::guard).
pub struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    /// Creates an unlocked spin lock.
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Acquires the lock, spinning with exponential backoff until available.
    pub fn lock(&self) {
        let backoff = Backoff::new();
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                backoff.snooze();
            }
        }
    }

    /// Attempts to acquire the lock without spinning.
    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Releases the lock.
    ///
    /// Must only be called by the holder of a successful [`lock`](SpinLock::lock)
    /// or [`try_lock`](SpinLock::try_lock).
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Acquires the lock and returns a guard that releases it on drop.
    pub fn guard(&self) -> SpinGuard<'_> {
        self.lock();
        SpinGuard { lock: self }
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by [`SpinLock::guard`].
pub struct SpinGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_guard_releases() {
        let lock = SpinLock::new();
        {
            let _g = lock.guard();
            assert!(!lock.try_lock());
        }
        assert!(lock.try_lock());
        lock.unlock();
    }

    #[test]
    fn test_mutual_exclusion() {
        let lock = Arc::new(SpinLock::new());
        let counter = Arc::new(std::cell::UnsafeCell::new(0u64));

        struct Shared(Arc<SpinLock>, Arc<std::cell::UnsafeCell<u64>>);
        unsafe impl Send for Shared {}

        let mut handles = vec![];
        for _ in 0..4 {
            let shared = Shared(lock.clone(), counter.clone());
            handles.push(thread::spawn(move || {
                let shared = shared;
                for _ in 0..10000 {
                    let _g = shared.0.guard();
                    unsafe { *shared.1.get() += 1 };
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(unsafe { *counter.get() }, 40000);
    }
}
