//! Single-producer single-consumer ring deque
//!
//! Lock-free in the steady state of one producer and one consumer on
//! opposite ends: each end owns its own spin lock, so the two never contend.
//! The ends do race for the same cell when the deque is empty or one slot
//! shy of full, and storage changes need exclusive access; those paths take
//! both locks, head first.
//!
//! Storage is a ring buffer that grows by half plus one when full.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ptr;
use core::sync::atomic::{AtomicUsize, Ordering};

use petek::SpinLock;

struct Inner<T> {
    buf: Box<[UnsafeCell<MaybeUninit<T>>]>,
    head: usize,
    tail: usize,
}

/// Growable ring deque, optimal for one producer and one consumer.
pub struct SpscDeque<T> {
    inner: UnsafeCell<Inner<T>>,
    capacity: AtomicUsize,
    size: AtomicUsize,
    head_lock: SpinLock,
    tail_lock: SpinLock,
}

unsafe impl<T: Send> Send for SpscDeque<T> {}
unsafe impl<T: Send> Sync for SpscDeque<T> {}

impl<T> Default for SpscDeque<T> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<T> SpscDeque<T> {
    /// Creates a deque with storage for `capacity` elements.
    pub fn new(capacity: usize) -> Self {
        let deque = Self {
            inner: UnsafeCell::new(Inner {
                buf: Box::new([]),
                head: 0,
                tail: 0,
            }),
            capacity: AtomicUsize::new(0),
            size: AtomicUsize::new(0),
            head_lock: SpinLock::new(),
            tail_lock: SpinLock::new(),
        };
        deque.reserve(capacity);
        deque
    }

    /// Ensures storage is allocated for at least `capacity` elements.
    pub fn reserve(&self, capacity: usize) {
        self.head_lock.lock();
        self.tail_lock.lock();
        if self.capacity.load(Ordering::Relaxed) < capacity {
            unsafe { self.set_capacity(capacity) };
        }
        self.tail_lock.unlock();
        self.head_lock.unlock();
    }

    /// The number of elements for which storage is allocated.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Inserts `val` at the front.
    pub fn push_front(&self, val: T) {
        // At size 0, head and tail vie for the same first slot; one below
        // capacity, for the same last slot; at capacity, storage must grow.
        self.head_lock.lock();
        let size = self.size.load(Ordering::Acquire);
        let both = size == 0 || size + 1 >= self.capacity.load(Ordering::Relaxed);
        if both {
            self.tail_lock.lock();
        }
        unsafe {
            if self.size.load(Ordering::Relaxed) == self.capacity.load(Ordering::Relaxed) {
                self.expand();
            }
            let inner = self.inner.get();
            let cap = self.capacity.load(Ordering::Relaxed);
            (*inner).head = Self::ring_dec((*inner).head, cap);
            (*(*inner).buf[(*inner).head].get()).write(val);
        }
        self.size.fetch_add(1, Ordering::Release);
        if both {
            self.tail_lock.unlock();
        }
        self.head_lock.unlock();
    }

    /// Adds `val` onto the end.
    pub fn push_back(&self, val: T) {
        self.tail_lock.lock();
        let size = self.size.load(Ordering::Acquire);
        let both = size == 0 || size + 1 >= self.capacity.load(Ordering::Relaxed);
        if both {
            // head goes first to prevent deadlock against the front end
            self.tail_lock.unlock();
            self.head_lock.lock();
            self.tail_lock.lock();
        }
        unsafe {
            if self.size.load(Ordering::Relaxed) == self.capacity.load(Ordering::Relaxed) {
                self.expand();
            }
            let inner = self.inner.get();
            let cap = self.capacity.load(Ordering::Relaxed);
            (*(*inner).buf[(*inner).tail].get()).write(val);
            (*inner).tail = Self::ring_inc((*inner).tail, cap);
        }
        self.size.fetch_add(1, Ordering::Release);
        if both {
            self.head_lock.unlock();
        }
        self.tail_lock.unlock();
    }

    /// Removes the front element. Returns `None` when empty.
    pub fn pop_front(&self) -> Option<T> {
        // At size 1, head and tail vie to pop the last slot
        self.head_lock.lock();
        let both = self.size.load(Ordering::Acquire) == 1;
        if both {
            self.tail_lock.lock();
        }
        let val = if self.size.load(Ordering::Relaxed) == 0 {
            None
        } else {
            unsafe {
                let inner = self.inner.get();
                let cap = self.capacity.load(Ordering::Relaxed);
                let val = ptr::read((*(*inner).buf[(*inner).head].get()).as_ptr());
                (*inner).head = Self::ring_inc((*inner).head, cap);
                self.size.fetch_sub(1, Ordering::Release);
                Some(val)
            }
        };
        if both {
            self.tail_lock.unlock();
        }
        self.head_lock.unlock();
        val
    }

    /// Removes the back element. Returns `None` when empty.
    pub fn pop_back(&self) -> Option<T> {
        self.tail_lock.lock();
        let both = self.size.load(Ordering::Acquire) == 1;
        if both {
            self.tail_lock.unlock();
            self.head_lock.lock();
            self.tail_lock.lock();
        }
        let val = if self.size.load(Ordering::Relaxed) == 0 {
            None
        } else {
            unsafe {
                let inner = self.inner.get();
                let cap = self.capacity.load(Ordering::Relaxed);
                (*inner).tail = Self::ring_dec((*inner).tail, cap);
                let val = ptr::read((*(*inner).buf[(*inner).tail].get()).as_ptr());
                self.size.fetch_sub(1, Ordering::Release);
                Some(val)
            }
        };
        if both {
            self.head_lock.unlock();
        }
        self.tail_lock.unlock();
        val
    }

    /// Removes all elements.
    pub fn clear(&self) {
        while self.pop_back().is_some() {}
    }

    /// Whether the deque contains no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of elements in the deque.
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    #[inline]
    fn ring_inc(index: usize, cap: usize) -> usize {
        if index + 1 >= cap {
            0
        } else {
            index + 1
        }
    }

    #[inline]
    fn ring_dec(index: usize, cap: usize) -> usize {
        if index == 0 {
            cap - 1
        } else {
            index - 1
        }
    }

    /// Replaces the ring with one of capacity `n`, keeping the elements that
    /// fit (the new head is at 0) and dropping the rest. Caller holds both
    /// locks.
    unsafe fn set_capacity(&self, n: usize) {
        let inner = self.inner.get();
        let old_cap = self.capacity.load(Ordering::Relaxed);
        if n == old_cap {
            return;
        }
        let old_size = self.size.load(Ordering::Relaxed);
        let size = old_size.min(n);

        let buf: Box<[UnsafeCell<MaybeUninit<T>>]> =
            (0..n).map(|_| UnsafeCell::new(MaybeUninit::uninit())).collect();
        if size > 0 {
            let head = (*inner).head;
            let src = (*inner).buf.as_ptr();
            let dst = buf.as_ptr() as *mut UnsafeCell<MaybeUninit<T>>;
            let copy_tail = (head + size) % old_cap;
            if copy_tail > head {
                // contiguous region
                ptr::copy_nonoverlapping(src.add(head), dst, size);
            } else {
                // split region, loops around the end
                ptr::copy_nonoverlapping(src.add(head), dst, old_cap - head);
                ptr::copy_nonoverlapping(src, dst.add(old_cap - head), copy_tail);
            }
        }
        // elements that don't fit into the new ring
        for i in size..old_size {
            let idx = ((*inner).head + i) % old_cap;
            ptr::drop_in_place((*(*inner).buf[idx].get()).as_mut_ptr());
        }

        (*inner).buf = buf;
        self.capacity.store(n, Ordering::Release);
        self.size.store(size, Ordering::Release);
        (*inner).head = 0;
        (*inner).tail = if n == 0 { 0 } else { size % n };
    }

    /// Grows by half plus one. Caller holds both locks.
    unsafe fn expand(&self) {
        let cap = self.capacity.load(Ordering::Relaxed);
        self.set_capacity(cap + cap / 2 + 1);
    }
}

impl<T: Clone> SpscDeque<T> {
    /// Resizes to exactly `n` elements: the first `min(n, len)` existing
    /// elements are preserved and `init` clones fill the remainder.
    pub fn resize(&self, n: usize, init: T) {
        self.head_lock.lock();
        self.tail_lock.lock();
        unsafe {
            self.set_capacity(n);
            let inner = self.inner.get();
            let size = self.size.load(Ordering::Relaxed);
            let cap = self.capacity.load(Ordering::Relaxed);
            let head = (*inner).head;
            for i in size..n {
                let idx = (head + i) % cap;
                (*(*inner).buf[idx].get()).write(init.clone());
            }
            (*inner).tail = if cap == 0 { 0 } else { (head + n) % cap };
            self.size.store(n, Ordering::Release);
        }
        self.tail_lock.unlock();
        self.head_lock.unlock();
    }
}

impl<T> Drop for SpscDeque<T> {
    fn drop(&mut self) {
        self.clear();
    }
}
