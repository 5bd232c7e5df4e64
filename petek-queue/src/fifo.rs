//! Lock-free FIFO queue
//!
//! The Michael–Scott algorithm ("Simple, Fast, and Practical Non-Blocking
//! and Blocking Concurrent Queue Algorithms", 1996) over Petek's tagged
//! free-list arena. Memory is recycled immediately through the arena; the
//! per-link tags make recycled handles safe against ABA.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicIsize, Ordering};

use crossbeam_utils::{Backoff, CachePadded};
use petek::{AtomicTagged, FreeList, Handle, Tagged};

struct Node<T> {
    /// Tagged link to the successor. The tag survives node recycling, which
    /// is what defeats ABA on a freshly reused handle.
    next: AtomicTagged,
    /// Whether `val` currently holds a live value. Consulted only at arena
    /// teardown; the winning popper moves the value out and clears it.
    present: AtomicBool,
    val: UnsafeCell<MaybeUninit<T>>,
}

unsafe impl<T: Send> Send for Node<T> {}
unsafe impl<T: Send> Sync for Node<T> {}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Self {
            next: AtomicTagged::default(),
            present: AtomicBool::new(false),
            val: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

impl<T> Drop for Node<T> {
    fn drop(&mut self) {
        if *self.present.get_mut() {
            unsafe { self.val.get_mut().assume_init_drop() };
        }
    }
}

/// Lock-free multi-producer multi-consumer FIFO queue.
///
/// `head` always points at a sentinel; the oldest value lives in the
/// sentinel's successor. `tail` may lag one link behind the true last node
/// and is swung forward by whichever thread observes the lag.
pub struct Queue<T> {
    free_list: FreeList<Node<T>>,
    head: CachePadded<AtomicTagged>,
    tail: CachePadded<AtomicTagged>,
    size: AtomicIsize,
}

unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send> Sync for Queue<T> {}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T> {
    /// Creates an empty queue.
    pub fn new() -> Queue<T> {
        Self::with_capacity(0)
    }

    /// Creates an empty queue with storage for `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Queue<T> {
        let free_list = FreeList::new(capacity);
        let sentinel = Self::construct(&free_list, None);
        Queue {
            free_list,
            head: CachePadded::new(AtomicTagged::new(Tagged::new(sentinel, 0))),
            tail: CachePadded::new(AtomicTagged::new(Tagged::new(sentinel, 0))),
            size: AtomicIsize::new(0),
        }
    }

    /// Ensures storage is allocated for at least `capacity` elements.
    pub fn reserve(&self, capacity: usize) {
        self.free_list.reserve(capacity);
    }

    /// The number of elements for which storage is allocated.
    pub fn capacity(&self) -> usize {
        self.free_list.capacity()
    }

    /// Adds `val` onto the end of the queue.
    pub fn push(&self, val: T) {
        let node = Self::construct(&self.free_list, Some(val));
        let backoff = Backoff::new();
        let mut tail;
        loop {
            tail = self.tail.load(Ordering::Acquire);
            let next = self.node(tail.handle()).next.load(Ordering::Acquire);
            // ensure that tail and next are consistent
            if tail != self.tail.load(Ordering::Acquire) {
                continue;
            }
            // tail isn't at the last element, try to move it forward
            if !next.handle().is_none() {
                self.tail
                    .cas(Tagged::new(next.handle(), tail.next_tag()), tail);
                continue;
            }
            // try to link the element onto the end of the chain
            if self
                .node(tail.handle())
                .next
                .cas(Tagged::new(node, next.next_tag()), next)
            {
                break;
            }
            backoff.snooze();
        }
        // best effort: relocate tail to the inserted element
        self.tail.cas(Tagged::new(node, tail.next_tag()), tail);
        self.size.fetch_add(1, Ordering::Release);
    }

    /// Removes the oldest element. Returns `None` if the queue is empty.
    pub fn pop(&self) -> Option<T> {
        let backoff = Backoff::new();
        let (head, value) = loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);
            let next = self.node(head.handle()).next.load(Ordering::Acquire);
            // ensure that head, tail and next are consistent
            if head != self.head.load(Ordering::Acquire) {
                continue;
            }
            if head.handle() == tail.handle() {
                if next.handle().is_none() {
                    return None;
                }
                // tail lags behind, move it forward
                self.tail
                    .cas(Tagged::new(next.handle(), tail.next_tag()), tail);
                continue;
            }
            // the chain may have been emptied and relinked since tail was read
            if next.handle().is_none() {
                continue;
            }
            // read the value before the cas; a competing pop can recycle the
            // node right after. The copy is discarded without drop glue when
            // the cas fails.
            let node = self.node(next.handle());
            let snapshot = unsafe { ptr::read(node.val.get()) };
            if self.head.cas(Tagged::new(next.handle(), head.next_tag()), head) {
                node.present.store(false, Ordering::Release);
                break (head, unsafe { snapshot.assume_init() });
            }
            backoff.snooze();
        };
        self.size.fetch_sub(1, Ordering::Release);
        // the old sentinel is ours alone now
        self.free_list.free(head.handle());
        Some(value)
    }

    /// Removes all elements.
    pub fn clear(&self) {
        while self.pop().is_some() {}
    }

    /// Whether the queue contains no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of elements in the queue. Transiently underestimates under
    /// concurrent pushes and pops.
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire).max(0) as usize
    }

    #[inline]
    fn node(&self, handle: Handle) -> &Node<T> {
        self.free_list.get(handle)
    }

    /// Takes an arena entry and re-initializes it, advancing the entry's link
    /// tag so a recycled handle cannot satisfy a stale CAS.
    fn construct(free_list: &FreeList<Node<T>>, val: Option<T>) -> Handle {
        let handle = free_list.alloc();
        let node = free_list.get(handle);
        let old = node.next.load(Ordering::Relaxed);
        node.next
            .store(Tagged::new(Handle::NONE, old.next_tag()), Ordering::Relaxed);
        if let Some(val) = val {
            unsafe { (*node.val.get()).write(val) };
            node.present.store(true, Ordering::Release);
        }
        handle
    }
}

impl<T: Clone> Queue<T> {
    /// Copies out the element that the next `pop` would return. Returns
    /// `None` if the queue is empty.
    pub fn front(&self) -> Option<T> {
        loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);
            let next = self.node(head.handle()).next.load(Ordering::Acquire);
            if head != self.head.load(Ordering::Acquire) {
                continue;
            }
            if head.handle() == tail.handle() && next.handle().is_none() {
                return None;
            }
            if next.handle().is_none() {
                continue;
            }
            // snapshot, then make sure head did not move under us; otherwise
            // the bytes may belong to a recycled node
            let snapshot = unsafe { ptr::read(self.node(next.handle()).val.get()) };
            if head == self.head.load(Ordering::Acquire) {
                return Some(unsafe { (*snapshot.as_ptr()).clone() });
            }
        }
    }

    /// Copies out the youngest element. Returns `None` if the queue is empty.
    pub fn back(&self) -> Option<T> {
        loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);
            let next = self.node(tail.handle()).next.load(Ordering::Acquire);
            if tail != self.tail.load(Ordering::Acquire) {
                continue;
            }
            if !next.handle().is_none() {
                self.tail
                    .cas(Tagged::new(next.handle(), tail.next_tag()), tail);
                continue;
            }
            if head.handle() == tail.handle() {
                return None;
            }
            let snapshot = unsafe { ptr::read(self.node(tail.handle()).val.get()) };
            if head == self.head.load(Ordering::Acquire)
                && tail == self.tail.load(Ordering::Acquire)
            {
                return Some(unsafe { (*snapshot.as_ptr()).clone() });
            }
        }
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        self.clear();
        // the remaining sentinel goes back to the arena; block teardown
        // drops any value still marked present
        self.free_list.free(self.head.load(Ordering::Relaxed).handle());
    }
}
