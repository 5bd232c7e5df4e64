//! Tagged free-list arena
//!
//! Entries live in geometrically growing blocks and are addressed by a 32-bit
//! [`Handle`]. Recycling goes through a Treiber stack whose head is a
//! [`Tagged`] word, so an entry returning to the stack between a competing
//! thread's load and CAS is caught by the tag.
//!
//! Entries are default-constructed once, when their block is allocated, and
//! are never dropped on [`free`](FreeList::free). Callers tear down and
//! re-initialize entry payloads themselves; this is what lets a queue node
//! keep its link tag across reuse.

use core::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use crossbeam_utils::Backoff;

use crate::spin::SpinLock;

/// Entries in the first block; block `k` holds `BLOCK_BASE << k` entries.
const BLOCK_BASE: usize = 64;
/// Number of blocks; bounds total capacity below `u32::MAX` entries.
const BLOCK_MAX: usize = 25;

/// Index of an arena entry. `Handle::NONE` plays the role of a null pointer.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Handle(pub(crate) u32);

impl Handle {
    /// The null handle.
    pub const NONE: Handle = Handle(u32::MAX);

    /// Returns true if this is the null handle.
    #[inline]
    pub fn is_none(self) -> bool {
        self == Handle::NONE
    }

    /// Raw index bits, used when packing handles into link words.
    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Reconstructs a handle from raw index bits.
    #[inline]
    pub fn from_bits(bits: u32) -> Handle {
        Handle(bits)
    }
}

/// A `(tag, handle)` pair packed into one CAS-able 64-bit word.
///
/// The tag occupies the high half and is bumped on every successful CAS of
/// the same link, which rules out ABA within a single execution.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Tagged(u64);

impl Tagged {
    /// Packs a handle with a tag.
    #[inline]
    pub fn new(handle: Handle, tag: u32) -> Tagged {
        Tagged(((tag as u64) << 32) | handle.0 as u64)
    }

    /// The handle half.
    #[inline]
    pub fn handle(self) -> Handle {
        Handle(self.0 as u32)
    }

    /// The tag half.
    #[inline]
    pub fn tag(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// The tag a successful CAS on this link must install.
    #[inline]
    pub fn next_tag(self) -> u32 {
        self.tag().wrapping_add(1)
    }
}

/// Atomic cell holding a [`Tagged`] word.
pub struct AtomicTagged(AtomicU64);

impl AtomicTagged {
    /// Creates a cell holding `val`.
    pub fn new(val: Tagged) -> Self {
        Self(AtomicU64::new(val.0))
    }

    /// Loads the current word.
    #[inline]
    pub fn load(&self, order: Ordering) -> Tagged {
        Tagged(self.0.load(order))
    }

    /// Stores a word.
    #[inline]
    pub fn store(&self, val: Tagged, order: Ordering) {
        self.0.store(val.0, order)
    }

    /// Compare-and-sets `old` to `new`. Returns false if another thread won.
    #[inline]
    pub fn cas(&self, new: Tagged, old: Tagged) -> bool {
        self.0
            .compare_exchange(old.0, new.0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for AtomicTagged {
    fn default() -> Self {
        Self::new(Tagged::new(Handle::NONE, 0))
    }
}

struct Entry<T> {
    free_next: AtomicU32,
    value: T,
}

impl<T: Default> Default for Entry<T> {
    fn default() -> Self {
        Self {
            free_next: AtomicU32::new(Handle::NONE.0),
            value: T::default(),
        }
    }
}

/// Lock-free arena allocator with handle recycling.
///
/// Storage only grows; entries are recycled through the free stack and their
/// memory stays mapped until the arena itself is dropped, so a stale reader
/// holding a handle can always dereference it and validate afterwards.
pub struct FreeList<T> {
    blocks: [AtomicPtr<Entry<T>>; BLOCK_MAX],
    /// Entries available across all allocated blocks.
    cap: AtomicUsize,
    /// High-water mark of bump allocation.
    len: AtomicU32,
    /// Treiber stack of recycled entries.
    free: AtomicTagged,
    grow_lock: SpinLock,
}

unsafe impl<T: Send> Send for FreeList<T> {}
unsafe impl<T: Send + Sync> Sync for FreeList<T> {}

impl<T: Default> FreeList<T> {
    /// Creates an arena with at least `capacity` entries pre-allocated.
    pub fn new(capacity: usize) -> Self {
        let list = Self {
            blocks: [const { AtomicPtr::new(core::ptr::null_mut()) }; BLOCK_MAX],
            cap: AtomicUsize::new(0),
            len: AtomicU32::new(0),
            free: AtomicTagged::default(),
            grow_lock: SpinLock::new(),
        };
        list.reserve(capacity);
        list
    }

    /// Ensures storage exists for at least `capacity` entries.
    pub fn reserve(&self, capacity: usize) {
        if self.cap.load(Ordering::Acquire) >= capacity {
            return;
        }
        let _g = self.grow_lock.guard();
        while self.cap.load(Ordering::Relaxed) < capacity {
            self.grow_one();
        }
    }

    /// The number of entries for which storage is allocated.
    pub fn capacity(&self) -> usize {
        self.cap.load(Ordering::Acquire)
    }

    /// Takes an entry out of the arena, recycling a freed one if possible.
    ///
    /// The entry retains whatever state its previous user left behind
    /// (default state on first use); the caller re-initializes the payload.
    pub fn alloc(&self) -> Handle {
        let backoff = Backoff::new();
        loop {
            let head = self.free.load(Ordering::Acquire);
            let idx = head.handle();
            if !idx.is_none() {
                let next = self.entry(idx).free_next.load(Ordering::Relaxed);
                if self
                    .free
                    .cas(Tagged::new(Handle(next), head.next_tag()), head)
                {
                    return idx;
                }
                backoff.spin();
                continue;
            }

            let i = self.len.fetch_add(1, Ordering::Relaxed);
            assert!(
                (i as usize) < BLOCK_BASE * ((1usize << BLOCK_MAX) - 1),
                "free list exhausted"
            );
            if (i as usize) >= self.cap.load(Ordering::Acquire) {
                let _g = self.grow_lock.guard();
                while self.cap.load(Ordering::Relaxed) <= i as usize {
                    self.grow_one();
                }
            }
            return Handle(i);
        }
    }

    /// Returns an entry to the free stack.
    ///
    /// The caller must have torn down the payload first; the entry is not
    /// dropped and will be handed out again by [`alloc`](FreeList::alloc).
    pub fn free(&self, handle: Handle) {
        debug_assert!(!handle.is_none());
        loop {
            let head = self.free.load(Ordering::Acquire);
            self.entry(handle)
                .free_next
                .store(head.handle().0, Ordering::Relaxed);
            if self.free.cas(Tagged::new(handle, head.next_tag()), head) {
                return;
            }
        }
    }

    /// Dereferences a handle.
    #[inline]
    pub fn get(&self, handle: Handle) -> &T {
        &self.entry(handle).value
    }

    fn entry(&self, handle: Handle) -> &Entry<T> {
        let i = handle.0 as usize;
        let q = i / BLOCK_BASE + 1;
        let b = q.ilog2() as usize;
        let offset = i - BLOCK_BASE * ((1 << b) - 1);
        let block = self.blocks[b].load(Ordering::Acquire);
        debug_assert!(!block.is_null(), "handle beyond allocated storage");
        unsafe { &*block.add(offset) }
    }

    /// Allocates the next geometric block. Caller holds `grow_lock`.
    fn grow_one(&self) {
        let b = self
            .blocks
            .iter()
            .position(|p| p.load(Ordering::Relaxed).is_null())
            .expect("free list exhausted");
        let size = BLOCK_BASE << b;
        let block: Box<[Entry<T>]> = (0..size).map(|_| Entry::default()).collect();
        let ptr = Box::into_raw(block) as *mut Entry<T>;
        self.blocks[b].store(ptr, Ordering::Release);
        self.cap.fetch_add(size, Ordering::Release);
    }
}

impl<T> Drop for FreeList<T> {
    fn drop(&mut self) {
        for (b, slot) in self.blocks.iter_mut().enumerate() {
            let ptr = *slot.get_mut();
            if ptr.is_null() {
                continue;
            }
            let size = BLOCK_BASE << b;
            unsafe {
                drop(Box::from_raw(core::ptr::slice_from_raw_parts_mut(
                    ptr, size,
                )));
            }
        }
    }
}
