//! Hazard-pointer memory manager
//!
//! Implements reference-counted hazard-pointer reclamation for pointer-linked
//! lock-free structures, after Gidenstam et al.'s "Efficient and Reliable
//! Lock-Free Memory Reclamation Based on Reference Counting" (2005).
//!
//! Nodes live in a [`FreeList`] arena and are addressed by [`Handle`]s, so a
//! reader may dereference a stale handle and validate afterwards; the arena
//! never unmaps recycled entries. A node is handed back to the arena only
//! once its global reference count is zero, its trace flag has been affirmed,
//! and no thread's hazard array contains it.

use core::cell::{Cell, RefCell, UnsafeCell};
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::collections::{HashMap, HashSet};

use crate::free_list::{FreeList, Handle};
use crate::link::{AtomicLink, Link};

/// Reclamation bookkeeping embedded in every managed node.
pub struct NodeHeader {
    /// Reference count over all threads' links.
    refc: AtomicI32,
    /// Affirmed by `scan` while the count is observed zero.
    trace: AtomicBool,
    /// Set once the node is logically deleted.
    del: AtomicBool,
}

impl NodeHeader {
    fn reset(&self) {
        self.refc.store(0, Ordering::SeqCst);
        self.trace.store(false, Ordering::SeqCst);
        self.del.store(false, Ordering::SeqCst);
    }

    /// Whether the node has been logically deleted.
    pub fn is_deleted(&self) -> bool {
        self.del.load(Ordering::SeqCst)
    }
}

impl Default for NodeHeader {
    fn default() -> Self {
        Self {
            refc: AtomicI32::new(0),
            trace: AtomicBool::new(false),
            del: AtomicBool::new(false),
        }
    }
}

/// Implemented by node types managed by [`HazardMem`].
pub trait MemNode: Default {
    /// The embedded reclamation header.
    fn header(&self) -> &NodeHeader;
}

/// Structure-specific policy for [`HazardMem`].
///
/// The structure built on the manager supplies the node type, the link
/// budget, and the two link-rewriting hooks reclamation needs.
pub trait MemConfig: Sized {
    /// Managed node type.
    type Node: MemNode + Send + Sync;

    /// Links per node.
    const LINK_MAX: usize;
    /// Links per node that may transiently point to a deleted node.
    const LINK_DEL_MAX: usize;

    /// Rewrite every link in `node` so it skips deleted successors.
    fn clean_up_node(&self, mem: &HazardMem<Self>, node: Handle);

    /// Clear all links out of `node`. When `concurrent` is false the caller
    /// has exclusive access and plain stores may be used.
    fn terminate_node(&self, mem: &HazardMem<Self>, node: Handle, concurrent: bool);
}

const NONE_IDX: u32 = u32::MAX;

/// Owner-side record of one thread-local hazard slot.
#[derive(Copy, Clone)]
struct HazardRef {
    node: Handle,
    count: u32,
}

struct DelRecord {
    node: AtomicU32,
    /// Peers currently cleaning this record's node; serializes finalization.
    claim: AtomicU32,
    done: AtomicBool,
    /// Intrusive list link, owner thread only.
    next: Cell<u32>,
}

struct ThreadData {
    /// Published hazard slots, read by every scanning thread.
    hazards: Box<[AtomicU32]>,
    /// Slot bookkeeping, owner thread only.
    hazard_refs: UnsafeCell<Box<[HazardRef]>>,
    del_records: Box<[DelRecord]>,
    del_head: Cell<u32>,
    del_count: Cell<usize>,
    del_free: UnsafeCell<Vec<u32>>,
    /// Scratch set for `scan`, owner thread only.
    del_hazards: UnsafeCell<HashSet<u32, foldhash::fast::RandomState>>,
}

// Cells are only touched by the thread that claimed this block; peers read
// the atomic fields alone.
unsafe impl Sync for ThreadData {}

impl ThreadData {
    fn new(hazard_max: usize, thresh_clean: usize) -> Self {
        Self {
            hazards: (0..hazard_max).map(|_| AtomicU32::new(NONE_IDX)).collect(),
            hazard_refs: UnsafeCell::new(
                (0..hazard_max)
                    .map(|_| HazardRef {
                        node: Handle::NONE,
                        count: 0,
                    })
                    .collect(),
            ),
            del_records: (0..thresh_clean)
                .map(|_| DelRecord {
                    node: AtomicU32::new(NONE_IDX),
                    claim: AtomicU32::new(0),
                    done: AtomicBool::new(false),
                    next: Cell::new(NONE_IDX),
                })
                .collect(),
            del_head: Cell::new(NONE_IDX),
            del_count: Cell::new(0),
            del_free: UnsafeCell::new((0..thresh_clean as u32).collect()),
            del_hazards: UnsafeCell::new(HashSet::default()),
        }
    }
}

static NEXT_MEM_ID: AtomicU64 = AtomicU64::new(0);

std::thread_local! {
    /// Maps manager instance id to this thread's claimed data block.
    static TD_CACHE: RefCell<HashMap<u64, usize, foldhash::fast::RandomState>> =
        RefCell::new(HashMap::default());
}

/// Lock-free memory manager for concurrent pointer-linked structures.
pub struct HazardMem<C: MemConfig> {
    id: u64,
    config: C,
    thread_max: usize,
    hazard_max: usize,
    thresh_clean: usize,
    thresh_scan: usize,
    threads: Box<[ThreadData]>,
    thread_count: AtomicUsize,
    free_list: FreeList<C::Node>,
}

unsafe impl<C: MemConfig + Send> Send for HazardMem<C> {}
unsafe impl<C: MemConfig + Sync> Sync for HazardMem<C> {}

impl<C: MemConfig> HazardMem<C> {
    /// Creates a manager admitting up to `thread_max` threads, each with
    /// `hazard_max` hazard slots.
    pub fn new(config: C, thread_max: usize, hazard_max: usize) -> Self {
        let thresh_clean = thread_max * (hazard_max + C::LINK_MAX + C::LINK_DEL_MAX + 1);
        let thresh_scan = (hazard_max * 2).min(thresh_clean);
        Self {
            id: NEXT_MEM_ID.fetch_add(1, Ordering::Relaxed),
            config,
            thread_max,
            hazard_max,
            thresh_clean,
            thresh_scan,
            threads: (0..thread_max)
                .map(|_| ThreadData::new(hazard_max, thresh_clean))
                .collect(),
            thread_count: AtomicUsize::new(0),
            free_list: FreeList::new(0),
        }
    }

    /// Dereferences a node handle. The arena keeps entries mapped, so this is
    /// valid even for handles whose node has been recycled; callers validate
    /// through links or hazard slots.
    #[inline]
    pub fn node(&self, handle: Handle) -> &C::Node {
        self.free_list.get(handle)
    }

    /// Hazard slots available to each thread.
    pub fn hazard_max(&self) -> usize {
        self.hazard_max
    }

    fn thread_data(&self) -> &ThreadData {
        let idx = TD_CACHE.with(|cache| {
            *cache.borrow_mut().entry(self.id).or_insert_with(|| {
                let i = self.thread_count.fetch_add(1, Ordering::AcqRel);
                assert!(
                    i < self.thread_max,
                    "too many threads accessing memory manager"
                );
                i
            })
        });
        &self.threads[idx]
    }

    /// Allocates a node with a fresh header and a hazard reference held by
    /// the calling thread.
    pub fn create_node(&self) -> Handle {
        let handle = self.free_list.alloc();
        self.node(handle).header().reset();
        self.ref_node(handle);
        handle
    }

    /// Logically deletes a node, deferring reclamation until no thread can
    /// still reach it.
    pub fn delete_node(&self, handle: Handle) {
        let td = self.thread_data();
        let header = self.node(handle).header();
        header.del.store(true, Ordering::SeqCst);
        header.trace.store(false, Ordering::SeqCst);

        let rec_idx = {
            let free = unsafe { &mut *td.del_free.get() };
            free.pop().expect("not enough delete records")
        };
        let rec = &td.del_records[rec_idx as usize];
        rec.done.store(false, Ordering::SeqCst);
        rec.node.store(handle.bits(), Ordering::SeqCst);
        rec.next.set(td.del_head.get());
        td.del_head.set(rec_idx);
        td.del_count.set(td.del_count.get() + 1);

        loop {
            if td.del_count.get() == self.thresh_clean {
                self.clean_up_local(td);
            }
            if td.del_count.get() >= self.thresh_scan {
                self.scan(td);
            }
            if td.del_count.get() == self.thresh_clean {
                self.clean_up_all();
            } else {
                break;
            }
        }
    }

    /// Dereferences a link under hazard protection. Returns `Handle::NONE`
    /// for a null link.
    pub fn de_ref_link(&self, link: &AtomicLink) -> Handle {
        let td = self.thread_data();
        let refs = unsafe { &mut *td.hazard_refs.get() };
        let index = refs
            .iter()
            .position(|r| r.node.is_none())
            .expect("not enough hazard pointers");

        let node = loop {
            let node = link.load(Ordering::SeqCst).ptr();
            td.hazards[index].store(node.bits(), Ordering::SeqCst);
            // The slot must be visible before the link is re-validated
            if link.load(Ordering::SeqCst).ptr() == node {
                break node;
            }
        };

        if node.is_none() {
            td.hazards[index].store(NONE_IDX, Ordering::SeqCst);
            return Handle::NONE;
        }
        // An existing slot for the same node already protects it
        if let Some(existing) = refs.iter_mut().find(|r| r.node == node) {
            existing.count += 1;
            td.hazards[index].store(NONE_IDX, Ordering::SeqCst);
        } else {
            refs[index] = HazardRef { node, count: 1 };
        }
        node
    }

    /// Takes an additional reference to a node this thread can already
    /// safely reach (a freshly created node or a referenced cursor).
    pub fn ref_node(&self, handle: Handle) {
        let td = self.thread_data();
        let refs = unsafe { &mut *td.hazard_refs.get() };
        if let Some(existing) = refs.iter_mut().find(|r| r.node == handle) {
            existing.count += 1;
            return;
        }
        let index = refs
            .iter()
            .position(|r| r.node.is_none())
            .expect("not enough hazard pointers");
        td.hazards[index].store(handle.bits(), Ordering::SeqCst);
        refs[index] = HazardRef {
            node: handle,
            count: 1,
        };
    }

    /// Releases one reference; the hazard slot is cleared when the last
    /// reference from this thread goes away.
    pub fn release_ref(&self, handle: Handle) {
        let td = self.thread_data();
        let refs = unsafe { &mut *td.hazard_refs.get() };
        let (index, entry) = refs
            .iter_mut()
            .enumerate()
            .find(|(_, r)| r.node == handle)
            .expect("hazard pointer already released");
        entry.count -= 1;
        if entry.count == 0 {
            entry.node = Handle::NONE;
            td.hazards[index].store(NONE_IDX, Ordering::SeqCst);
        }
    }

    /// Compare-and-sets a link, maintaining the reference counts of the old
    /// and new targets. Returns false if another thread changed the link.
    pub fn cas_ref(&self, link: &AtomicLink, new: Link, old: Link) -> bool {
        if !link.cas(new, old) {
            return false;
        }
        if !new.ptr().is_none() {
            let header = self.node(new.ptr()).header();
            header.refc.fetch_add(1, Ordering::SeqCst);
            header.trace.store(false, Ordering::SeqCst);
        }
        if !old.ptr().is_none() {
            self.node(old.ptr())
                .header()
                .refc
                .fetch_sub(1, Ordering::SeqCst);
        }
        true
    }

    /// Stores a link in a single-writer context, with the same reference
    /// bookkeeping as [`cas_ref`](HazardMem::cas_ref).
    pub fn store_ref(&self, link: &AtomicLink, new: Link) {
        let old = link.load(Ordering::SeqCst);
        link.store(new, Ordering::SeqCst);
        if !new.ptr().is_none() {
            let header = self.node(new.ptr()).header();
            header.refc.fetch_add(1, Ordering::SeqCst);
            header.trace.store(false, Ordering::SeqCst);
        }
        if !old.ptr().is_none() {
            self.node(old.ptr())
                .header()
                .refc
                .fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Rewrites links of nodes this thread has deleted so they skip deleted
    /// successors.
    fn clean_up_local(&self, td: &ThreadData) {
        let mut idx = td.del_head.get();
        while idx != NONE_IDX {
            let rec = &td.del_records[idx as usize];
            let node = Handle::from_bits(rec.node.load(Ordering::SeqCst));
            self.config.clean_up_node(self, node);
            idx = rec.next.get();
        }
    }

    /// Same as [`clean_up_local`](HazardMem::clean_up_local) but over every
    /// thread's delete records, claiming each record while working on it.
    fn clean_up_all(&self) {
        let count = self.claimed();
        for td in &self.threads[..count] {
            for rec in td.del_records.iter() {
                let bits = rec.node.load(Ordering::SeqCst);
                if bits != NONE_IDX && !rec.done.load(Ordering::SeqCst) {
                    rec.claim.fetch_add(1, Ordering::SeqCst);
                    if rec.node.load(Ordering::SeqCst) == bits {
                        self.config.clean_up_node(self, Handle::from_bits(bits));
                    }
                    rec.claim.fetch_sub(1, Ordering::SeqCst);
                }
            }
        }
    }

    /// Attempts to reclaim this thread's deleted nodes. Nodes present in any
    /// thread's hazard array stay pending.
    fn scan(&self, td: &ThreadData) {
        // Affirm trace so that ref == 0 is stable across the hazard check
        let mut idx = td.del_head.get();
        while idx != NONE_IDX {
            let rec = &td.del_records[idx as usize];
            let header = self
                .node(Handle::from_bits(rec.node.load(Ordering::SeqCst)))
                .header();
            if header.refc.load(Ordering::SeqCst) == 0 {
                header.trace.store(true, Ordering::SeqCst);
                if header.refc.load(Ordering::SeqCst) != 0 {
                    header.trace.store(false, Ordering::SeqCst);
                }
            }
            idx = rec.next.get();
        }

        let hazard_set = unsafe { &mut *td.del_hazards.get() };
        let count = self.claimed();
        for peer in &self.threads[..count] {
            for slot in peer.hazards.iter() {
                let bits = slot.load(Ordering::SeqCst);
                if bits != NONE_IDX {
                    hazard_set.insert(bits);
                }
            }
        }

        let mut new_head = NONE_IDX;
        let mut new_count = 0usize;
        let mut idx = td.del_head.get();
        while idx != NONE_IDX {
            let rec = &td.del_records[idx as usize];
            let next = rec.next.get();
            let node = Handle::from_bits(rec.node.load(Ordering::SeqCst));
            let header = self.node(node).header();
            if header.refc.load(Ordering::SeqCst) == 0
                && header.trace.load(Ordering::SeqCst)
                && !hazard_set.contains(&node.bits())
            {
                rec.node.store(NONE_IDX, Ordering::SeqCst);
                if rec.claim.load(Ordering::SeqCst) == 0 {
                    self.config.terminate_node(self, node, false);
                    unsafe { (*td.del_free.get()).push(idx) };
                    self.free_list.free(node);
                    idx = next;
                    continue;
                }
                self.config.terminate_node(self, node, true);
                rec.done.store(true, Ordering::SeqCst);
                rec.node.store(node.bits(), Ordering::SeqCst);
            }
            rec.next.set(new_head);
            new_head = idx;
            new_count += 1;
            idx = next;
        }

        hazard_set.clear();
        td.del_head.set(new_head);
        td.del_count.set(new_count);
    }

    fn claimed(&self) -> usize {
        self.thread_count.load(Ordering::Acquire).min(self.thread_max)
    }
}

impl<C: MemConfig> Drop for HazardMem<C> {
    fn drop(&mut self) {
        // Terminate and hand every pending deleted node back to the arena;
        // exclusive access, so the non-concurrent hook applies
        for td in self.threads.iter() {
            let mut idx = td.del_head.get();
            while idx != NONE_IDX {
                let rec = &td.del_records[idx as usize];
                let bits = rec.node.load(Ordering::SeqCst);
                if bits != NONE_IDX {
                    let node = Handle::from_bits(bits);
                    self.config.terminate_node(self, node, false);
                    self.free_list.free(node);
                }
                idx = rec.next.get();
            }
        }
        TD_CACHE.with(|cache| {
            cache.borrow_mut().remove(&self.id);
        });
    }
}
