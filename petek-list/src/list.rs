//! Lock-free doubly-linked list
//!
//! The Sundell–Tsigas algorithm ("Lock-free deques and doubly linked
//! lists", 2008) over Petek's hazard-pointer memory manager. A node is
//! logically deleted by marking its `next` link before its `prev` link;
//! traversals skip marked nodes and repair stale `prev` pointers through
//! `correct_prev`.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicI64, Ordering};

use crossbeam_utils::Backoff;
use petek::{AtomicLink, Handle, HazardMem, Link, MemConfig, MemNode, NodeHeader};

struct Node<T> {
    header: NodeHeader,
    prev: AtomicLink,
    next: AtomicLink,
    val: UnsafeCell<Option<T>>,
}

unsafe impl<T: Send> Send for Node<T> {}
unsafe impl<T: Send> Sync for Node<T> {}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Self {
            header: NodeHeader::default(),
            prev: AtomicLink::default(),
            next: AtomicLink::default(),
            val: UnsafeCell::new(None),
        }
    }
}

impl<T> MemNode for Node<T> {
    fn header(&self) -> &NodeHeader {
        &self.header
    }
}

struct ListConfig<T>(PhantomData<T>);

impl<T: Send> MemConfig for ListConfig<T> {
    type Node = Node<T>;

    const LINK_MAX: usize = 2;
    const LINK_DEL_MAX: usize = 2;

    fn clean_up_node(&self, mem: &HazardMem<Self>, node: Handle) {
        // walk the prev chain past deleted predecessors
        loop {
            let prev = mem.de_ref_link(&mem.node(node).prev);
            if prev.is_none() {
                break;
            }
            if !mem.node(prev).prev.load(Ordering::SeqCst).d() {
                mem.release_ref(prev);
                break;
            }
            let prev2 = mem.de_ref_link(&mem.node(prev).prev);
            mem.cas_ref(
                &mem.node(node).prev,
                Link::new(prev2, true),
                Link::new(prev, true),
            );
            if !prev2.is_none() {
                mem.release_ref(prev2);
            }
            mem.release_ref(prev);
        }
        // and the next chain past deleted successors
        loop {
            let next = mem.de_ref_link(&mem.node(node).next);
            if next.is_none() {
                break;
            }
            if !mem.node(next).next.load(Ordering::SeqCst).d() {
                mem.release_ref(next);
                break;
            }
            let next2 = mem.de_ref_link(&mem.node(next).next);
            mem.cas_ref(
                &mem.node(node).next,
                Link::new(next2, true),
                Link::new(next, true),
            );
            if !next2.is_none() {
                mem.release_ref(next2);
            }
            mem.release_ref(next);
        }
    }

    fn terminate_node(&self, mem: &HazardMem<Self>, node: Handle, concurrent: bool) {
        if !concurrent {
            mem.store_ref(&mem.node(node).prev, Link::new(Handle::NONE, true));
            mem.store_ref(&mem.node(node).next, Link::new(Handle::NONE, true));
        } else {
            loop {
                let old = mem.node(node).prev.load(Ordering::SeqCst);
                if old.ptr().is_none() && old.d() {
                    break;
                }
                if mem.cas_ref(&mem.node(node).prev, Link::new(Handle::NONE, true), old) {
                    break;
                }
            }
            loop {
                let old = mem.node(node).next.load(Ordering::SeqCst);
                if old.ptr().is_none() && old.d() {
                    break;
                }
                if mem.cas_ref(&mem.node(node).next, Link::new(Handle::NONE, true), old) {
                    break;
                }
            }
        }
    }
}

/// Lock-free doubly-linked list with bidirectional cursors.
///
/// Safe under arbitrary concurrent access from up to `thread_max` threads.
/// The element count is tracked with a signed counter that can transiently
/// run negative under concurrency; [`len`](List::len) clamps it at zero.
pub struct List<T: Send> {
    mem: HazardMem<ListConfig<T>>,
    head: AtomicLink,
    tail: AtomicLink,
    size: AtomicI64,
}

unsafe impl<T: Send> Send for List<T> {}
unsafe impl<T: Send> Sync for List<T> {}

impl<T: Send> List<T> {
    /// Creates a list for up to `thread_max` threads, allowing two live
    /// cursors per thread.
    pub fn new(thread_max: usize) -> Self {
        Self::with_iter_max(thread_max, 2)
    }

    /// Creates a list allowing up to `iter_max` live cursors per thread.
    ///
    /// Each cursor pins one hazard slot on top of the five the list
    /// operations themselves need.
    pub fn with_iter_max(thread_max: usize, iter_max: usize) -> Self {
        assert!(iter_max >= 1, "at least one cursor per thread is required");
        let hazard_max = 5 + iter_max;
        let list = List {
            mem: HazardMem::new(ListConfig(PhantomData), thread_max, hazard_max),
            head: AtomicLink::default(),
            tail: AtomicLink::default(),
            size: AtomicI64::new(0),
        };
        let head = list.construct(None);
        let tail = list.construct(None);
        list.mem.store_ref(&list.head, Link::new(head, false));
        list.mem.store_ref(&list.tail, Link::new(tail, false));
        list.mem
            .store_ref(&list.mem.node(head).next, Link::new(tail, false));
        list.mem
            .store_ref(&list.mem.node(tail).prev, Link::new(head, false));
        list.mem.release_ref(head);
        list.mem.release_ref(tail);
        list
    }

    /// Inserts `data` at the beginning of the list.
    pub fn push_front(&self, data: T) {
        let node = self.construct(Some(data));
        let prev = self.mem.de_ref_link(&self.head);
        let mut next = self.mem.de_ref_link(&self.mem.node(prev).next);
        let backoff = Backoff::new();
        loop {
            self.mem
                .store_ref(&self.mem.node(node).prev, Link::new(prev, false));
            self.mem
                .store_ref(&self.mem.node(node).next, Link::new(next, false));
            if self.mem.cas_ref(
                &self.mem.node(prev).next,
                Link::new(node, false),
                Link::new(next, false),
            ) {
                break;
            }
            self.mem.release_ref(next);
            next = self.mem.de_ref_link(&self.mem.node(prev).next);
            backoff.snooze();
        }
        self.size.fetch_add(1, Ordering::SeqCst);
        self.mem.release_ref(prev);
        self.push_end(node, next);
    }

    /// Adds `data` onto the end of the list.
    pub fn push_back(&self, data: T) {
        let node = self.construct(Some(data));
        let next = self.mem.de_ref_link(&self.tail);
        let mut prev = self.mem.de_ref_link(&self.mem.node(next).prev);
        let backoff = Backoff::new();
        loop {
            self.mem
                .store_ref(&self.mem.node(node).prev, Link::new(prev, false));
            self.mem
                .store_ref(&self.mem.node(node).next, Link::new(next, false));
            if self.mem.cas_ref(
                &self.mem.node(prev).next,
                Link::new(node, false),
                Link::new(next, false),
            ) {
                break;
            }
            prev = self.correct_prev(prev, next);
            backoff.snooze();
        }
        self.size.fetch_add(1, Ordering::SeqCst);
        self.mem.release_ref(prev);
        self.push_end(node, next);
    }

    /// Pops the first element. Returns `None` if the list is empty.
    pub fn pop_front(&self) -> Option<T> {
        let prev = self.mem.de_ref_link(&self.head);
        let backoff = Backoff::new();
        let value;
        loop {
            let node = self.mem.de_ref_link(&self.mem.node(prev).next);
            if node == self.tail_h() {
                self.mem.release_ref(node);
                self.mem.release_ref(prev);
                return None;
            }
            let next_d = self.mem.node(node).next.load(Ordering::SeqCst).d();
            let next = self.mem.de_ref_link(&self.mem.node(node).next);
            if next_d {
                // already deleted; help unlink it and retry
                Self::set_mark(&self.mem.node(node).prev);
                self.mem.cas_ref(
                    &self.mem.node(prev).next,
                    Link::new(next, false),
                    Link::new(node, false),
                );
                self.mem.release_ref(next);
                self.mem.release_ref(node);
                continue;
            }
            if self.mem.cas_ref(
                &self.mem.node(node).next,
                Link::new(next, true),
                Link::new(next, false),
            ) {
                self.size.fetch_sub(1, Ordering::SeqCst);
                let p = self.correct_prev(prev, next);
                self.mem.release_ref(p);
                self.mem.release_ref(next);
                value = unsafe { (*self.mem.node(node).val.get()).take() };
                self.mem.release_ref(node);
                self.mem.delete_node(node);
                break;
            }
            self.mem.release_ref(next);
            self.mem.release_ref(node);
            backoff.snooze();
        }
        value
    }

    /// Pops the last element. Returns `None` if the list is empty.
    pub fn pop_back(&self) -> Option<T> {
        let next = self.mem.de_ref_link(&self.tail);
        let mut node = self.mem.de_ref_link(&self.mem.node(next).prev);
        let backoff = Backoff::new();
        loop {
            if self.mem.node(node).next.load(Ordering::SeqCst) != Link::new(next, false) {
                node = self.correct_prev(node, next);
                continue;
            }
            if node == self.head_h() {
                self.mem.release_ref(node);
                self.mem.release_ref(next);
                return None;
            }
            if self.mem.cas_ref(
                &self.mem.node(node).next,
                Link::new(next, true),
                Link::new(next, false),
            ) {
                self.size.fetch_sub(1, Ordering::SeqCst);
                let prev = self.mem.de_ref_link(&self.mem.node(node).prev);
                let p = self.correct_prev(prev, next);
                self.mem.release_ref(p);
                self.mem.release_ref(next);
                let value = unsafe { (*self.mem.node(node).val.get()).take() };
                self.mem.release_ref(node);
                self.mem.delete_node(node);
                return value;
            }
            backoff.snooze();
        }
    }

    /// Cursor positioned before the first element.
    pub fn rend(&self) -> RCursor<'_, T> {
        RCursor {
            inner: Cursor::at(self, false),
        }
    }

    /// Cursor on the first element (or at the end sentinel when empty).
    pub fn begin(&self) -> Cursor<'_, T> {
        let mut cursor = Cursor::at(self, false);
        cursor.move_next();
        cursor
    }

    /// Cursor at the end sentinel.
    pub fn end(&self) -> Cursor<'_, T> {
        Cursor::at(self, true)
    }

    /// Cursor on the last element (or at the start sentinel when empty).
    pub fn rbegin(&self) -> RCursor<'_, T> {
        let mut inner = Cursor::at(self, true);
        inner.move_prev();
        RCursor { inner }
    }

    /// Removes all elements.
    pub fn clear(&self) {
        let mut cursor = self.begin();
        while !cursor.at_end() {
            cursor.erase();
        }
    }

    /// Whether the list contains no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of elements in the list.
    pub fn len(&self) -> usize {
        // transiently negative under racing pushes and pops
        self.size.load(Ordering::SeqCst).max(0) as usize
    }

    fn head_h(&self) -> Handle {
        self.head.load(Ordering::Relaxed).ptr()
    }

    fn tail_h(&self) -> Handle {
        self.tail.load(Ordering::Relaxed).ptr()
    }

    fn construct(&self, data: Option<T>) -> Handle {
        let node = self.mem.create_node();
        self.mem.node(node).prev.store(Link::NULL, Ordering::Relaxed);
        self.mem.node(node).next.store(Link::NULL, Ordering::Relaxed);
        unsafe { *self.mem.node(node).val.get() = data };
        node
    }

    /// Sets the delete mark, preserving the link target.
    fn set_mark(link: &AtomicLink) {
        loop {
            let old = link.load(Ordering::SeqCst);
            if old.d() || link.cas(old.marked(), old) {
                break;
            }
        }
    }

    /// Second half of a push: hook `next.prev` up to the freshly linked node.
    fn push_end(&self, node: Handle, next: Handle) {
        let mut p_node = node;
        let backoff = Backoff::new();
        loop {
            let link = self.mem.node(next).prev.load(Ordering::SeqCst);
            if link.d() || self.mem.node(node).next.load(Ordering::SeqCst) != Link::new(next, false)
            {
                break;
            }
            if self
                .mem
                .cas_ref(&self.mem.node(next).prev, Link::new(node, false), link)
            {
                if self.mem.node(node).prev.load(Ordering::SeqCst).d() {
                    p_node = self.correct_prev(node, next);
                }
                break;
            }
            backoff.snooze();
        }
        self.mem.release_ref(next);
        self.mem.release_ref(p_node);
    }

    /// Repairs `node.prev` to point at a live predecessor, starting from the
    /// suggestion `prev`. Consumes the caller's reference on `prev` and
    /// returns a referenced candidate predecessor.
    fn correct_prev(&self, mut prev: Handle, node: Handle) -> Handle {
        let mut last_link: Option<Handle> = None;
        let backoff = Backoff::new();
        loop {
            let link = self.mem.node(node).prev.load(Ordering::SeqCst);
            if link.d() {
                // node was deleted while correcting; prev may have advanced
                // past it, so undo the last step
                if let Some(last) = last_link.take() {
                    self.mem.release_ref(prev);
                    prev = last;
                }
                break;
            }
            let prev2_d = self.mem.node(prev).next.load(Ordering::SeqCst).d();
            let prev2 = self.mem.de_ref_link(&self.mem.node(prev).next);
            if prev2_d {
                if let Some(last) = last_link.take() {
                    Self::set_mark(&self.mem.node(prev).prev);
                    self.mem.cas_ref(
                        &self.mem.node(last).next,
                        Link::new(prev2, false),
                        Link::new(prev, false),
                    );
                    self.mem.release_ref(prev2);
                    self.mem.release_ref(prev);
                    prev = last;
                    continue;
                }
                self.mem.release_ref(prev2);
                let prev2 = self.mem.de_ref_link(&self.mem.node(prev).prev);
                self.mem.release_ref(prev);
                prev = prev2;
                continue;
            }
            if prev2 != node {
                if let Some(last) = last_link.take() {
                    self.mem.release_ref(last);
                }
                last_link = Some(prev);
                prev = prev2;
                continue;
            }
            self.mem.release_ref(prev2);
            if self
                .mem
                .cas_ref(&self.mem.node(node).prev, Link::new(prev, false), link)
            {
                if self.mem.node(prev).prev.load(Ordering::SeqCst).d() {
                    continue;
                }
                break;
            }
            backoff.snooze();
        }
        if let Some(last) = last_link {
            self.mem.release_ref(last);
        }
        prev
    }
}

impl<T: Send + Clone> List<T> {
    /// Copies out the first element. Returns `None` if the list is empty.
    pub fn front(&self) -> Option<T> {
        let cursor = self.begin();
        if cursor.at_end() || !cursor.valid() {
            return None;
        }
        cursor.get()
    }

    /// Copies out the last element. Returns `None` if the list is empty.
    pub fn back(&self) -> Option<T> {
        let cursor = self.rbegin();
        if cursor.at_end() || !cursor.valid() {
            return None;
        }
        cursor.get()
    }

    /// Iterator over cloned elements, front to back.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            cursor: self.begin(),
        }
    }
}

impl<T: Send> Drop for List<T> {
    fn drop(&mut self) {
        self.clear();
        let head = self.head_h();
        let tail = self.tail_h();
        self.mem.delete_node(head);
        self.mem.delete_node(tail);
    }
}

/// Bidirectional cursor over a [`List`].
///
/// A cursor pins its position with one hazard reference, so the number of
/// live cursors per thread is bounded by the list's `iter_max`. Cursors are
/// not thread-safe among themselves and cannot leave their thread.
pub struct Cursor<'a, T: Send> {
    list: &'a List<T>,
    cur: Handle,
    /// Hazard bookkeeping is thread-local; keep the cursor on its thread.
    _not_send: PhantomData<*mut ()>,
}

impl<'a, T: Send> Cursor<'a, T> {
    fn at(list: &'a List<T>, end: bool) -> Self {
        let cur = if end { list.tail_h() } else { list.head_h() };
        list.mem.ref_node(cur);
        Cursor {
            list,
            cur,
            _not_send: PhantomData,
        }
    }

    /// Whether the cursor sits on a live element.
    pub fn valid(&self) -> bool {
        !self.list.mem.node(self.cur).next.load(Ordering::SeqCst).d()
    }

    /// Whether the cursor has reached the end sentinel.
    pub fn at_end(&self) -> bool {
        self.cur == self.list.tail_h()
    }

    /// Advances to the next live element, opportunistically unlinking
    /// deleted nodes it passes over.
    pub fn move_next(&mut self) {
        let mem = &self.list.mem;
        loop {
            if self.cur == self.list.tail_h() {
                break;
            }
            let next = mem.de_ref_link(&mem.node(self.cur).next);
            let d = mem.node(next).next.load(Ordering::SeqCst).d();
            if d && mem.node(self.cur).next.load(Ordering::SeqCst) != Link::new(next, true) {
                List::<T>::set_mark(&mem.node(next).prev);
                mem.cas_ref(
                    &mem.node(self.cur).next,
                    Link::new(mem.node(next).next.load(Ordering::SeqCst).ptr(), false),
                    Link::new(next, false),
                );
                mem.release_ref(next);
                continue;
            }
            mem.release_ref(self.cur);
            self.cur = next;
            if !d {
                break;
            }
        }
    }

    /// Steps back to the previous live element.
    pub fn move_prev(&mut self) {
        let mem = &self.list.mem;
        loop {
            if self.cur == self.list.head_h() {
                break;
            }
            let prev = mem.de_ref_link(&mem.node(self.cur).prev);
            if mem.node(prev).next.load(Ordering::SeqCst) == Link::new(self.cur, false)
                && !mem.node(self.cur).next.load(Ordering::SeqCst).d()
            {
                mem.release_ref(self.cur);
                self.cur = prev;
                break;
            } else if mem.node(self.cur).next.load(Ordering::SeqCst).d() {
                mem.release_ref(prev);
                self.move_next();
            } else {
                let p = self.list.correct_prev(prev, self.cur);
                mem.release_ref(p);
            }
        }
    }

    /// Inserts `data` before the cursor position and leaves the cursor on
    /// the new element.
    pub fn insert(&mut self, data: T) {
        let list = self.list;
        let mem = &list.mem;
        assert!(
            self.cur != list.head_h(),
            "cannot insert before the start sentinel"
        );

        let node = list.construct(Some(data));
        let mut prev = mem.de_ref_link(&mem.node(self.cur).prev);
        let backoff = Backoff::new();
        loop {
            while mem.node(self.cur).next.load(Ordering::SeqCst).d() {
                self.move_next();
                prev = list.correct_prev(prev, self.cur);
            }
            mem.store_ref(&mem.node(node).prev, Link::new(prev, false));
            mem.store_ref(&mem.node(node).next, Link::new(self.cur, false));
            if mem.cas_ref(
                &mem.node(prev).next,
                Link::new(node, false),
                Link::new(self.cur, false),
            ) {
                break;
            }
            prev = list.correct_prev(prev, self.cur);
            backoff.snooze();
        }
        list.size.fetch_add(1, Ordering::SeqCst);
        mem.release_ref(prev);
        // correct_prev takes over one reference on the new node; hold another
        // so the cursor can sit on it
        mem.ref_node(node);
        let p = list.correct_prev(node, self.cur);
        mem.release_ref(p);
        mem.release_ref(self.cur);
        self.cur = node;
    }

    /// Erases the element under the cursor and advances past it.
    ///
    /// Exactly one of any set of racing erasers wins and receives the value;
    /// the losers get `None`.
    pub fn erase(&mut self) -> Option<T> {
        let list = self.list;
        let mem = &list.mem;
        let node = self.cur;
        assert!(
            node != list.head_h() && node != list.tail_h(),
            "cannot erase a sentinel"
        );

        let mut result = None;
        loop {
            let next_d = mem.node(self.cur).next.load(Ordering::SeqCst).d();
            let next = mem.de_ref_link(&mem.node(self.cur).next);
            if next_d {
                mem.release_ref(next);
                break;
            }
            // the delete-mark CAS keeps the target, so no refcount changes
            if mem
                .node(node)
                .next
                .cas(Link::new(next, true), Link::new(next, false))
            {
                list.size.fetch_sub(1, Ordering::SeqCst);
                let prev;
                loop {
                    let prev_d = mem.node(node).prev.load(Ordering::SeqCst).d();
                    let p = mem.de_ref_link(&mem.node(node).prev);
                    if prev_d
                        || mem
                            .node(node)
                            .prev
                            .cas(Link::new(p, true), Link::new(p, false))
                    {
                        prev = p;
                        break;
                    }
                    mem.release_ref(p);
                }
                let p = list.correct_prev(prev, next);
                mem.release_ref(p);
                mem.release_ref(next);
                result = unsafe { (*mem.node(node).val.get()).take() };
                mem.delete_node(node);
                break;
            }
            mem.release_ref(next);
        }
        self.move_next();
        result
    }
}

impl<'a, T: Send + Clone> Cursor<'a, T> {
    /// Copies out the element under the cursor. `None` on a sentinel or a
    /// node whose value a racing eraser already claimed.
    pub fn get(&self) -> Option<T> {
        if self.cur == self.list.head_h() || self.cur == self.list.tail_h() {
            return None;
        }
        unsafe { (*self.list.mem.node(self.cur).val.get()).clone() }
    }
}

impl<'a, T: Send> Clone for Cursor<'a, T> {
    fn clone(&self) -> Self {
        self.list.mem.ref_node(self.cur);
        Cursor {
            list: self.list,
            cur: self.cur,
            _not_send: PhantomData,
        }
    }
}

impl<'a, T: Send> PartialEq for Cursor<'a, T> {
    fn eq(&self, other: &Self) -> bool {
        self.cur == other.cur
    }
}

impl<'a, T: Send> Drop for Cursor<'a, T> {
    fn drop(&mut self) {
        self.list.mem.release_ref(self.cur);
    }
}

/// Reverse cursor; `move_next` walks toward the front sentinel.
pub struct RCursor<'a, T: Send> {
    inner: Cursor<'a, T>,
}

impl<'a, T: Send> RCursor<'a, T> {
    /// Whether the cursor sits on a live element.
    pub fn valid(&self) -> bool {
        self.inner.valid()
    }

    /// Whether the cursor has reached the start sentinel.
    pub fn at_end(&self) -> bool {
        self.inner.cur == self.inner.list.head_h()
    }

    /// Steps toward the front of the list.
    pub fn move_next(&mut self) {
        self.inner.move_prev();
    }

    /// Steps back toward the end of the list.
    pub fn move_prev(&mut self) {
        self.inner.move_next();
    }
}

impl<'a, T: Send + Clone> RCursor<'a, T> {
    /// Copies out the element under the cursor.
    pub fn get(&self) -> Option<T> {
        self.inner.get()
    }
}

/// Cloning iterator returned by [`List::iter`].
pub struct Iter<'a, T: Send> {
    cursor: Cursor<'a, T>,
}

impl<'a, T: Send + Clone> Iterator for Iter<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        loop {
            if self.cursor.at_end() {
                return None;
            }
            if self.cursor.valid() {
                if let Some(val) = self.cursor.get() {
                    self.cursor.move_next();
                    return Some(val);
                }
            }
            self.cursor.move_next();
        }
    }
}
