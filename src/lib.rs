//! Petek: hazard-pointer memory reclamation for lock-free data structures
//!
//! Petek provides the memory-safety substrate that pointer-linked lock-free
//! containers are built on: an arena allocator with ABA-tagged handles and a
//! hazard-pointer memory manager with per-node reference counting.
//!
//! # Key Features
//!
//! - **Arena Handles**: Nodes are addressed by 32-bit handles into an arena
//!   that never unmaps storage, so stale readers can dereference and
//!   validate afterwards
//! - **Tagged Links**: `(handle, tag)` words CAS-ed as a unit rule out ABA
//!   within an execution
//! - **Hazard Pointers**: Per-thread hazard slots keep referenced nodes
//!   alive across logical deletion
//! - **Deferred Reclamation**: Deleted nodes are scanned in batches and
//!   returned to their arena once unreachable
//!
//! # Example
//!
//! ```rust,ignore
//! use petek::{FreeList, Handle};
//!
//! let arena: FreeList<MyNode> = FreeList::new(64);
//! let h = arena.alloc();
//! // initialize the entry through its own methods, then later:
//! arena.free(h);
//! ```

#![warn(missing_docs)]

mod free_list;
mod link;
mod mem;
mod spin;

pub use free_list::{AtomicTagged, FreeList, Handle, Tagged};
pub use link::{AtomicLink, Link};
pub use mem::{HazardMem, MemConfig, MemNode, NodeHeader};
pub use spin::{SpinGuard, SpinLock};
