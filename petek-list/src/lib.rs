//! Lock-free doubly-linked list for Petek.
//!
//! ## Features
//!
//! - [`List`]: Unbounded lock-free doubly-linked list; push/pop at both
//!   ends, insertion and erasure at cursor positions.
//! - [`Cursor`] / [`RCursor`]: Bidirectional cursors pinned by hazard
//!   references; erasure races are resolved so exactly one contender wins.
//!
//! ## Usage
//!
//! ```rust
//! use petek_list::List;
//!
//! let list: List<i32> = List::new(8);
//! list.push_back(1);
//! list.push_front(0);
//! assert_eq!(list.iter().collect::<Vec<_>>(), vec![0, 1]);
//! assert_eq!(list.pop_front(), Some(0));
//! ```

#![warn(missing_docs)]

mod list;

pub use list::{Cursor, Iter, List, RCursor};
