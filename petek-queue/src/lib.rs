//! Concurrent queue primitives built on Petek's reclamation substrate.
//!
//! ## Features
//!
//! - [`Queue`]: Unbounded lock-free MPMC FIFO queue (Michael–Scott over a
//!   tagged free-list arena).
//! - [`SpscDeque`]: Growable ring deque with split front/back spin locks,
//!   lock-free for a single producer and single consumer.
//!
//! ## Usage
//!
//! ```rust
//! use petek_queue::Queue;
//!
//! let q = Queue::new();
//! q.push(1);
//! q.push(2);
//! assert_eq!(q.pop(), Some(1));
//! assert_eq!(q.pop(), Some(2));
//! assert_eq!(q.pop(), None);
//! ```

#![warn(missing_docs)]

pub mod fifo;
pub mod spsc_deque;

pub use fifo::Queue;
pub use spsc_deque::SpscDeque;
