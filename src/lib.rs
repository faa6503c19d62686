//! Bounded lock-free ring queues for latency-critical applications.
//!
//! `lanes` provides three queue shapes over a common contract, all backed by
//! fixed-size power-of-two rings allocated once at construction:
//!
//! - [`spsc`] - one producer, one consumer, wait-free on both sides.
//! - [`mpsc`] - many producers, one consumer; lock-free push, wait-free pop.
//! - [`broadcast`] - one producer, many independent subscribers, each
//!   observing the full stream in production order.
//!
//! # Quick Start
//!
//! ```
//! use lanes::spsc;
//!
//! let (mut tx, mut rx) = spsc::channel::<u64>(1024).unwrap();
//!
//! tx.try_send(42).unwrap();
//! assert_eq!(rx.try_recv().unwrap(), 42);
//! ```
//!
//! # Choosing a shape
//!
//! | Shape | Push | Pop | Full behavior |
//! |-------|------|-----|---------------|
//! | [`spsc`] | wait-free | wait-free | push fails (`Full`) |
//! | [`mpsc`] | lock-free (CAS claim) | wait-free | push fails (`Full`) |
//! | [`broadcast`] | wait-free | wait-free | oldest lap overwritten; laggards see `Overlapped` |
//!
//! All operations are non-blocking: nothing in this crate waits, sleeps, or
//! allocates after construction. Callers choose their own waiting strategy
//! (`std::hint::spin_loop`, `thread::yield_now`, ...) between attempts.
//!
//! # Capacity
//!
//! Every constructor takes the ring capacity and fails with [`CapacityError`]
//! unless it is a power of two and at least 2. The power-of-two requirement
//! lets every index wrap with a single bitmask. Note that the SPSC ring
//! reserves one slot to distinguish full from empty, so it holds at most
//! `capacity - 1` elements at a time.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, missing_debug_implementations)]

use core::fmt;

mod contract;

pub mod broadcast;
pub mod mpsc;
pub mod spsc;

pub use contract::{Consumer, Producer};

/// Error returned when a queue is constructed with an unusable capacity.
///
/// Contains the rejected capacity. Valid capacities are powers of two >= 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityError(pub usize);

impl CapacityError {
    /// Returns the capacity that was rejected.
    pub fn capacity(&self) -> usize {
        self.0
    }

    /// Checks a requested capacity, returning it unchanged if usable.
    pub(crate) fn check(capacity: usize) -> Result<usize, CapacityError> {
        if capacity < 2 || !capacity.is_power_of_two() {
            Err(CapacityError(capacity))
        } else {
            Ok(capacity)
        }
    }
}

impl fmt::Display for CapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "capacity must be a power of two and at least 2, got {}",
            self.0
        )
    }
}

impl std::error::Error for CapacityError {}
