//! The underlying ring buffer storage for MPSC queues.
//!
//! Uses per-cell sequence numbers to coordinate multiple producers and to
//! tolerate out-of-order publish completion.

use std::cell::UnsafeCell;
use std::mem::{ManuallyDrop, MaybeUninit};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use crate::CapacityError;

/// A cell in the sequenced ring buffer.
///
/// The sequence number encodes the cell's state relative to the claim index
/// `k` of its current lap:
/// - `sequence == k`: empty, claimable by a producer whose head equals `k`
/// - `sequence == k + 1`: full, consumable by the consumer whose tail is `k`
/// - `sequence == k + capacity`: recycled, claimable next lap
#[repr(C)]
pub(crate) struct Cell<T> {
    pub(crate) sequence: AtomicUsize,
    pub(crate) value: UnsafeCell<MaybeUninit<T>>,
}

/// The backing storage for an MPSC queue.
///
/// The queue holds elements in `[tail, head)` on free-running counters:
/// - Producers claim at `head` via CAS, then write and publish the cell
/// - The consumer drains at `tail`, recycling each cell for the next lap
///
/// Memory layout:
/// ```text
/// ┌───────────────────────────────────────────────────────┐
/// │ head (cache-line padded) - producers' claim counter   │
/// ├───────────────────────────────────────────────────────┤
/// │ tail (cache-line padded) - consumer drain counter     │
/// ├───────────────────────────────────────────────────────┤
/// │ header: buffer ptr, capacity, mask, counts, flags     │
/// ├───────────────────────────────────────────────────────┤
/// │ Cell[0]: { sequence, value }                          │
/// │ ...                                                   │
/// └───────────────────────────────────────────────────────┘
/// ```
#[repr(C)]
pub(crate) struct RingBuffer<T> {
    /// Producers' claim position (multiple producers CAS on this).
    head: CachePadded<AtomicUsize>,
    /// Consumer's drain position.
    tail: CachePadded<AtomicUsize>,

    buffer: *mut Cell<T>,

    capacity: usize,
    mask: usize,

    ref_count: AtomicUsize,

    /// Number of senders alive. When 0, all producers disconnected.
    sender_count: AtomicUsize,
    /// Set when the receiver is dropped.
    receiver_disconnected: AtomicBool,
}

unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Allocates a new ring buffer with the given capacity.
    ///
    /// Fails unless the capacity is a power of two and at least 2. Initial
    /// ref_count is 2 (one sender + one receiver).
    pub(crate) fn allocate(capacity: usize) -> Result<NonNull<Self>, CapacityError> {
        let capacity = CapacityError::check(capacity)?;

        let buffer = ManuallyDrop::new(Vec::<Cell<T>>::with_capacity(capacity)).as_mut_ptr();

        // Every cell starts one full lap away from consumable: sequence = index
        for i in 0..capacity {
            unsafe {
                let cell = buffer.add(i);
                ptr::addr_of_mut!((*cell).sequence).write(AtomicUsize::new(i));
                // value stays uninitialized (MaybeUninit)
            }
        }

        let rb = Box::new(Self {
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            buffer,
            capacity,
            mask: capacity - 1,
            ref_count: AtomicUsize::new(2),
            sender_count: AtomicUsize::new(1),
            receiver_disconnected: AtomicBool::new(false),
        });

        Ok(unsafe { NonNull::new_unchecked(Box::into_raw(rb)) })
    }

    // === Accessors ===

    #[inline]
    fn cell_ptr(&self, pos: usize) -> *mut Cell<T> {
        unsafe { self.buffer.add(pos & self.mask) }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    // === Producer operations (head) ===

    /// Claims the cell at `head` for one producer and publishes the value.
    ///
    /// Returns the value back when the ring is full.
    pub(crate) fn try_write(&self, value: T) -> Result<(), T> {
        let backoff = crossbeam_utils::Backoff::new();
        let mut pos = self.head.load(Ordering::Relaxed);

        loop {
            let cell = self.cell_ptr(pos);
            let seq = unsafe { (*cell).sequence.load(Ordering::Acquire) };
            let diff = seq as isize - pos as isize;

            if diff == 0 {
                // Cell is empty for this lap: race other producers for it
                match self.head.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Claimed: fill the cell, then hand it to the consumer
                        unsafe {
                            (*cell).value.get().cast::<T>().write(value);
                            (*cell)
                                .sequence
                                .store(pos.wrapping_add(1), Ordering::Release);
                        }
                        return Ok(());
                    }
                    Err(current) => {
                        pos = current;
                        backoff.spin();
                    }
                }
            } else if diff < 0 {
                // Cell still holds last lap's unconsumed value: full
                return Err(value);
            } else {
                // Another producer advanced past us: reload and retry
                pos = self.head.load(Ordering::Relaxed);
                backoff.spin();
            }
        }
    }

    /// Loads the producers' claim counter.
    #[inline]
    pub(crate) fn load_head(&self) -> usize {
        self.head.load(Ordering::Relaxed)
    }

    // === Consumer operations (tail) ===

    /// Attempts to drain the cell at `pos`.
    ///
    /// Returns `None` if the cell has not been published for this lap.
    ///
    /// # Safety
    ///
    /// Must only be called from the single consumer, with `pos` equal to its
    /// current drain position.
    #[inline]
    pub(crate) unsafe fn try_read(&self, pos: usize) -> Option<T> {
        let cell = self.cell_ptr(pos);
        let seq = unsafe { (*cell).sequence.load(Ordering::Acquire) };
        let diff = seq as isize - pos.wrapping_add(1) as isize;

        if diff < 0 {
            return None;
        }

        // Safety: sequence == pos + 1 means the producer finished publishing
        let value = unsafe { (*(*cell).value.get()).assume_init_read() };

        // Recycle the cell for the claim at pos + capacity
        unsafe {
            (*cell)
                .sequence
                .store(pos.wrapping_add(self.capacity), Ordering::Release);
        }

        // Publish drain progress; advisory readers and producers' full check
        // tolerate staleness
        self.tail.store(pos.wrapping_add(1), Ordering::Relaxed);

        Some(value)
    }

    // === Advisory observations (relaxed, may be stale) ===

    #[inline]
    pub(crate) fn advisory_len(&self) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        head.wrapping_sub(tail)
    }

    #[inline]
    pub(crate) fn advisory_full(&self) -> bool {
        self.advisory_len() >= self.capacity
    }

    // === Liveness ===

    #[inline]
    pub(crate) fn add_sender(&self) {
        self.sender_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn remove_sender(&self) {
        self.sender_count.fetch_sub(1, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn sender_count(&self) -> usize {
        self.sender_count.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn is_receiver_disconnected(&self) -> bool {
        self.receiver_disconnected.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_receiver_disconnected(&self) {
        self.receiver_disconnected.store(true, Ordering::Release);
    }

    // === Lifecycle ===

    pub(crate) fn acquire(this: NonNull<Self>) {
        unsafe {
            this.as_ref().ref_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Decrements the reference count and deallocates at zero.
    ///
    /// # Safety
    ///
    /// Must only be called when a handle is being dropped. The pointer must
    /// not be used after this call returns.
    pub(crate) unsafe fn release(this: NonNull<Self>) {
        let inner = unsafe { this.as_ref() };

        if inner.ref_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            unsafe {
                Self::drop_remaining_elements(this);

                let _ = Vec::from_raw_parts(inner.buffer, 0, inner.capacity);
                let _ = Box::from_raw(this.as_ptr());
            }
        }
    }

    unsafe fn drop_remaining_elements(this: NonNull<Self>) {
        let inner = unsafe { this.as_ref() };
        let tail = inner.tail.load(Ordering::Relaxed);
        let head = inner.head.load(Ordering::Relaxed);

        for pos in tail..head {
            let cell = inner.cell_ptr(pos);
            let seq = unsafe { (*cell).sequence.load(Ordering::Relaxed) };

            // Only published cells hold live values; a claimed-but-abandoned
            // cell never got one
            if seq == pos.wrapping_add(1) {
                unsafe {
                    ptr::drop_in_place((*cell).value.get().cast::<T>());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_sequences_start_at_index() {
        let rb = RingBuffer::<u64>::allocate(8).unwrap();

        unsafe {
            let inner = rb.as_ref();

            for i in 0..8 {
                let cell = inner.cell_ptr(i);
                assert_eq!((*cell).sequence.load(Ordering::Relaxed), i);
            }

            RingBuffer::release(rb);
            RingBuffer::release(rb);
        }
    }

    #[test]
    fn allocation_validates_capacity() {
        assert!(RingBuffer::<u64>::allocate(0).is_err());
        assert!(RingBuffer::<u64>::allocate(5).is_err());
        assert!(RingBuffer::<u64>::allocate(16).is_ok_and(|rb| {
            unsafe {
                let ok = rb.as_ref().capacity() == 16;
                RingBuffer::release(rb);
                RingBuffer::release(rb);
                ok
            }
        }));
    }
}
