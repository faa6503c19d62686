//! The underlying ring buffer storage for SPSC queues.
//!
//! A single header allocation plus a raw element buffer:
//! - Cache-line padded cursors
//! - Immutable configuration (capacity, mask)
//! - Reference count and disconnect flags shared by the two handles

use std::mem::ManuallyDrop;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use crate::CapacityError;

/// The backing storage for an SPSC queue.
///
/// Both cursors stay in `[0, capacity)` and wrap with the index mask. One
/// slot is always left unused so that `write_idx == read_idx` means empty
/// and `(write_idx + 1) & mask == read_idx` means full; the ring therefore
/// holds at most `capacity - 1` elements.
///
/// Memory layout:
/// ```text
/// ┌───────────────────────────────────────────────────────┐
/// │ read_idx (cache-line padded) - consumer cursor        │
/// ├───────────────────────────────────────────────────────┤
/// │ write_idx (cache-line padded) - producer cursor       │
/// ├───────────────────────────────────────────────────────┤
/// │ header: buffer ptr, capacity, mask, ref_count, flags  │
/// ├───────────────────────────────────────────────────────┤
/// │ Buffer: [MaybeUninit<T>; capacity]                    │
/// └───────────────────────────────────────────────────────┘
/// ```
#[repr(C)]
pub(crate) struct RingBuffer<T> {
    /// Consumer's read position. Updated by the receiver, read by the sender.
    read_idx: CachePadded<AtomicUsize>,
    /// Producer's write position. Updated by the sender, read by the receiver.
    write_idx: CachePadded<AtomicUsize>,

    buffer: *mut T,

    capacity: usize,
    mask: usize,

    ref_count: AtomicUsize,

    sender_disconnected: AtomicBool,
    receiver_disconnected: AtomicBool,
}

// Safety: RingBuffer can be shared across threads. The atomic cursors provide
// the necessary synchronization for the slots they guard.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Allocates a new ring buffer with the given capacity.
    ///
    /// Fails unless the capacity is a power of two and at least 2. The
    /// returned `NonNull` has a reference count of 2 (sender + receiver).
    pub(crate) fn allocate(capacity: usize) -> Result<NonNull<Self>, CapacityError> {
        let capacity = CapacityError::check(capacity)?;

        // Vec guarantees proper alignment for the element buffer
        let buffer = ManuallyDrop::new(Vec::<T>::with_capacity(capacity)).as_mut_ptr();

        let rb = Box::new(Self {
            read_idx: CachePadded::new(AtomicUsize::new(0)),
            write_idx: CachePadded::new(AtomicUsize::new(0)),
            buffer,
            capacity,
            mask: capacity - 1,
            ref_count: AtomicUsize::new(2),
            sender_disconnected: AtomicBool::new(false),
            receiver_disconnected: AtomicBool::new(false),
        });

        Ok(unsafe { NonNull::new_unchecked(Box::into_raw(rb)) })
    }

    #[inline(always)]
    fn slot_ptr(&self, index: usize) -> *mut T {
        // Safety: buffer is valid and masking keeps the index in bounds
        unsafe { self.buffer.add(index & self.mask) }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub(crate) fn mask(&self) -> usize {
        self.mask
    }

    // === Cursor operations ===

    /// Loads the consumer cursor with acquire ordering (producer slow path).
    #[inline(always)]
    pub(crate) fn load_read_idx(&self) -> usize {
        self.read_idx.load(Ordering::Acquire)
    }

    /// Loads the producer cursor with acquire ordering (consumer slow path).
    #[inline(always)]
    pub(crate) fn load_write_idx(&self) -> usize {
        self.write_idx.load(Ordering::Acquire)
    }

    /// Publishes a new producer cursor after the slot write.
    #[inline(always)]
    pub(crate) fn publish_write_idx(&self, write_idx: usize) {
        self.write_idx.store(write_idx, Ordering::Release);
    }

    /// Publishes a new consumer cursor after the slot read.
    #[inline(always)]
    pub(crate) fn publish_read_idx(&self, read_idx: usize) {
        self.read_idx.store(read_idx, Ordering::Release);
    }

    // === Advisory observations (relaxed, may be stale) ===

    #[inline]
    pub(crate) fn advisory_len(&self) -> usize {
        let write = self.write_idx.load(Ordering::Relaxed);
        let read = self.read_idx.load(Ordering::Relaxed);
        write.wrapping_sub(read) & self.mask
    }

    #[inline]
    pub(crate) fn advisory_full(&self) -> bool {
        let write = self.write_idx.load(Ordering::Relaxed);
        let read = self.read_idx.load(Ordering::Relaxed);
        (write + 1) & self.mask == read
    }

    // === Slot operations ===

    /// Writes a value into the slot at the given index.
    ///
    /// # Safety
    ///
    /// Caller must have exclusive write access to this slot and the slot must
    /// not hold a live value.
    #[inline(always)]
    pub(crate) unsafe fn write_slot(&self, index: usize, value: T) {
        unsafe {
            self.slot_ptr(index).write(value);
        }
    }

    /// Moves the value out of the slot at the given index.
    ///
    /// # Safety
    ///
    /// Caller must have exclusive read access to this slot and the slot must
    /// hold an initialized value.
    #[inline(always)]
    pub(crate) unsafe fn read_slot(&self, index: usize) -> T {
        unsafe { self.slot_ptr(index).read() }
    }

    // === Disconnect flags ===

    #[inline(always)]
    pub(crate) fn is_sender_disconnected(&self) -> bool {
        self.sender_disconnected.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub(crate) fn is_receiver_disconnected(&self) -> bool {
        self.receiver_disconnected.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub(crate) fn set_sender_disconnected(&self) {
        self.sender_disconnected.store(true, Ordering::Release);
    }

    #[inline(always)]
    pub(crate) fn set_receiver_disconnected(&self) {
        self.receiver_disconnected.store(true, Ordering::Release);
    }

    // === Lifecycle ===

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

                // Reconstruct and drop the Vec to free the buffer
                let _ = Vec::from_raw_parts(inner.buffer, 0, inner.capacity);

                // Reconstruct and drop the Box to free the header
                let _ = Box::from_raw(this.as_ptr());
            }
        }
    }

    /// Drops any elements still queued in `[read_idx, write_idx)`.
    ///
    /// # Safety
    ///
    /// Must only be called during deallocation when no other thread can
    /// access the buffer.
    unsafe fn drop_remaining_elements(this: NonNull<Self>) {
        let inner = unsafe { this.as_ref() };

        // Relaxed is enough: we are the sole accessor
        let mut read = inner.read_idx.load(Ordering::Relaxed);
        let write = inner.write_idx.load(Ordering::Relaxed);

        while read != write {
            // Safety: slots in [read, write) hold values written but never read
            unsafe {
                ptr::drop_in_place(inner.slot_ptr(read));
            }
            read = (read + 1) & inner.mask;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_validates_capacity() {
        assert!(RingBuffer::<u64>::allocate(0).is_err());
        assert!(RingBuffer::<u64>::allocate(1).is_err());
        assert!(RingBuffer::<u64>::allocate(3).is_err());
        assert!(RingBuffer::<u64>::allocate(6).is_err());

        let rb = RingBuffer::<u64>::allocate(8).unwrap();
        unsafe {
            assert_eq!(rb.as_ref().capacity(), 8);
            assert_eq!(rb.as_ref().mask(), 7);

            // Both release calls must balance the initial count of 2
            RingBuffer::release(rb);
            RingBuffer::release(rb);
        }
    }

    #[test]
    fn write_and_read_wrap_with_mask() {
        let rb = RingBuffer::<u64>::allocate(4).unwrap();

        unsafe {
            let inner = rb.as_ref();

            inner.write_slot(0, 100);
            assert_eq!(inner.read_slot(0), 100);

            // Index 4 masks back to slot 0
            inner.write_slot(4, 200);
            assert_eq!(inner.read_slot(0), 200);

            RingBuffer::release(rb);
            RingBuffer::release(rb);
        }
    }
}
