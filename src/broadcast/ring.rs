//! The underlying ring buffer storage for broadcast queues.
//!
//! Unlike the other rings, nothing here is ever consumed: the producer
//! overwrites every slot once per lap and each entry carries the lap version
//! it was written on, so a subscriber can tell fresh data from data that has
//! already been overwritten out from under it.

use std::cell::UnsafeCell;
use std::mem::{ManuallyDrop, MaybeUninit};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use crate::CapacityError;

/// An entry in the broadcast ring.
///
/// The version is the lap number the data was written on. A subscriber
/// expecting lap `v` that finds `v + 1` has been lapped by the producer.
#[repr(C)]
struct Entry<T> {
    version: AtomicU32,
    data: UnsafeCell<MaybeUninit<T>>,
}

/// The backing storage for a broadcast queue.
///
/// The producer owns a single free-running position counter. The ring index
/// is `pos & mask` and the lap version is `pos >> log2(capacity)`, so one
/// atomic load yields a consistent (index, version) snapshot - which is what
/// lets a lapped subscriber re-synchronise to the live edge.
///
/// Subscribers keep their cursors entirely in their own handles; the ring
/// never learns where they are, and the producer never waits for them.
#[repr(C)]
pub(crate) struct RingBuffer<T> {
    /// Producer's free-running publish position.
    write_pos: CachePadded<AtomicUsize>,

    buffer: *mut Entry<T>,

    capacity: usize,
    mask: usize,
    /// log2(capacity), for deriving the lap version from a position.
    shift: u32,

    ref_count: AtomicUsize,

    /// Set when the sender is dropped.
    sender_disconnected: AtomicBool,
    /// Number of live subscriber handles.
    receiver_count: AtomicUsize,
}

unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

// The Copy requirement on the element lives at the channel surface; the ring
// itself only relies on it implicitly (entries are duplicated on read and
// never dropped).
impl<T> RingBuffer<T> {
    /// Allocates a new ring buffer with the given capacity.
    ///
    /// Fails unless the capacity is a power of two and at least 2. Initial
    /// ref_count is 2 (one sender + one receiver).
    pub(crate) fn allocate(capacity: usize) -> Result<NonNull<Self>, CapacityError> {
        let capacity = CapacityError::check(capacity)?;

        let buffer = ManuallyDrop::new(Vec::<Entry<T>>::with_capacity(capacity)).as_mut_ptr();

        // Entries start at version 0; they are unreadable anyway until the
        // publish position moves past them
        for i in 0..capacity {
            unsafe {
                let entry = buffer.add(i);
                ptr::addr_of_mut!((*entry).version).write(AtomicU32::new(0));
            }
        }

        let rb = Box::new(Self {
            write_pos: CachePadded::new(AtomicUsize::new(0)),
            buffer,
            capacity,
            mask: capacity - 1,
            shift: capacity.trailing_zeros(),
            ref_count: AtomicUsize::new(2),
            sender_disconnected: AtomicBool::new(false),
            receiver_count: AtomicUsize::new(1),
        });

        Ok(unsafe { NonNull::new_unchecked(Box::into_raw(rb)) })
    }

    // === Accessors ===

    #[inline]
    fn entry_ptr(&self, pos: usize) -> *mut Entry<T> {
        unsafe { self.buffer.add(pos & self.mask) }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub(crate) fn mask(&self) -> usize {
        self.mask
    }

    /// Returns the lap version for an absolute position.
    #[inline]
    pub(crate) fn lap_of(&self, pos: usize) -> u32 {
        (pos >> self.shift) as u32
    }

    // === Producer operations ===

    /// Writes an entry at the given position.
    ///
    /// The data lands first, then the entry version; the caller publishes the
    /// position afterwards, so a subscriber that acquires the new position
    /// sees the entry complete.
    ///
    /// # Safety
    ///
    /// Must only be called by the single producer, with `pos` equal to its
    /// current (unpublished) position.
    #[inline]
    pub(crate) unsafe fn write_entry(&self, pos: usize, value: T) {
        let entry = self.entry_ptr(pos);
        unsafe {
            (*entry).data.get().cast::<T>().write(value);
            (*entry).version.store(self.lap_of(pos), Ordering::Release);
        }
    }

    /// Publishes the producer position after a slot write.
    #[inline]
    pub(crate) fn publish(&self, pos: usize) {
        self.write_pos.store(pos, Ordering::Release);
    }

    // === Subscriber operations ===

    /// Loads the producer position (subscriber side, acquire).
    #[inline]
    pub(crate) fn load_write_pos(&self) -> usize {
        self.write_pos.load(Ordering::Acquire)
    }

    /// Attempts to copy out the entry at `pos`.
    ///
    /// Returns `None` if the entry's lap no longer matches `pos`, i.e. the
    /// producer has overwritten this slot since the subscriber should have
    /// read it.
    ///
    /// # Safety
    ///
    /// `pos` must be strictly below a previously acquired producer position,
    /// so the entry has been written at least once.
    #[inline]
    pub(crate) unsafe fn read_entry(&self, pos: usize) -> Option<T> {
        let entry = self.entry_ptr(pos);
        let version = unsafe { (*entry).version.load(Ordering::Acquire) };

        if version != self.lap_of(pos) {
            return None;
        }

        // Copy, never move: other subscribers still need this slot. T: Copy
        // keeps the duplicate sound and the slot free of drop obligations.
        Some(unsafe { (*entry).data.get().cast::<T>().read() })
    }

    // === Advisory observations (relaxed, may be stale) ===

    #[inline]
    pub(crate) fn relaxed_write_pos(&self) -> usize {
        self.write_pos.load(Ordering::Relaxed)
    }

    // === Liveness ===

    #[inline]
    pub(crate) fn is_sender_disconnected(&self) -> bool {
        self.sender_disconnected.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_sender_disconnected(&self) {
        self.sender_disconnected.store(true, Ordering::Release);
    }

    #[inline]
    pub(crate) fn add_receiver(&self) {
        self.receiver_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn remove_receiver(&self) {
        self.receiver_count.fetch_sub(1, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn receiver_count(&self) -> usize {
        self.receiver_count.load(Ordering::Relaxed)
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
            // T: Copy means no entry needs dropping
            unsafe {
                let _ = Vec::from_raw_parts(inner.buffer, 0, inner.capacity);
                let _ = Box::from_raw(this.as_ptr());
            }
        }
    }
}
