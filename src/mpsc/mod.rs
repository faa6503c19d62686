//! Multi-producer single-consumer (MPSC) bounded queue.
//!
//! Any number of producers send concurrently; a single consumer drains. Each
//! cell carries a sequence number so producers can complete out of order - a
//! fast producer is never blocked behind a slow one that claimed earlier.
//!
//! Push is lock-free: a producer may retry its claim CAS under contention,
//! but every failed attempt means another producer made progress. Pop is
//! wait-free.
//!
//! # Example
//!
//! ```
//! use lanes::mpsc;
//! use std::thread;
//!
//! let (tx, mut rx) = mpsc::channel::<u64>(64).unwrap();
//! let tx2 = tx.clone();
//!
//! let h1 = thread::spawn(move || {
//!     for i in 0..100 {
//!         while tx.try_send(i).is_err() {
//!             std::hint::spin_loop();
//!         }
//!     }
//! });
//!
//! let h2 = thread::spawn(move || {
//!     for i in 100..200 {
//!         while tx2.try_send(i).is_err() {
//!             std::hint::spin_loop();
//!         }
//!     }
//! });
//!
//! let mut received = Vec::new();
//! while received.len() < 200 {
//!     if let Ok(val) = rx.try_recv() {
//!         received.push(val);
//!     }
//! }
//!
//! h1.join().unwrap();
//! h2.join().unwrap();
//! assert_eq!(received.len(), 200);
//! ```
//!
//! # Ordering
//!
//! The consumer drains cells strictly in claim order. Two producers pushing
//! concurrently may claim in either order, but each producer's own items
//! arrive in the order it pushed them.

mod ring;

use std::fmt;
use std::ptr::NonNull;

use ring::RingBuffer;

use crate::{CapacityError, Consumer, Producer};

/// Creates a new MPSC channel with the given capacity.
///
/// The capacity must be a power of two and at least 2; anything else fails
/// with [`CapacityError`]. Unlike the SPSC ring, all `capacity` slots are
/// usable.
///
/// # Example
///
/// ```
/// use lanes::mpsc;
///
/// let (tx, rx) = mpsc::channel::<String>(128).unwrap();
/// assert_eq!(tx.capacity(), 128);
/// # drop((tx, rx));
/// ```
pub fn channel<T>(capacity: usize) -> Result<(Sender<T>, Receiver<T>), CapacityError> {
    let inner = RingBuffer::<T>::allocate(capacity)?;

    Ok((
        Sender { inner },
        Receiver {
            inner,
            local_tail: 0,
        },
    ))
}

/// The sending half of an MPSC channel.
///
/// Clone it to add producers; all clones share the same ring.
pub struct Sender<T> {
    inner: NonNull<RingBuffer<T>>,
}

// Safety: the ring buffer uses proper atomic synchronization for
// multi-producer access, so senders may move and be referenced across threads.
unsafe impl<T: Send> Send for Sender<T> {}
unsafe impl<T: Send> Sync for Sender<T> {}

impl<T> Sender<T> {
    /// Attempts to send a value into the queue.
    ///
    /// Under contention this retries the claim internally; each failed claim
    /// means another producer succeeded (lock-free, not wait-free).
    ///
    /// # Errors
    ///
    /// Returns `Err(TrySendError::Full(value))` if the queue is full.
    /// Returns `Err(TrySendError::Disconnected(value))` if the receiver has
    /// been dropped.
    ///
    /// # Example
    ///
    /// ```
    /// use lanes::mpsc::{self, TrySendError};
    ///
    /// let (tx, rx) = mpsc::channel::<u32>(2).unwrap();
    ///
    /// assert!(tx.try_send(1).is_ok());
    /// assert!(tx.try_send(2).is_ok());
    /// assert!(matches!(tx.try_send(3), Err(TrySendError::Full(3))));
    /// # drop(rx);
    /// ```
    #[inline]
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let inner = unsafe { self.inner.as_ref() };

        match inner.try_write(value) {
            Ok(()) => Ok(()),
            Err(value) => self.try_send_slow(value),
        }
    }

    #[cold]
    fn try_send_slow(&self, value: T) -> Result<(), TrySendError<T>> {
        let inner = unsafe { self.inner.as_ref() };
        if inner.is_receiver_disconnected() {
            Err(TrySendError::Disconnected(value))
        } else {
            Err(TrySendError::Full(value))
        }
    }

    /// Returns the capacity of the queue.
    #[inline]
    pub fn capacity(&self) -> usize {
        unsafe { self.inner.as_ref().capacity() }
    }

    /// Returns `true` if the receiver has been dropped.
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        unsafe { self.inner.as_ref().is_receiver_disconnected() }
    }

    /// Returns the number of unread elements. Advisory snapshot.
    #[inline]
    pub fn len(&self) -> usize {
        unsafe { self.inner.as_ref().advisory_len() }
    }

    /// Returns `true` if the queue is empty. Advisory snapshot.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the queue is full. Advisory snapshot.
    #[inline]
    pub fn is_full(&self) -> bool {
        unsafe { self.inner.as_ref().advisory_full() }
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        let inner = unsafe { self.inner.as_ref() };
        inner.add_sender();
        RingBuffer::acquire(self.inner);

        Self { inner: self.inner }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        unsafe {
            self.inner.as_ref().remove_sender();
            RingBuffer::release(self.inner);
        }
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("capacity", &self.capacity())
            .field("disconnected", &self.is_disconnected())
            .finish_non_exhaustive()
    }
}

impl<T> Producer<T> for Sender<T> {
    type Error = TrySendError<T>;

    #[inline]
    fn try_send(&mut self, value: T) -> Result<(), Self::Error> {
        Sender::try_send(self, value)
    }

    fn capacity(&self) -> usize {
        Sender::capacity(self)
    }

    fn len(&self) -> usize {
        Sender::len(self)
    }

    fn is_full(&self) -> bool {
        Sender::is_full(self)
    }
}

/// The receiving half of an MPSC channel.
///
/// Cannot be cloned - there is exactly one consumer.
pub struct Receiver<T> {
    inner: NonNull<RingBuffer<T>>,

    /// Our drain position. We are the only reader, so no atomic needed.
    local_tail: usize,
}

// Safety: Receiver can move to another thread but cannot be shared (not Sync).
unsafe impl<T: Send> Send for Receiver<T> {}

impl<T> Receiver<T> {
    /// Attempts to receive a value from the queue.
    ///
    /// # Errors
    ///
    /// Returns `Err(TryRecvError::Empty)` if no message is ready. This covers
    /// both a truly empty ring and a slot that a producer claimed but has not
    /// finished publishing yet.
    ///
    /// Returns `Err(TryRecvError::Disconnected)` if every sender has been
    /// dropped AND the ring is fully drained (including in-flight claims).
    ///
    /// # Example
    ///
    /// ```
    /// use lanes::mpsc::{self, TryRecvError};
    ///
    /// let (tx, mut rx) = mpsc::channel::<u32>(8).unwrap();
    ///
    /// assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    ///
    /// tx.try_send(42).unwrap();
    /// assert_eq!(rx.try_recv().unwrap(), 42);
    /// ```
    #[inline]
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        let inner = unsafe { self.inner.as_ref() };

        // Safety: we are the only consumer
        match unsafe { inner.try_read(self.local_tail) } {
            Some(value) => {
                self.local_tail = self.local_tail.wrapping_add(1);
                Ok(value)
            }
            None => self.try_recv_slow(inner),
        }
    }

    #[cold]
    fn try_recv_slow(&self, inner: &RingBuffer<T>) -> Result<T, TryRecvError> {
        if inner.sender_count() == 0 {
            // All senders gone; a claimed-but-unpublished cell still counts as
            // in flight, so compare against the claim counter
            if self.local_tail == inner.load_head() {
                Err(TryRecvError::Disconnected)
            } else {
                Err(TryRecvError::Empty)
            }
        } else {
            Err(TryRecvError::Empty)
        }
    }

    /// Returns the capacity of the queue.
    #[inline]
    pub fn capacity(&self) -> usize {
        unsafe { self.inner.as_ref().capacity() }
    }

    /// Returns `true` if all senders have been dropped.
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        unsafe { self.inner.as_ref().sender_count() == 0 }
    }

    /// Returns the number of unread elements. Advisory snapshot.
    #[inline]
    pub fn len(&self) -> usize {
        unsafe { self.inner.as_ref().advisory_len() }
    }

    /// Returns `true` if the queue is empty. Advisory snapshot.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the queue is full. Advisory snapshot.
    #[inline]
    pub fn is_full(&self) -> bool {
        unsafe { self.inner.as_ref().advisory_full() }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        unsafe {
            self.inner.as_ref().set_receiver_disconnected();
            RingBuffer::release(self.inner);
        }
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("capacity", &self.capacity())
            .field("disconnected", &self.is_disconnected())
            .finish_non_exhaustive()
    }
}

impl<T> Consumer<T> for Receiver<T> {
    type Error = TryRecvError;

    #[inline]
    fn try_recv(&mut self) -> Result<T, Self::Error> {
        Receiver::try_recv(self)
    }

    fn capacity(&self) -> usize {
        Receiver::capacity(self)
    }

    fn len(&self) -> usize {
        Receiver::len(self)
    }

    fn is_full(&self) -> bool {
        Receiver::is_full(self)
    }
}

/// Error returned by [`Sender::try_send`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum TrySendError<T> {
    /// The queue is full. Contains the value that couldn't be sent.
    Full(T),
    /// The receiver has been dropped. Contains the value that couldn't be sent.
    Disconnected(T),
}

impl<T> TrySendError<T> {
    /// Returns the value that couldn't be sent.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(val) | Self::Disconnected(val) => val,
        }
    }

    /// Returns `true` if this error is the `Full` variant.
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }

    /// Returns `true` if this error is the `Disconnected` variant.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected(_))
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => write!(f, "queue is full"),
            Self::Disconnected(_) => write!(f, "receiver disconnected"),
        }
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self, f)
    }
}

impl<T> std::error::Error for TrySendError<T> {}

/// Error returned by [`Receiver::try_recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    /// The queue is empty.
    Empty,
    /// All senders have been dropped and the queue is empty.
    Disconnected,
}

impl TryRecvError {
    /// Returns `true` if this error is the `Empty` variant.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns `true` if this error is the `Disconnected` variant.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

impl fmt::Display for TryRecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "queue is empty"),
            Self::Disconnected => write!(f, "all senders disconnected"),
        }
    }
}

impl std::error::Error for TryRecvError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    // ============================================================================
    // Construction
    // ============================================================================

    #[test]
    fn invalid_capacity_is_rejected() {
        for capacity in [0usize, 1, 3, 5, 6, 7] {
            assert_eq!(
                channel::<u64>(capacity).err(),
                Some(crate::CapacityError(capacity))
            );
        }
        for capacity in [2usize, 4, 8, 16, 1024] {
            assert!(channel::<u64>(capacity).is_ok());
        }
    }

    #[test]
    fn fresh_queue_is_empty() {
        let (tx, mut rx) = channel::<u64>(8).unwrap();

        assert!(tx.is_empty());
        assert_eq!(tx.len(), 0);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    // ============================================================================
    // Basic operations
    // ============================================================================

    #[test]
    fn basic_send_recv() {
        let (tx, mut rx) = channel::<u64>(8).unwrap();

        tx.try_send(1).unwrap();
        tx.try_send(2).unwrap();
        tx.try_send(3).unwrap();

        assert_eq!(rx.try_recv().unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap(), 2);
        assert_eq!(rx.try_recv().unwrap(), 3);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn queue_full_at_capacity() {
        let (tx, mut rx) = channel::<u64>(4).unwrap();

        tx.try_send(1).unwrap();
        tx.try_send(2).unwrap();
        tx.try_send(3).unwrap();
        tx.try_send(4).unwrap();

        assert!(tx.is_full());
        assert!(matches!(tx.try_send(5), Err(TrySendError::Full(5))));

        assert_eq!(rx.try_recv().unwrap(), 1);
        tx.try_send(5).unwrap();
    }

    #[test]
    fn fill_drain_balances() {
        let (tx, mut rx) = channel::<u64>(16).unwrap();

        for round in 0..50u64 {
            for i in 0..16 {
                tx.try_send(round * 16 + i).unwrap();
            }
            for i in 0..16 {
                assert_eq!(rx.try_recv().unwrap(), round * 16 + i);
            }
            assert!(rx.is_empty());
        }
    }

    // ============================================================================
    // Disconnection
    // ============================================================================

    #[test]
    fn sender_disconnect_after_drain() {
        let (tx, mut rx) = channel::<u64>(8).unwrap();

        tx.try_send(1).unwrap();
        tx.try_send(2).unwrap();

        drop(tx);

        assert_eq!(rx.try_recv().unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap(), 2);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[test]
    fn receiver_disconnect_on_full() {
        let (tx, rx) = channel::<u64>(4).unwrap();

        drop(rx);

        // Disconnect surfaces on the full slow path
        tx.try_send(1).unwrap();
        tx.try_send(2).unwrap();
        tx.try_send(3).unwrap();
        tx.try_send(4).unwrap();

        assert!(matches!(tx.try_send(5), Err(TrySendError::Disconnected(5))));
    }

    #[test]
    fn all_senders_must_drop() {
        let (tx1, mut rx) = channel::<u64>(8).unwrap();
        let tx2 = tx1.clone();

        tx1.try_send(1).unwrap();

        drop(tx1);
        assert!(!rx.is_disconnected());

        drop(tx2);
        assert_eq!(rx.try_recv().unwrap(), 1);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[test]
    fn drop_channel_drops_remaining_items() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let drop_count = Arc::new(AtomicUsize::new(0));

        struct DropCounter(Arc<AtomicUsize>);
        impl Drop for DropCounter {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (tx, mut rx) = channel::<DropCounter>(8).unwrap();

        tx.try_send(DropCounter(Arc::clone(&drop_count))).unwrap();
        tx.try_send(DropCounter(Arc::clone(&drop_count))).unwrap();
        tx.try_send(DropCounter(Arc::clone(&drop_count))).unwrap();

        let _ = rx.try_recv().unwrap();
        assert_eq!(drop_count.load(Ordering::SeqCst), 1);

        drop(rx);
        drop(tx);

        assert_eq!(drop_count.load(Ordering::SeqCst), 3);
    }

    // ============================================================================
    // Multi-producer
    // ============================================================================

    #[test]
    fn fan_in_multiset_matches() {
        let (tx, mut rx) = channel::<u64>(64).unwrap();

        let handles: Vec<_> = (0..3u64)
            .map(|pid| {
                let tx = tx.clone();
                thread::spawn(move || {
                    for i in 0..5 {
                        while tx.try_send(pid * 100 + i).is_err() {
                            std::hint::spin_loop();
                        }
                    }
                })
            })
            .collect();

        drop(tx);

        let mut seen = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(v) => seen.push(v),
                Err(TryRecvError::Empty) => std::hint::spin_loop(),
                Err(TryRecvError::Disconnected) => break,
            }
        }

        for h in handles {
            h.join().unwrap();
        }

        seen.sort_unstable();
        assert_eq!(
            seen,
            vec![0, 1, 2, 3, 4, 100, 101, 102, 103, 104, 200, 201, 202, 203, 204]
        );
    }

    #[test]
    fn per_producer_order_is_preserved() {
        const PRODUCERS: u64 = 4;
        const PER_PRODUCER: u64 = 10_000;

        let (tx, mut rx) = channel::<u64>(64).unwrap();

        let handles: Vec<_> = (0..PRODUCERS)
            .map(|pid| {
                let tx = tx.clone();
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        while tx.try_send(pid * PER_PRODUCER + i).is_err() {
                            std::hint::spin_loop();
                        }
                    }
                })
            })
            .collect();

        drop(tx);

        let mut next_expected = [0u64; PRODUCERS as usize];
        let mut total = 0u64;
        loop {
            match rx.try_recv() {
                Ok(v) => {
                    let pid = (v / PER_PRODUCER) as usize;
                    let seq = v % PER_PRODUCER;
                    assert_eq!(seq, next_expected[pid], "producer {pid} out of order");
                    next_expected[pid] += 1;
                    total += 1;
                }
                Err(TryRecvError::Empty) => std::hint::spin_loop(),
                Err(TryRecvError::Disconnected) => break,
            }
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(total, PRODUCERS * PER_PRODUCER);
    }

    #[test]
    fn no_message_loss_on_disconnect() {
        // Messages in flight while senders disconnect must all arrive
        for _ in 0..100 {
            let (tx, mut rx) = channel::<u64>(64).unwrap();
            const N: usize = 1000;
            const PRODUCERS: usize = 4;

            let handles: Vec<_> = (0..PRODUCERS)
                .map(|_| {
                    let tx = tx.clone();
                    thread::spawn(move || {
                        for i in 0..N {
                            while tx.try_send(i as u64).is_err() {
                                std::hint::spin_loop();
                            }
                        }
                    })
                })
                .collect();

            drop(tx);

            let mut count = 0;
            loop {
                match rx.try_recv() {
                    Ok(_) => count += 1,
                    Err(TryRecvError::Empty) => std::hint::spin_loop(),
                    Err(TryRecvError::Disconnected) => break,
                }
            }

            for h in handles {
                h.join().unwrap();
            }

            assert_eq!(count, N * PRODUCERS, "lost messages!");
        }
    }
}
