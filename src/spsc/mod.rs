//! Single-producer single-consumer (SPSC) bounded queue.
//!
//! The fastest variant: two cache-line-isolated cursors, acquire/release
//! pairing only, no compare-and-swap anywhere. Both `try_send` and `try_recv`
//! complete in a bounded number of the calling thread's own steps.
//!
//! One slot is reserved to tell "full" apart from "empty", so a queue built
//! with capacity `C` holds at most `C - 1` elements.
//!
//! # Example
//!
//! ```
//! use lanes::spsc;
//!
//! let (mut tx, mut rx) = spsc::channel::<u64>(8).unwrap();
//!
//! tx.try_send(1).unwrap();
//! tx.try_send(2).unwrap();
//!
//! assert_eq!(rx.try_recv().unwrap(), 1);
//! assert_eq!(rx.try_recv().unwrap(), 2);
//! ```
//!
//! # Disconnection
//!
//! Dropping either end disconnects the channel. The survivor observes this on
//! its slow path:
//!
//! - [`Sender::try_send`] returns [`TrySendError::Disconnected`] once the
//!   receiver is gone and the ring is full
//! - [`Receiver::try_recv`] returns [`TryRecvError::Disconnected`] once the
//!   sender is gone AND the ring is drained
//!
//! # Performance Notes
//!
//! Each side keeps a private snapshot of the opposite cursor and only
//! refreshes it with an acquire load when the ring looks full/empty, so the
//! hot path is one slot access plus one release store.

mod ring;

use std::fmt;
use std::ptr::NonNull;

use ring::RingBuffer;

use crate::{CapacityError, Consumer, Producer};

/// Creates a new SPSC channel with the given capacity.
///
/// The capacity must be a power of two and at least 2; anything else fails
/// with [`CapacityError`]. The queue stores at most `capacity - 1` elements.
///
/// # Example
///
/// ```
/// use lanes::spsc;
///
/// let (tx, rx) = spsc::channel::<String>(16).unwrap();
/// assert_eq!(tx.capacity(), 16);
///
/// // Not a power of two
/// assert!(spsc::channel::<String>(100).is_err());
/// # drop((tx, rx));
/// ```
pub fn channel<T>(capacity: usize) -> Result<(Sender<T>, Receiver<T>), CapacityError> {
    let inner = RingBuffer::<T>::allocate(capacity)?;

    Ok((
        Sender {
            inner,
            local_write: 0,
            cached_read: 0,
        },
        Receiver {
            inner,
            local_read: 0,
            cached_write: 0,
        },
    ))
}

/// The sending half of an SPSC channel.
///
/// Owned by a single thread at a time (`Send` but not `Sync`).
pub struct Sender<T> {
    inner: NonNull<RingBuffer<T>>,

    /// Our write cursor (authoritative, only we advance it).
    local_write: usize,
    /// Snapshot of the consumer's cursor, refreshed only when the ring
    /// appears full.
    cached_read: usize,
}

// Safety: Sender can move to another thread but cannot be shared (not Sync).
// The ring buffer is properly synchronized.
unsafe impl<T: Send> Send for Sender<T> {}

impl<T> Sender<T> {
    /// Attempts to send a value into the queue.
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
    /// use lanes::spsc::{self, TrySendError};
    ///
    /// let (mut tx, rx) = spsc::channel::<u32>(4).unwrap();
    ///
    /// assert!(tx.try_send(1).is_ok());
    /// assert!(tx.try_send(2).is_ok());
    /// assert!(tx.try_send(3).is_ok());
    ///
    /// // One slot stays reserved: capacity 4 holds 3 elements
    /// assert!(matches!(tx.try_send(4), Err(TrySendError::Full(4))));
    /// # drop(rx);
    /// ```
    #[inline]
    pub fn try_send(&mut self, value: T) -> Result<(), TrySendError<T>> {
        // Safety: valid pointer from construction, and we are the only producer
        let inner = unsafe { self.inner.as_ref() };

        let write = self.local_write;
        let next = (write + 1) & inner.mask();

        // Fast path: check the cached consumer cursor (no atomic load)
        if next != self.cached_read {
            // Safety: slot `write` is unoccupied and ours to fill
            unsafe {
                inner.write_slot(write, value);
            }
            inner.publish_write_idx(next);
            self.local_write = next;
            return Ok(());
        }

        self.try_send_slow(next, value)
    }

    #[cold]
    fn try_send_slow(&mut self, next: usize, value: T) -> Result<(), TrySendError<T>> {
        let inner = unsafe { self.inner.as_ref() };

        // Refresh the consumer cursor snapshot
        let read = inner.load_read_idx();
        self.cached_read = read;

        if next != read {
            // Safety: slot `local_write` is unoccupied and ours to fill
            unsafe {
                inner.write_slot(self.local_write, value);
            }
            inner.publish_write_idx(next);
            self.local_write = next;
            return Ok(());
        }

        // Truly full - check whether the receiver is still there
        if inner.is_receiver_disconnected() {
            return Err(TrySendError::Disconnected(value));
        }

        Err(TrySendError::Full(value))
    }

    /// Returns the capacity of the queue.
    ///
    /// The queue holds at most `capacity() - 1` elements.
    #[inline]
    pub fn capacity(&self) -> usize {
        unsafe { self.inner.as_ref().capacity() }
    }

    /// Returns `true` if the receiver has been dropped.
    ///
    /// May be stale: the receiver could disappear right after this returns
    /// `false`.
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

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        unsafe {
            self.inner.as_ref().set_sender_disconnected();
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

/// The receiving half of an SPSC channel.
///
/// Owned by a single thread at a time (`Send` but not `Sync`).
pub struct Receiver<T> {
    inner: NonNull<RingBuffer<T>>,

    /// Our read cursor (authoritative, only we advance it).
    local_read: usize,
    /// Snapshot of the producer's cursor, refreshed only when the ring
    /// appears empty.
    cached_write: usize,
}

// Safety: Receiver can move to another thread but cannot be shared (not Sync).
// The ring buffer is properly synchronized.
unsafe impl<T: Send> Send for Receiver<T> {}

impl<T> Receiver<T> {
    /// Attempts to receive a value from the queue.
    ///
    /// # Errors
    ///
    /// Returns `Err(TryRecvError::Empty)` if the queue is empty.
    /// Returns `Err(TryRecvError::Disconnected)` if the sender has been
    /// dropped AND the queue is drained.
    ///
    /// # Example
    ///
    /// ```
    /// use lanes::spsc::{self, TryRecvError};
    ///
    /// let (mut tx, mut rx) = spsc::channel::<u32>(8).unwrap();
    ///
    /// assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    ///
    /// tx.try_send(42).unwrap();
    /// assert_eq!(rx.try_recv().unwrap(), 42);
    /// ```
    #[inline]
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        // Safety: valid pointer from construction, and we are the only consumer
        let inner = unsafe { self.inner.as_ref() };

        let read = self.local_read;

        // Fast path: check the cached producer cursor (no atomic load)
        if read != self.cached_write {
            // Safety: slot `read` holds a published value and is ours to take
            let value = unsafe { inner.read_slot(read) };
            inner.publish_read_idx((read + 1) & inner.mask());
            self.local_read = (read + 1) & inner.mask();
            return Ok(value);
        }

        self.try_recv_slow(read)
    }

    #[cold]
    fn try_recv_slow(&mut self, read: usize) -> Result<T, TryRecvError> {
        let inner = unsafe { self.inner.as_ref() };

        // Refresh the producer cursor snapshot
        let write = inner.load_write_idx();
        self.cached_write = write;

        if read != write {
            // Safety: slot `read` holds a published value and is ours to take
            let value = unsafe { inner.read_slot(read) };
            inner.publish_read_idx((read + 1) & inner.mask());
            self.local_read = (read + 1) & inner.mask();
            return Ok(value);
        }

        // Truly empty - check whether the sender is still there
        if inner.is_sender_disconnected() {
            return Err(TryRecvError::Disconnected);
        }

        Err(TryRecvError::Empty)
    }

    /// Returns the capacity of the queue.
    #[inline]
    pub fn capacity(&self) -> usize {
        unsafe { self.inner.as_ref().capacity() }
    }

    /// Returns `true` if the sender has been dropped.
    ///
    /// May be stale: the sender could disappear right after this returns
    /// `false`.
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        unsafe { self.inner.as_ref().is_sender_disconnected() }
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
    /// The sender has been dropped and the queue is empty.
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
            Self::Disconnected => write!(f, "sender disconnected"),
        }
    }
}

impl std::error::Error for TryRecvError {}
