//! Single-producer multi-consumer (SPMC) broadcast queue.
//!
//! Subscribers do not consume - they observe. The producer never waits for
//! anyone and overwrites each slot once per lap; every subscriber tracks its
//! own cursor and sees the full stream in production order, provided it never
//! falls a whole lap behind.
//!
//! A subscriber that does get lapped is **overlapped**: its next
//! [`Receiver::try_recv`] fails with [`TryRecvError::Overlapped`] and the
//! handle stays unusable until [`Receiver::respawn`] jumps it to the live
//! edge. Items between the overlap and the respawn are lost by design - this
//! is the right trade for market-data style fan-out, where a laggard wants
//! the current picture, not a stale backlog.
//!
//! Elements must be `Copy`: every subscriber reads the same slot, and a slot
//! may be overwritten mid-read once the reader is a lap behind, so payloads
//! have to be plain data.
//!
//! # Example
//!
//! ```
//! use lanes::broadcast;
//!
//! let (mut tx, mut rx1) = broadcast::channel::<u64>(8).unwrap();
//! let mut rx2 = rx1.clone();
//!
//! tx.send(1).unwrap();
//! tx.send(2).unwrap();
//!
//! // Both subscribers see the whole stream
//! assert_eq!(rx1.try_recv().unwrap(), 1);
//! assert_eq!(rx1.try_recv().unwrap(), 2);
//! assert_eq!(rx2.try_recv().unwrap(), 1);
//! assert_eq!(rx2.try_recv().unwrap(), 2);
//! ```
//!
//! # Subscribing late
//!
//! `Receiver::clone` duplicates the cursor of the handle it was cloned from.
//! Clone the untouched initial receiver to replay from the start of the
//! stream, or `clone` and then [`respawn`](Receiver::respawn) to join at the
//! live edge.

mod ring;

use std::fmt;
use std::ptr::NonNull;

use crossbeam_utils::CachePadded;

use ring::RingBuffer;

use crate::{CapacityError, Consumer, Producer};

/// Creates a new broadcast channel with the given capacity.
///
/// The capacity must be a power of two and at least 2; anything else fails
/// with [`CapacityError`]. Clone the [`Receiver`] for additional subscribers.
///
/// # Example
///
/// ```
/// use lanes::broadcast;
///
/// let (tx, rx) = broadcast::channel::<u64>(256).unwrap();
/// assert_eq!(tx.capacity(), 256);
/// # drop((tx, rx));
/// ```
pub fn channel<T: Copy>(capacity: usize) -> Result<(Sender<T>, Receiver<T>), CapacityError> {
    let inner = RingBuffer::<T>::allocate(capacity)?;

    Ok((
        Sender {
            inner,
            local_pos: CachePadded::new(0),
        },
        Receiver {
            inner,
            cursor: CachePadded::new(ReadCursor {
                pos: 0,
                overlapped: false,
            }),
        },
    ))
}

/// The publishing half of a broadcast channel.
///
/// There is exactly one producer; the handle is `Send` but not `Clone`.
pub struct Sender<T> {
    inner: NonNull<RingBuffer<T>>,

    /// Our publish position (authoritative, only we advance it). Padded so a
    /// handle sitting next to a subscriber's in memory never shares its cache
    /// line.
    local_pos: CachePadded<usize>,
}

// Safety: Sender can move to another thread but cannot be shared (not Sync).
unsafe impl<T: Send> Send for Sender<T> {}

impl<T: Copy> Sender<T> {
    /// Publishes a value, overwriting the slot written one lap ago.
    ///
    /// Never fails with "full": a broadcast producer does not wait for
    /// subscribers. Subscribers that cannot keep up detect the overwrite on
    /// their side as an overlap.
    ///
    /// # Errors
    ///
    /// Returns `Err(SendError::Disconnected(value))` once every subscriber
    /// handle has been dropped.
    #[inline]
    pub fn send(&mut self, value: T) -> Result<(), SendError<T>> {
        let inner = unsafe { self.inner.as_ref() };

        if inner.receiver_count() == 0 {
            return Err(SendError::Disconnected(value));
        }

        let pos = *self.local_pos;

        // Entry first, position second: a subscriber that acquires the new
        // position must find the slot complete
        unsafe {
            inner.write_entry(pos, value);
        }
        let next = pos.wrapping_add(1);
        inner.publish(next);
        *self.local_pos = next;

        Ok(())
    }

    /// Returns the capacity of the ring.
    #[inline]
    pub fn capacity(&self) -> usize {
        unsafe { self.inner.as_ref().capacity() }
    }

    /// Returns `true` if every subscriber handle has been dropped.
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        unsafe { self.inner.as_ref().receiver_count() == 0 }
    }

    /// Returns the number of live entries in the ring (at most the
    /// capacity). Advisory snapshot.
    #[inline]
    pub fn len(&self) -> usize {
        let inner = unsafe { self.inner.as_ref() };
        inner.relaxed_write_pos().min(inner.capacity())
    }

    /// Returns `true` if nothing has been published yet. Advisory snapshot.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` once every slot holds a live entry - the steady state
    /// after the first lap, when each publish overwrites. Advisory snapshot.
    #[inline]
    pub fn is_full(&self) -> bool {
        let inner = unsafe { self.inner.as_ref() };
        inner.relaxed_write_pos() >= inner.capacity()
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

impl<T: Copy> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("capacity", &self.capacity())
            .field("disconnected", &self.is_disconnected())
            .finish_non_exhaustive()
    }
}

impl<T: Copy> Producer<T> for Sender<T> {
    type Error = SendError<T>;

    #[inline]
    fn try_send(&mut self, value: T) -> Result<(), Self::Error> {
        Sender::send(self, value)
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

/// A subscriber's private cursor state.
struct ReadCursor {
    /// Free-running read position, never shared with the ring.
    pos: usize,
    /// Set when the producer lapped us; cleared by `respawn`.
    overlapped: bool,
}

/// A subscriber handle on a broadcast channel.
///
/// Each receiver owns a private cursor; clones observe the stream
/// independently from the position they were cloned at. A handle is `Send`
/// but must be driven by one thread at a time.
pub struct Receiver<T> {
    inner: NonNull<RingBuffer<T>>,

    /// Padded so adjacent subscriber handles never share a cache line.
    cursor: CachePadded<ReadCursor>,
}

// Safety: Receiver can move to another thread but cannot be shared (not Sync).
unsafe impl<T: Send> Send for Receiver<T> {}

impl<T: Copy> Receiver<T> {
    /// Attempts to observe the next value in the stream.
    ///
    /// # Errors
    ///
    /// Returns `Err(TryRecvError::Empty)` when this subscriber has caught up
    /// with the producer.
    ///
    /// Returns `Err(TryRecvError::Overlapped(index))` when the producer has
    /// overwritten the slot this subscriber would read next (it fell at least
    /// one full lap behind). The handle then refuses every `try_recv` until
    /// [`respawn`](Self::respawn) is called; `index` is the stale ring slot.
    ///
    /// Returns `Err(TryRecvError::Disconnected)` when the producer has been
    /// dropped and the stream is fully observed.
    #[inline]
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        let inner = unsafe { self.inner.as_ref() };

        if self.cursor.overlapped {
            return Err(TryRecvError::Overlapped(self.cursor.pos & inner.mask()));
        }

        let pos = self.cursor.pos;
        let write_pos = inner.load_write_pos();

        if pos == write_pos {
            return self.caught_up();
        }

        // Safety: pos < write_pos, so the entry has been written
        match unsafe { inner.read_entry(pos) } {
            Some(value) => {
                self.cursor.pos = pos.wrapping_add(1);
                Ok(value)
            }
            None => {
                // The slot already belongs to a newer lap
                self.cursor.overlapped = true;
                Err(TryRecvError::Overlapped(pos & inner.mask()))
            }
        }
    }

    #[cold]
    fn caught_up(&self) -> Result<T, TryRecvError> {
        let inner = unsafe { self.inner.as_ref() };
        if inner.is_sender_disconnected() {
            Err(TryRecvError::Disconnected)
        } else {
            Err(TryRecvError::Empty)
        }
    }

    /// Re-synchronises an overlapped subscriber to the producer's live edge.
    ///
    /// The cursor jumps to the producer's current position: everything
    /// published before the respawn is skipped, and the next `try_recv`
    /// returns the next value published (or `Empty` if the producer has gone
    /// quiet). Calling this on a healthy subscriber is allowed and likewise
    /// skips to the live edge.
    pub fn respawn(&mut self) {
        let inner = unsafe { self.inner.as_ref() };
        self.cursor.pos = inner.load_write_pos();
        self.cursor.overlapped = false;
    }

    /// Returns `true` if this subscriber has been lapped and must
    /// [`respawn`](Self::respawn) before observing more values.
    #[inline]
    pub fn is_overlapped(&self) -> bool {
        self.cursor.overlapped
    }

    /// Returns the capacity of the ring.
    #[inline]
    pub fn capacity(&self) -> usize {
        unsafe { self.inner.as_ref().capacity() }
    }

    /// Returns `true` if the producer has been dropped.
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        unsafe { self.inner.as_ref().is_sender_disconnected() }
    }

    /// Returns this subscriber's backlog: values published but not yet
    /// observed here. Exceeds the capacity once the subscriber has been
    /// lapped. Advisory snapshot.
    #[inline]
    pub fn len(&self) -> usize {
        let inner = unsafe { self.inner.as_ref() };
        inner.relaxed_write_pos().wrapping_sub(self.cursor.pos)
    }

    /// Returns `true` if this subscriber has caught up. Advisory snapshot.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the backlog has reached the ring capacity - the
    /// next publish overwrites unobserved data. Advisory snapshot.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }
}

impl<T: Copy> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        let inner = unsafe { self.inner.as_ref() };
        inner.add_receiver();
        RingBuffer::acquire(self.inner);

        Self {
            inner: self.inner,
            cursor: CachePadded::new(ReadCursor {
                pos: self.cursor.pos,
                overlapped: self.cursor.overlapped,
            }),
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        unsafe {
            self.inner.as_ref().remove_receiver();
            RingBuffer::release(self.inner);
        }
    }
}

impl<T: Copy> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("capacity", &self.capacity())
            .field("overlapped", &self.cursor.overlapped)
            .field("backlog", &self.len())
            .finish_non_exhaustive()
    }
}

impl<T: Copy> Consumer<T> for Receiver<T> {
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

/// Error returned by [`Sender::send`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum SendError<T> {
    /// Every subscriber handle has been dropped. Contains the unsent value.
    Disconnected(T),
}

impl<T> SendError<T> {
    /// Returns the value that couldn't be sent.
    pub fn into_inner(self) -> T {
        match self {
            Self::Disconnected(val) => val,
        }
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected(_) => write!(f, "all subscribers disconnected"),
        }
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self, f)
    }
}

impl<T> std::error::Error for SendError<T> {}

/// Error returned by [`Receiver::try_recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    /// The subscriber has observed everything published so far.
    Empty,
    /// The producer lapped this subscriber; the payload is the ring index of
    /// the slot whose data was overwritten. The handle is unusable until
    /// [`Receiver::respawn`].
    Overlapped(usize),
    /// The producer has been dropped and the stream is fully observed.
    Disconnected,
}

impl TryRecvError {
    /// Returns `true` if this error is the `Empty` variant.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns `true` if this error is the `Overlapped` variant.
    pub fn is_overlapped(&self) -> bool {
        matches!(self, Self::Overlapped(_))
    }

    /// Returns `true` if this error is the `Disconnected` variant.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

impl fmt::Display for TryRecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "no new values"),
            Self::Overlapped(index) => {
                write!(f, "subscriber overlapped at ring index {index}")
            }
            Self::Disconnected => write!(f, "producer disconnected"),
        }
    }
}

impl std::error::Error for TryRecvError {}
