//! The common queue contract implemented by every handle pair.
//!
//! Each queue shape vends a producer-side and a consumer-side handle with its
//! own concrete error types. These traits pin the shared surface so generic
//! code (and the cross-variant test suites) can drive any shape the same way.
//! All calls monomorphize; nothing here introduces dynamic dispatch.

/// The write side of a queue, regardless of shape.
pub trait Producer<T> {
    /// Error returned when the value cannot be enqueued.
    type Error;

    /// Attempts to enqueue a value without blocking.
    ///
    /// On failure the error carries the value back to the caller.
    fn try_send(&mut self, value: T) -> Result<(), Self::Error>;

    /// Returns the ring capacity configured at construction.
    fn capacity(&self) -> usize;

    /// Returns the number of unread elements.
    ///
    /// Advisory: observed with relaxed loads and may be stale by the time the
    /// caller acts on it. Exposed for diagnostics, not correctness decisions.
    fn len(&self) -> usize;

    /// Returns `true` if the queue holds no unread elements. Advisory.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the queue cannot accept another element without a
    /// matching dequeue (or, for broadcast, without overwriting). Advisory.
    fn is_full(&self) -> bool;
}

/// The read side of a queue, regardless of shape.
pub trait Consumer<T> {
    /// Error returned when no value can be dequeued.
    type Error;

    /// Attempts to dequeue a value without blocking.
    fn try_recv(&mut self) -> Result<T, Self::Error>;

    /// Returns the ring capacity configured at construction.
    fn capacity(&self) -> usize;

    /// Returns the number of unread elements. Advisory; see
    /// [`Producer::len`].
    fn len(&self) -> usize;

    /// Returns `true` if there is nothing to read. Advisory.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the queue is at capacity. Advisory.
    fn is_full(&self) -> bool;
}
