//! Channel Endpoints
//!
//! Bounded channels whose two halves share a stable [`EndpointId`]. The id is
//! the routing key of the hub: a message names the endpoint it wants to reach,
//! routes are keyed by the endpoint they read from, and cleanup deduplicates
//! destinations by it.
//!
//! # Closing
//!
//! All clones of a [`Sender`] share one close slot. Calling [`Sender::close`]
//! on any clone closes the endpoint for every holder; a second call reports
//! [`EndpointError::AlreadyClosed`] instead of panicking. Dropping every
//! clone closes the endpoint too. Once closed, the receiver yields whatever
//! is still buffered and then reports the end of the stream.
//!
//! A capacity of 0 is a rendezvous channel: each send waits for a receiver.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use thiserror::Error;

/// Identity shared by both halves of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(u64);

impl EndpointId {
    /// Allocate a fresh id
    ///
    /// Ids handed out here are never bound to a channel, which makes them a
    /// convenient address for messages that must not match any entry point.
    #[must_use]
    pub fn reserve() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw numeric value
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep-{}", self.0)
    }
}

/// Errors from endpoint lifecycle operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EndpointError {
    /// `close` was called on an endpoint that was already closed
    #[error("endpoint {id} is already closed")]
    AlreadyClosed {
        /// The endpoint that was closed twice
        id: EndpointId,
    },
}

/// A value that could not be sent because the endpoint is closed
///
/// The rejected value is handed back to the caller.
pub struct SendError<T>(pub T);

impl<T> SendError<T> {
    /// Recover the value that was not sent
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SendError { .. }")
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("sending on a closed endpoint")
    }
}

impl<T> std::error::Error for SendError<T> {}

/// Failure of a non-blocking send
pub enum TrySendError<T> {
    /// The endpoint is at capacity
    Full(T),
    /// The endpoint is closed
    Closed(T),
}

impl<T> TrySendError<T> {
    /// Recover the value that was not sent
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(value) | Self::Closed(value) => value,
        }
    }

    /// Whether the send failed because the endpoint is full
    #[must_use]
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Full(..)"),
            Self::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("sending on a full endpoint"),
            Self::Closed(_) => f.write_str("sending on a closed endpoint"),
        }
    }
}

impl<T> std::error::Error for TrySendError<T> {}

/// Failure of a non-blocking receive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TryRecvError {
    /// Nothing is buffered right now
    #[error("endpoint is empty")]
    Empty,
    /// The endpoint is closed and fully drained
    #[error("endpoint is closed")]
    Closed,
}

/// Failure of a receive with a deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecvTimeoutError {
    /// Nothing arrived before the deadline
    #[error("timed out waiting on endpoint")]
    Timeout,
    /// The endpoint is closed and fully drained
    #[error("endpoint is closed")]
    Closed,
}

/// Create a channel with the given capacity (0 = rendezvous)
#[must_use]
pub fn channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let id = EndpointId::reserve();
    let sender = Sender {
        id,
        slot: Arc::new(CloseSlot {
            tx: RwLock::new(Some(tx)),
        }),
    };
    (sender, Receiver { id, rx })
}

/// Shared by every clone of one sender; emptied by `close`
struct CloseSlot<T> {
    tx: RwLock<Option<crossbeam_channel::Sender<T>>>,
}

/// Sending half of an endpoint
pub struct Sender<T> {
    id: EndpointId,
    slot: Arc<CloseSlot<T>>,
}

impl<T> Sender<T> {
    /// Build a sender for `id` that is already closed
    pub(crate) fn closed(id: EndpointId) -> Self {
        Self {
            id,
            slot: Arc::new(CloseSlot {
                tx: RwLock::new(None),
            }),
        }
    }

    /// Identity of this endpoint
    #[must_use]
    pub fn id(&self) -> EndpointId {
        self.id
    }

    fn handle(&self) -> Option<crossbeam_channel::Sender<T>> {
        // Cloned out so a blocking send never holds the slot lock.
        self.slot.tx.read().clone()
    }

    /// Send a value, blocking while the endpoint is full
    ///
    /// # Errors
    ///
    /// Returns the value if the endpoint is closed or its receiver is gone.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        match self.handle() {
            Some(tx) => tx.send(value).map_err(|e| SendError(e.into_inner())),
            None => Err(SendError(value)),
        }
    }

    /// Send a value without blocking
    ///
    /// # Errors
    ///
    /// Returns the value if the endpoint is full or closed.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let Some(tx) = self.handle() else {
            return Err(TrySendError::Closed(value));
        };
        tx.try_send(value).map_err(|e| match e {
            crossbeam_channel::TrySendError::Full(v) => TrySendError::Full(v),
            crossbeam_channel::TrySendError::Disconnected(v) => TrySendError::Closed(v),
        })
    }

    /// Close the endpoint for every holder
    ///
    /// Sends already in progress complete; the receiver sees the end of the
    /// stream once they have been drained.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::AlreadyClosed`] if the endpoint was closed
    /// before.
    pub fn close(&self) -> Result<(), EndpointError> {
        match self.slot.tx.write().take() {
            Some(_) => {
                tracing::trace!(endpoint = %self.id, "Endpoint closed");
                Ok(())
            }
            None => Err(EndpointError::AlreadyClosed { id: self.id }),
        }
    }

    /// Whether `close` has been called on this endpoint
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.slot.tx.read().is_none()
    }

    /// Create a handle that does not keep the endpoint open
    #[must_use]
    pub fn downgrade(&self) -> WeakSender<T> {
        WeakSender {
            id: self.id,
            slot: Arc::downgrade(&self.slot),
        }
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Sender handle that does not keep its endpoint open
pub struct WeakSender<T> {
    id: EndpointId,
    slot: Weak<CloseSlot<T>>,
}

impl<T> WeakSender<T> {
    /// Identity of this endpoint
    #[must_use]
    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// Recover a sender if any strong sender is still alive
    #[must_use]
    pub fn upgrade(&self) -> Option<Sender<T>> {
        self.slot.upgrade().map(|slot| Sender { id: self.id, slot })
    }
}

impl<T> Clone for WeakSender<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            slot: Weak::clone(&self.slot),
        }
    }
}

impl<T> fmt::Debug for WeakSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakSender").field("id", &self.id).finish()
    }
}

/// Receiving half of an endpoint
pub struct Receiver<T> {
    id: EndpointId,
    rx: crossbeam_channel::Receiver<T>,
}

impl<T> Receiver<T> {
    /// Identity of this endpoint
    #[must_use]
    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// Block until a value arrives; `None` once the endpoint is closed and drained
    pub fn recv(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Take a value if one is buffered
    ///
    /// # Errors
    ///
    /// [`TryRecvError::Empty`] when nothing is buffered,
    /// [`TryRecvError::Closed`] when the endpoint is closed and drained.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.rx.try_recv().map_err(|e| match e {
            crossbeam_channel::TryRecvError::Empty => TryRecvError::Empty,
            crossbeam_channel::TryRecvError::Disconnected => TryRecvError::Closed,
        })
    }

    /// Block until a value arrives or the timeout elapses
    ///
    /// # Errors
    ///
    /// [`RecvTimeoutError::Timeout`] on deadline,
    /// [`RecvTimeoutError::Closed`] when the endpoint is closed and drained.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            crossbeam_channel::RecvTimeoutError::Timeout => RecvTimeoutError::Timeout,
            crossbeam_channel::RecvTimeoutError::Disconnected => RecvTimeoutError::Closed,
        })
    }

    /// Blocking iterator that ends when the endpoint is closed and drained
    pub fn iter(&self) -> crossbeam_channel::Iter<'_, T> {
        self.rx.iter()
    }

    /// Number of values currently buffered
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether nothing is buffered right now
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            rx: self.rx.clone(),
        }
    }
}

impl<T> IntoIterator for Receiver<T> {
    type Item = T;
    type IntoIter = crossbeam_channel::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.rx.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Receiver<T> {
    type Item = T;
    type IntoIter = crossbeam_channel::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.rx.iter()
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("id", &self.id)
            .field("buffered", &self.len())
            .finish()
    }
}
