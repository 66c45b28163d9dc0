//! Decoupling Buffer
//!
//! Bridges an inbound endpoint to an outbound endpoint through an unbounded
//! [`SafeQueue`], so a producer never waits on a slow consumer for longer than
//! it takes to append to the queue.
//!
//! # Architecture
//!
//! ```text
//!  producers ──▶ inbound ──▶ [listener] ──enqueue──▶ SafeQueue
//!                                 │                     │
//!                              notify               dequeue
//!                                 ▼                     ▼
//!                          closed + Condvar ◀──── [drainer] ──▶ outbound ──▶ consumer
//! ```
//!
//! # Termination
//!
//! Closing the inbound endpoint is the only shutdown trigger. The listener
//! marks the buffer closed and wakes the drainer; the drainer delivers
//! everything still queued and only then closes the outbound endpoint, which
//! lets the consumer's own loop end in turn.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::cleanup::{TaskError, TaskGroup};
use crate::endpoint::{self, Receiver, Sender, WeakSender};
use crate::queue::SafeQueue;

/// State shared by the listener and the drainer
struct Shared<T> {
    queue: SafeQueue<T>,
    /// Set once the inbound endpoint is closed; guards the emptiness test too
    closed: Mutex<bool>,
    ready: Condvar,
}

/// One-shot initialization latch
enum Latch<T> {
    Unset,
    Ready {
        inbound: WeakSender<T>,
        outbound: Receiver<T>,
    },
    Failed,
}

/// FIFO pipe between a producer endpoint and a consumer endpoint
pub struct Buffer<T> {
    shared: Arc<Shared<T>>,
    latch: Mutex<Latch<T>>,
    tasks: TaskGroup,
}

impl<T: Send + 'static> Buffer<T> {
    /// Create an idle buffer; nothing runs until [`Buffer::init`]
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: SafeQueue::new(),
                closed: Mutex::new(false),
                ready: Condvar::new(),
            }),
            latch: Mutex::new(Latch::Unset),
            tasks: TaskGroup::new(),
        }
    }

    /// Start the buffer and return its producer and consumer endpoints
    ///
    /// `capacity` bounds both endpoints; 0 makes them rendezvous channels.
    /// Only the first call starts the two background threads. Later calls
    /// return handles to the same endpoints; if every producer handle has
    /// been dropped by then, the returned sender is already closed.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Spawn`] if a thread cannot be started, and
    /// [`TaskError::Defunct`] on every call after such a failure.
    pub fn init(&self, capacity: usize) -> Result<(Sender<T>, Receiver<T>), TaskError> {
        let mut latch = self.latch.lock();
        match &*latch {
            Latch::Ready { inbound, outbound } => {
                tracing::debug!(inbound = %inbound.id(), "Buffer already initialized");
                let sender = inbound
                    .upgrade()
                    .unwrap_or_else(|| Sender::closed(inbound.id()));
                return Ok((sender, outbound.clone()));
            }
            Latch::Failed => return Err(TaskError::Defunct),
            Latch::Unset => {}
        }

        let (inbound_tx, inbound_rx) = endpoint::channel(capacity);
        let (outbound_tx, outbound_rx) = endpoint::channel(capacity);
        let inbound_id = inbound_tx.id();

        if let Err(e) = self.start(inbound_rx, outbound_tx) {
            // A listener that did start exits once `inbound_tx` is dropped.
            *latch = Latch::Failed;
            return Err(e);
        }

        tracing::debug!(
            inbound = %inbound_id,
            outbound = %outbound_rx.id(),
            capacity,
            "Buffer started"
        );
        *latch = Latch::Ready {
            inbound: inbound_tx.downgrade(),
            outbound: outbound_rx.clone(),
        };
        Ok((inbound_tx, outbound_rx))
    }

    fn start(&self, inbound: Receiver<T>, outbound: Sender<T>) -> Result<(), TaskError> {
        let shared = Arc::clone(&self.shared);
        self.tasks
            .spawn(format!("relay-listen-{}", inbound.id()), move || {
                listen(&shared, &inbound);
            })?;

        let shared = Arc::clone(&self.shared);
        self.tasks
            .spawn(format!("relay-drain-{}", outbound.id()), move || {
                drain(&shared, &outbound);
            })
    }

    /// Block until both background threads have exited
    pub fn wait(&self) {
        self.tasks.wait();
    }

    /// Drop every queued value that has not been handed to the consumer yet
    pub fn clear(&self) {
        let dropped = self.shared.queue.len();
        self.shared.queue.clear();
        tracing::debug!(dropped, "Buffer cleared");
    }

    /// Number of values waiting in the queue
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }

    /// Whether the inbound endpoint has been closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.shared.closed.lock()
    }

    /// Whether [`Buffer::init`] has succeeded
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        matches!(*self.latch.lock(), Latch::Ready { .. })
    }

    /// Number of background threads still running
    #[must_use]
    pub fn live_tasks(&self) -> usize {
        self.tasks.live()
    }
}

impl<T: Send + 'static> Default for Buffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("queued", &self.shared.queue.len())
            .field("tasks", &self.tasks)
            .finish_non_exhaustive()
    }
}

/// Move every inbound value into the queue until the inbound endpoint closes
fn listen<T>(shared: &Shared<T>, inbound: &Receiver<T>) {
    for value in inbound.iter() {
        shared.queue.enqueue(value);
        // Notifying under the lock means the drainer is either before its
        // emptiness check or already waiting.
        let _closed = shared.closed.lock();
        shared.ready.notify_one();
    }

    let mut closed = shared.closed.lock();
    *closed = true;
    shared.ready.notify_one();
    tracing::debug!(inbound = %inbound.id(), "Inbound closed");
}

/// Deliver queued values in order, then close the outbound endpoint
fn drain<T>(shared: &Shared<T>, outbound: &Sender<T>) {
    let mut consumer_gone = false;

    loop {
        let next = {
            let mut closed = shared.closed.lock();
            while shared.queue.is_empty() && !*closed {
                shared.ready.wait(&mut closed);
            }
            if *closed {
                break;
            }
            shared.queue.dequeue()
        };
        // The lock is released before a potentially blocking send.
        if let Some(value) = next {
            deliver(outbound, value, &mut consumer_gone);
        }
    }

    while let Some(value) = shared.queue.dequeue() {
        deliver(outbound, value, &mut consumer_gone);
    }

    if let Err(e) = outbound.close() {
        tracing::warn!(error = %e, "Outbound endpoint closed by someone else");
    }
    tracing::debug!(outbound = %outbound.id(), "Buffer drained");
}

fn deliver<T>(outbound: &Sender<T>, value: T, consumer_gone: &mut bool) {
    if outbound.send(value).is_err() && !*consumer_gone {
        *consumer_gone = true;
        tracing::warn!(
            outbound = %outbound.id(),
            "Consumer is gone; discarding buffered values"
        );
    }
}
