//! Thread-Safe FIFO Queue
//!
//! A singly-linked, unbounded FIFO used by [`Buffer`](crate::buffer::Buffer)
//! to hold values between its listener and drainer threads.
//!
//! # Locking
//!
//! ```text
//!   head (RwLock)                              tail (RwLock)
//!       │                                           │
//!       ▼                                           ▼
//!   ┌───────┐ next ┌───────┐ next ┌───────┐ next ┌───────┐
//!   │ dummy │ ───▶ │  v1   │ ───▶ │  v2   │ ───▶ │  v3   │ ──▶ None
//!   └───────┘      └───────┘      └───────┘      └───────┘
//! ```
//!
//! The head always points at a dummy node whose successor is the oldest
//! value. `enqueue` only takes the tail lock and `dequeue`/`peek` only take
//! the head lock, so producers and the consumer meet only on the node they
//! share when the queue is empty. The size counter is kept apart from both.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

type Link<T> = Option<Arc<Node<T>>>;

struct Node<T> {
    /// `None` for the dummy node and for nodes whose value was taken
    value: Mutex<Option<T>>,
    next: RwLock<Link<T>>,
}

impl<T> Node<T> {
    fn new(value: Option<T>) -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(value),
            next: RwLock::new(None),
        })
    }
}

/// Unbounded FIFO safe to share between threads
pub struct SafeQueue<T> {
    head: RwLock<Arc<Node<T>>>,
    tail: RwLock<Arc<Node<T>>>,
    size: AtomicUsize,
}

impl<T> SafeQueue<T> {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        let dummy = Node::new(None);
        Self {
            head: RwLock::new(Arc::clone(&dummy)),
            tail: RwLock::new(dummy),
            size: AtomicUsize::new(0),
        }
    }

    /// Append a value at the tail. Never fails.
    pub fn enqueue(&self, value: T) {
        let node = Node::new(Some(value));
        let mut tail = self.tail.write();
        // Counted before linking: a consumer can only see counted nodes.
        self.size.fetch_add(1, Ordering::AcqRel);
        *tail.next.write() = Some(Arc::clone(&node));
        *tail = node;
    }

    /// Remove and return the oldest value, or `None` if the queue is empty
    pub fn dequeue(&self) -> Option<T> {
        let mut head = self.head.write();
        let next = head.next.read().clone()?;
        let value = next.value.lock().take();
        // The old dummy is released here; `next` becomes the new dummy.
        *head = next;
        self.size.fetch_sub(1, Ordering::AcqRel);
        value
    }

    /// Return a copy of the oldest value without removing it
    #[must_use]
    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        let head = self.head.read();
        let next = head.next.read();
        next.as_ref().and_then(|node| node.value.lock().clone())
    }

    /// Whether the queue holds no values
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.read().next.read().is_none()
    }

    /// Number of queued values
    #[must_use]
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Drop every queued value
    ///
    /// The chain is detached in O(1) while both locks are held; its nodes are
    /// released afterwards, one at a time, outside the locks.
    pub fn clear(&self) {
        let detached = {
            let mut head = self.head.write();
            let mut tail = self.tail.write();
            let dummy = Node::new(None);
            *tail = Arc::clone(&dummy);
            self.size.store(0, Ordering::Release);
            std::mem::replace(&mut *head, dummy)
        };
        release_chain(detached);
    }
}

/// Unlink a chain node by node so dropping a long queue never recurses
fn release_chain<T>(mut node: Arc<Node<T>>) {
    loop {
        let next = node.next.write().take();
        match next {
            Some(next) => node = next,
            None => break,
        }
    }
}

impl<T> Default for SafeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for SafeQueue<T> {
    fn drop(&mut self) {
        let head = std::mem::replace(self.head.get_mut(), Node::new(None));
        release_chain(head);
    }
}

impl<T> fmt::Debug for SafeQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeQueue")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = SafeQueue::new();
        for i in 0..5 {
            queue.enqueue(i);
        }

        assert_eq!(queue.len(), 5);
        let drained: Vec<_> = std::iter::from_fn(|| queue.dequeue()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_dequeue_empty_returns_none() {
        let queue: SafeQueue<String> = SafeQueue::new();
        assert!(queue.dequeue().is_none());
        assert!(queue.peek().is_none());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_peek_does_not_remove() {
        let queue = SafeQueue::new();
        queue.enqueue("first".to_string());
        queue.enqueue("second".to_string());

        assert_eq!(queue.peek().as_deref(), Some("first"));
        assert_eq!(queue.peek().as_deref(), Some("first"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue().as_deref(), Some("first"));
        assert_eq!(queue.peek().as_deref(), Some("second"));
    }

    #[test]
    fn test_clear_then_reuse() {
        let queue = SafeQueue::new();
        for i in 0..10 {
            queue.enqueue(i);
        }
        queue.clear();

        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
        assert!(queue.dequeue().is_none());

        queue.enqueue(42);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.dequeue(), Some(42));
    }

    #[test]
    fn test_long_queue_drops_without_recursion() {
        let queue = SafeQueue::new();
        for i in 0..200_000u32 {
            queue.enqueue(i);
        }
        queue.clear();

        for i in 0..200_000u32 {
            queue.enqueue(i);
        }
        drop(queue);
    }

    #[test]
    fn test_concurrent_producers_single_consumer() {
        let queue = Arc::new(SafeQueue::new());
        let producers: Vec<_> = (0..4u64)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..1_000u64 {
                        queue.enqueue(p * 10_000 + i);
                    }
                })
            })
            .collect();

        let mut seen = Vec::with_capacity(4_000);
        while seen.len() < 4_000 {
            if let Some(value) = queue.dequeue() {
                seen.push(value);
            } else {
                thread::yield_now();
            }
        }
        for producer in producers {
            producer.join().unwrap();
        }

        // Per-producer order is preserved
        for p in 0..4u64 {
            let own: Vec<_> = seen.iter().filter(|v| **v / 10_000 == p).collect();
            assert_eq!(own.len(), 1_000);
            assert!(own.windows(2).all(|w| w[0] < w[1]));
        }
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
    }
}
