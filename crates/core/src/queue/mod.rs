//! Closeable FIFO queue shared between producers and consumers.
//!
//! `Queue` is the boundary type of every pipeline in this crate. Unlike a bare
//! `tokio::sync::mpsc` pair, any handle can close the queue for sending while
//! items that were already buffered keep draining to receivers:
//!
//! - `send` suspends while a bounded queue is full and fails once closed
//! - `recv` yields `None` only after the queue is closed and drained
//! - `close` is idempotent

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

/// Error returned when sending into a closed queue.
///
/// Carries the rejected value back to the caller.
#[derive(Clone, PartialEq, Eq, thiserror::Error)]
#[error("Queue is closed")]
pub struct SendError<T>(pub T);

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendError").finish_non_exhaustive()
    }
}

impl<T> SendError<T> {
    /// Returns the value that could not be sent.
    pub fn into_inner(self) -> T {
        self.0
    }
}

enum Sender<T> {
    Bounded(mpsc::Sender<T>),
    Unbounded(mpsc::UnboundedSender<T>),
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Bounded(tx) => Self::Bounded(tx.clone()),
            Self::Unbounded(tx) => Self::Unbounded(tx.clone()),
        }
    }
}

enum Receiver<T> {
    Bounded(mpsc::Receiver<T>),
    Unbounded(mpsc::UnboundedReceiver<T>),
}

impl<T> Receiver<T> {
    async fn recv(&mut self) -> Option<T> {
        match self {
            Self::Bounded(rx) => rx.recv().await,
            Self::Unbounded(rx) => rx.recv().await,
        }
    }
}

struct Shared<T> {
    /// `None` once the queue has been closed.
    tx: Mutex<Option<Sender<T>>>,
    rx: tokio::sync::Mutex<Receiver<T>>,
    capacity: Option<usize>,
}

/// A cloneable handle to a closeable FIFO queue.
///
/// All clones refer to the same queue.
pub struct Queue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("capacity", &self.shared.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> Queue<T> {
    /// Creates a queue buffering at most `capacity` items.
    ///
    /// A capacity of 0 is treated as 1.
    pub fn bounded(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self::from_parts(Sender::Bounded(tx), Receiver::Bounded(rx), Some(capacity))
    }

    /// Creates a queue without a capacity limit. `send` never suspends.
    pub fn unbounded() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self::from_parts(Sender::Unbounded(tx), Receiver::Unbounded(rx), None)
    }

    /// Creates an already closed queue holding `items`.
    pub fn from_items<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        for item in items {
            // The receiver is alive, so this cannot fail.
            let _ = tx.send(item);
        }
        Self {
            shared: Arc::new(Shared {
                tx: Mutex::new(None),
                rx: tokio::sync::Mutex::new(Receiver::Unbounded(rx)),
                capacity: None,
            }),
        }
    }

    fn from_parts(tx: Sender<T>, rx: Receiver<T>, capacity: Option<usize>) -> Self {
        Self {
            shared: Arc::new(Shared {
                tx: Mutex::new(Some(tx)),
                rx: tokio::sync::Mutex::new(rx),
                capacity,
            }),
        }
    }

    fn sender_slot(&self) -> MutexGuard<'_, Option<Sender<T>>> {
        self.shared
            .tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sends a value, suspending while a bounded queue is full.
    ///
    /// Fails with the value if the queue is closed.
    pub async fn send(&self, value: T) -> Result<(), SendError<T>> {
        let tx = match self.sender_slot().clone() {
            Some(tx) => tx,
            None => return Err(SendError(value)),
        };

        match tx {
            Sender::Bounded(tx) => tx.send(value).await.map_err(|e| SendError(e.0)),
            Sender::Unbounded(tx) => tx.send(value).map_err(|e| SendError(e.0)),
        }
    }

    /// Receives the next value.
    ///
    /// Returns `None` once the queue is closed and every buffered item has
    /// been received. Cancel-safe: dropping the future never loses an item.
    pub async fn recv(&self) -> Option<T> {
        let mut rx = self.shared.rx.lock().await;
        rx.recv().await
    }

    /// Closes the queue for sending.
    ///
    /// Returns `true` if this call closed the queue, `false` if it was
    /// already closed. Sends that are suspended at the time of the call
    /// still complete.
    pub fn close(&self) -> bool {
        self.sender_slot().take().is_some()
    }

    /// Returns `true` if the queue no longer accepts values.
    pub fn is_closed(&self) -> bool {
        self.sender_slot().is_none()
    }

    /// Buffer capacity, `None` for unbounded queues.
    pub fn capacity(&self) -> Option<usize> {
        self.shared.capacity
    }

    /// Receives until end-of-stream and returns everything in arrival order.
    pub async fn collect(&self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = self.recv().await {
            items.push(item);
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = Queue::unbounded();
        for i in 0..5 {
            queue.send(i).await.unwrap();
        }
        queue.close();
        assert_eq!(queue.collect().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let queue: Queue<u8> = Queue::bounded(4);
        assert!(!queue.is_closed());
        assert!(queue.close());
        assert!(!queue.close());
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn test_send_after_close_returns_value() {
        let queue = Queue::bounded(4);
        queue.close();
        let err = queue.send("late").await.unwrap_err();
        assert_eq!(err.into_inner(), "late");
    }

    #[tokio::test]
    async fn test_buffered_items_drain_after_close() {
        let queue = Queue::bounded(4);
        queue.send(1).await.unwrap();
        queue.send(2).await.unwrap();
        queue.close();

        assert_eq!(queue.recv().await, Some(1));
        assert_eq!(queue.recv().await, Some(2));
        assert_eq!(queue.recv().await, None);
        assert_eq!(queue.recv().await, None);
    }

    #[tokio::test]
    async fn test_zero_capacity_is_clamped() {
        let queue: Queue<u8> = Queue::bounded(0);
        assert_eq!(queue.capacity(), Some(1));
        assert_eq!(Queue::<u8>::unbounded().capacity(), None);
    }

    #[tokio::test]
    async fn test_bounded_send_suspends_when_full() {
        let queue = Queue::bounded(1);
        queue.send(1).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(20), queue.send(2)).await;
        assert!(blocked.is_err(), "second send should wait for capacity");

        assert_eq!(queue.recv().await, Some(1));
        queue.send(3).await.unwrap();
        assert_eq!(queue.recv().await, Some(3));
    }

    #[tokio::test]
    async fn test_from_items_is_closed() {
        let queue = Queue::from_items(vec!['a', 'b']);
        assert!(queue.is_closed());
        assert_eq!(queue.collect().await, vec!['a', 'b']);
    }

    #[tokio::test]
    async fn test_recv_waits_for_producer() {
        let queue = Queue::bounded(2);
        let producer = queue.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.send(42).await.unwrap();
            producer.close();
        });

        assert_eq!(queue.recv().await, Some(42));
        assert_eq!(queue.recv().await, None);
        handle.await.unwrap();
    }
}
