//! Unbounded FIFO queue with an explicit end-of-stream signal.
//!
//! Closing is carried out-of-band: the queue owns the only sender of a flume
//! channel and `close()` drops it. Consumers drain whatever was buffered and
//! then observe [`QueueError::Closed`], so no value of `T` is ever reserved
//! as a sentinel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use flume::{Receiver, Sender, TryRecvError};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue is empty")]
    Empty,

    #[error("queue is closed")]
    Closed,
}

pub struct ClosableQueue<T> {
    name: &'static str,
    tx: Mutex<Option<Sender<T>>>,
    rx: Receiver<T>,
    closed: AtomicBool,
}

impl<T> ClosableQueue<T> {
    pub fn new(name: &'static str) -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            name,
            tx: Mutex::new(Some(tx)),
            rx,
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue an item without blocking.
    ///
    /// Items put after [`close`](Self::close) are discarded.
    pub fn put(&self, item: T) {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match tx.as_ref() {
            // The receiver lives as long as `self`, so the send cannot fail
            Some(tx) => {
                let _ = tx.send(item);
            }
            None => debug!(queue = self.name, "Discarding item put after close"),
        }
    }

    /// Remove the next item.
    ///
    /// With `block` set this parks the calling thread until an item arrives or
    /// the queue is closed and drained; async callers should use
    /// [`recv`](Self::recv) instead.
    pub fn get(&self, block: bool) -> Result<T, QueueError> {
        if block {
            return self.rx.recv().map_err(|_| QueueError::Closed);
        }

        match self.rx.try_recv() {
            Ok(item) => Ok(item),
            Err(TryRecvError::Empty) => Err(QueueError::Empty),
            Err(TryRecvError::Disconnected) => Err(QueueError::Closed),
        }
    }

    /// Wait for the next item, failing with [`QueueError::Closed`] once the
    /// queue is closed and every buffered item has been handed out.
    pub async fn recv(&self) -> Result<T, QueueError> {
        self.rx.recv_async().await.map_err(|_| QueueError::Closed)
    }

    /// Signal that no further items will be put. Safe to call repeatedly and
    /// from several tasks; only the first call has an effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        debug!(queue = self.name, pending = self.rx.len(), "Queue closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> std::fmt::Debug for ClosableQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosableQueue")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
