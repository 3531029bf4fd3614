//! Bounded FIFO between the two pipeline stages.
//!
//! [`HandoffQueue::put`] waits while the queue is full, which is the only
//! backpressure the producer sees: at most `capacity` items are queued
//! and one more can be waiting in a blocked `put`. Every received item
//! comes wrapped in a [`Delivery`] that acknowledges it on drop, and
//! [`HandoffQueue::join`] resolves once every item that was put has been
//! acknowledged.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;

/// Outcome of a cancellable put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Queued,
    /// Cancellation fired while waiting for room; the item was not queued.
    Cancelled,
    /// The receiving side is gone.
    Closed,
}

pub struct HandoffQueue<T> {
    tx: mpsc::Sender<T>,
    rx: Mutex<mpsc::Receiver<T>>,
    unfinished: Arc<watch::Sender<usize>>,
    capacity: usize,
}

impl<T: Send> HandoffQueue<T> {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let (unfinished, _) = watch::channel(0);
        Self {
            tx,
            rx: Mutex::new(rx),
            unfinished: Arc::new(unfinished),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items put but not yet acknowledged, including ones still waiting
    /// in a blocked `put`.
    pub fn unfinished(&self) -> usize {
        *self.unfinished.borrow()
    }

    /// Queue `item`, waiting for room. Never drops the item while the
    /// receiver is alive.
    pub async fn put(&self, item: T) -> PutOutcome {
        self.put_until(item, &CancellationToken::new()).await
    }

    /// Like [`put`](Self::put), but gives up when `cancel` fires.
    pub async fn put_until(&self, item: T, cancel: &CancellationToken) -> PutOutcome {
        // Count before sending so a fast consumer can never ack first.
        self.unfinished.send_modify(|n| *n += 1);

        let outcome = tokio::select! {
            biased;
            result = self.tx.send(item) => match result {
                Ok(()) => PutOutcome::Queued,
                Err(_) => PutOutcome::Closed,
            },
            _ = cancel.cancelled() => PutOutcome::Cancelled,
        };

        if outcome != PutOutcome::Queued {
            self.release();
        }
        outcome
    }

    /// Wait up to `timeout` for the next item. `None` on timeout.
    pub async fn get_timeout(&self, timeout: Duration) -> Option<Delivery<T>> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(item)) => Some(Delivery {
                item,
                _ack: AckGuard {
                    unfinished: Arc::clone(&self.unfinished),
                },
            }),
            Ok(None) | Err(_) => None,
        }
    }

    /// Resolve once every queued item has been acknowledged.
    pub async fn join(&self) {
        let mut rx = self.unfinished.subscribe();
        // The sender lives in `self`, so this cannot fail.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    fn release(&self) {
        self.unfinished.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// A received item. Dropping it acknowledges the item, whatever
/// happened while handling it.
pub struct Delivery<T> {
    pub item: T,
    _ack: AckGuard,
}

struct AckGuard {
    unfinished: Arc<watch::Sender<usize>>,
}

impl Drop for AckGuard {
    fn drop(&mut self) {
        self.unfinished.send_modify(|n| *n = n.saturating_sub(1));
    }
}
