//! Typed fan-out bus with bounded per-subscriber queues.
//!
//! Each subscriber gets its own queue. Emission pushes a clone to every
//! registered queue; a full queue drops the event for that subscriber (with
//! a warning) so slow consumers never block the producer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

const DEFAULT_QUEUE_SIZE: usize = 256;

/// Multi-subscriber fan-out channel. Cheap to clone; clones share state.
pub struct Bus<T> {
    inner: Arc<BusInner<T>>,
}

struct BusInner<T> {
    subscribers: Mutex<Vec<(u64, mpsc::Sender<T>)>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl<T> Clone for Bus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Bus<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                capacity,
            }),
        }
    }

    /// Register a fresh bounded queue and return its receiving handle.
    /// Dropping the handle unsubscribes, so release is guaranteed even when
    /// the consuming task is cancelled.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subs = self.inner.subscribers.lock().unwrap();
        subs.push((id, tx));
        debug!("New subscriber added (total: {})", subs.len());
        Subscription {
            id,
            rx,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Deliver a clone of `event` to every registered queue. Never blocks
    /// and never fails: a full queue drops the event for that subscriber.
    pub fn emit(&self, event: T) {
        let senders: Vec<(u64, mpsc::Sender<T>)> = {
            let subs = self.inner.subscribers.lock().unwrap();
            subs.clone()
        };

        for (id, tx) in senders {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Subscriber {id} queue full — dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Receiver dropped; its Drop impl removes the entry.
                }
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().unwrap().len()
    }
}

impl<T: Clone + Send + 'static> Default for Bus<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscriber's receiving half. Belongs to exactly one subscriber;
/// unsubscribes when dropped.
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::Receiver<T>,
    inner: Arc<BusInner<T>>,
}

impl<T> Subscription<T> {
    /// Receive the next delivered event. Returns `None` only if every bus
    /// handle has been dropped.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Non-blocking receive, for drains and tests.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        let mut subs = self.inner.subscribers.lock().unwrap();
        subs.retain(|(id, _)| *id != self.id);
        debug!("Subscriber removed (remaining: {})", subs.len());
    }
}
