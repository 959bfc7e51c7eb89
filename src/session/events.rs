// ABOUTME: Typed event bus for session events
// ABOUTME: Subscribers hold explicit handles that unsubscribe on drop

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

struct BusInner<E> {
    next_id: u64,
    subscribers: HashMap<u64, mpsc::UnboundedSender<E>>,
    closed: bool,
}

/// Fan-out of events to any number of subscribers
pub struct EventBus<E> {
    inner: Arc<Mutex<BusInner<E>>>,
}

impl<E: Clone + Send + 'static> EventBus<E> {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                next_id: 0,
                subscribers: HashMap::new(),
                closed: false,
            })),
        }
    }

    /// Register a subscriber; events published afterwards are delivered to it
    pub fn subscribe(&self) -> Subscription<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        // A closed bus hands out subscriptions that end immediately
        if !inner.closed {
            inner.subscribers.insert(id, tx);
        }
        Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every live subscriber
    pub fn publish(&self, event: E) {
        let mut inner = self.inner.lock();
        inner
            .subscribers
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    /// Drop all subscribers; their receivers drain and then end
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.subscribers.clear();
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Receiving end of an [`EventBus`] registration
pub struct Subscription<E> {
    id: u64,
    rx: mpsc::UnboundedReceiver<E>,
    bus: Weak<Mutex<BusInner<E>>>,
}

impl<E> Subscription<E> {
    /// Next event, or `None` once unsubscribed or the bus is closed
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    /// Next already-delivered event without waiting
    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving; events already delivered can still be drained
    pub fn unsubscribe(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.lock().subscribers.remove(&self.id);
        }
    }
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
