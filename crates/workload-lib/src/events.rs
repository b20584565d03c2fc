//! Publish/subscribe notifications between components
//!
//! Each component owns one bus for its own event type. Subscribers get an
//! unbounded channel so a slow consumer never loses events, and delivery
//! order per subscriber matches emission order.

use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Events that carry a stable notification name
pub trait NamedEvent {
    fn name(&self) -> &'static str;
}

/// Outbound notification bus for a single component
pub struct EventBus<E> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<E>>>,
}

impl<E: Clone + NamedEvent> EventBus<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a new subscriber; the stream ends when the bus is closed
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    /// Deliver an event to every live subscriber, pruning closed ones
    pub fn emit(&self, event: E) {
        let mut subscribers = self.lock();
        tracing::trace!(event = event.name(), subscribers = subscribers.len(), "Emitting event");
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Release every subscription
    pub fn close(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<E>>> {
        // A panicking subscriber send cannot leave the list inconsistent
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<E: Clone + NamedEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}
