//! Raw event fan-out to registered listeners

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use kestrel_core::{KestrelResult, RawEvent};
use parking_lot::RwLock;
use tracing::warn;

/// Listener handle returned by [`EventHub::add_listener`]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl std::fmt::Debug for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Listener({})", self.0)
    }
}

pub type Listener = Arc<dyn Fn(&RawEvent) -> KestrelResult<()> + Send + Sync>;

/// Fan-out point between the transport callback and interested parties
#[derive(Default)]
pub struct EventHub {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver to every listener in registration order. Returns how many
    /// accepted the event.
    pub fn publish(&self, event: &RawEvent) -> usize {
        // Snapshot so listeners may add or remove listeners re-entrantly
        let listeners: Vec<(ListenerId, Listener)> = self.listeners.read().clone();
        let mut delivered = 0;
        for (id, listener) in listeners {
            match listener(event) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(listener = ?id, error = %e, "event listener failed"),
            }
        }
        delivered
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
