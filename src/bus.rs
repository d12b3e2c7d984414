//! In-process publish/subscribe for catalog changes.

use crate::types::Song;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

/// Unique identifier for a subscription. Passing it back to
/// [`ChangeBus::unsubscribe`] removes the listener.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

type Listener = Arc<dyn Fn(&[Song]) + Send + Sync>;

/// Lets any number of local observers react to collection changes without
/// polling. Delivery is synchronous within the publishing call.
pub struct ChangeBus {
    listeners: RwLock<HashMap<SubscriptionId, Listener>>,
    next_id: AtomicU64,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener. Subscriptions are independent; removing one does
    /// not affect the others.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&[Song]) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.write().insert(id, Arc::new(listener));
        id
    }

    /// Remove a listener. No-op for an unknown id.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.write().remove(&id);
    }

    /// Invoke every registered listener with the new collection.
    ///
    /// A panicking listener is isolated: it is logged, the remaining
    /// listeners still run, and nothing propagates to the publisher.
    pub fn publish(&self, songs: &[Song]) {
        let listeners: Vec<(SubscriptionId, Listener)> = {
            let guard = self.listeners.read();
            guard.iter().map(|(id, l)| (*id, Arc::clone(l))).collect()
        };

        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(songs))).is_err() {
                error!(subscription = ?id, "change listener panicked during publish");
            }
        }
    }

    /// Number of registered listeners.
    pub fn subscriber_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}
