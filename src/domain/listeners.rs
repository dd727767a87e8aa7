//! Error listeners for out-of-band connection failures.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::error::DriverError;

/// Callback invoked with an asynchronous connection or pool failure.
pub type ErrorListener = Arc<dyn Fn(&DriverError) + Send + Sync>;

/// Handle returned when a listener is attached; used to detach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A set of error listeners owned by a pool or a single connection.
#[derive(Default)]
pub struct ErrorListeners {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, ErrorListener)>>,
}

impl ErrorListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: ErrorListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    /// Detaches a listener. Returns `false` if it was not attached.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Calls every attached listener. Listeners run outside the lock.
    pub fn emit(&self, error: &DriverError) {
        let snapshot: Vec<ErrorListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(error);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ErrorListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorListeners")
            .field("attached", &self.len())
            .finish()
    }
}
