//! Store event broadcast.
//!
//! Every store exposes two observable event kinds: `written` (a flush
//! completed successfully) and `error` (a flush failed). Sync-mode callers
//! also get failures back as return values, but background and buffered
//! callers see flush outcomes *only* here — anyone relying on those modes
//! must subscribe or risk silently losing writes.
//!
//! The mechanism is a plain multi-subscriber broadcast list: no traits to
//! implement, just [`Observers::subscribe`] handing back an mpsc receiver.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

/// Event delivered to store observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A flush completed successfully.
    Written {
        /// Name of the store that flushed.
        store: String,
    },
    /// A flush failed.
    Error {
        /// Name of the store whose flush failed.
        store: String,
        /// Rendered underlying error (I/O, format, or lock timeout).
        message: String,
    },
}

impl StoreEvent {
    /// Name of the store this event concerns.
    pub fn store(&self) -> &str {
        match self {
            StoreEvent::Written { store } => store,
            StoreEvent::Error { store, .. } => store,
        }
    }
}

/// Multi-subscriber broadcast list for one store.
///
/// Clones share the subscriber list, so a store handle and a detached
/// background flush notify the same observers.
#[derive(Debug, Clone, Default)]
pub struct Observers {
    subscribers: Arc<Mutex<Vec<Sender<StoreEvent>>>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new observer.
    ///
    /// The receiver sees every event that occurs after this call. Dropping
    /// it unsubscribes on the next broadcast.
    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        let (tx, rx) = mpsc::channel();
        self.lock().push(tx);
        rx
    }

    /// Deliver an event to every live subscriber.
    pub fn notify(&self, event: StoreEvent) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Sender<StoreEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn every_subscriber_sees_every_event() {
        let observers = Observers::new();
        let first = observers.subscribe();
        let second = observers.subscribe();

        observers.notify(StoreEvent::Written {
            store: "users".to_string(),
        });

        for rx in [&first, &second] {
            let event = rx.recv_timeout(Duration::from_secs(1)).unwrap();
            assert_eq!(event.store(), "users");
        }
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let observers = Observers::new();
        let kept = observers.subscribe();
        let dropped = observers.subscribe();
        drop(dropped);

        observers.notify(StoreEvent::Error {
            store: "users".to_string(),
            message: "disk full".to_string(),
        });
        observers.notify(StoreEvent::Written {
            store: "users".to_string(),
        });

        let first = kept.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(first, StoreEvent::Error { .. }));
        let second = kept.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(second, StoreEvent::Written { .. }));
    }

    #[test]
    fn clones_share_the_subscriber_list() {
        let observers = Observers::new();
        let clone = observers.clone();
        let rx = observers.subscribe();

        clone.notify(StoreEvent::Written {
            store: "users".to_string(),
        });

        rx.recv_timeout(Duration::from_secs(1)).unwrap();
    }
}
