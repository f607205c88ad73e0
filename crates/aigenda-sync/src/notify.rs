//! Fire-and-forget change notifications for UI consumers.
//!
//! Delivery is at-most-once per call with no persistence or replay; a
//! subscriber that is not listening simply misses the event and picks up
//! full state on the next pull.

use serde_json::Value;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 64;

/// An applied remote change for one entity type.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub entity_type: String,
    pub payload: Value,
}

/// Broadcast sender for applied remote changes.
#[derive(Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeNotifier {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_CAPACITY);
        Self { tx }
    }

    /// Subscribe to future events. Events sent before the subscription
    /// are not replayed.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    /// Broadcast an event. Having no subscribers is not an error.
    pub fn notify(&self, entity_type: &str, payload: Value) {
        let _ = self.tx.send(ChangeEvent {
            entity_type: entity_type.to_string(),
            payload,
        });
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}
