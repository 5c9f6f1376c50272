use mongodb::bson::oid::ObjectId;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// One realtime event addressed to a single user's audience.
#[derive(Debug, Clone, Serialize)]
pub struct UserEvent {
    pub user_id: String,
    pub event: String,
    pub payload: Value,
}

/// Per-user realtime channel. Delivery is at-least-once: a lagging
/// subscriber drops the oldest events, and consumers are expected to treat
/// duplicate payloads as idempotent.
#[derive(Clone)]
pub struct RealtimeBus {
    tx: broadcast::Sender<UserEvent>,
}

impl RealtimeBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Send errors only mean "nobody is listening right now" and are
    /// ignored on purpose.
    pub fn emit_to_user(&self, user_id: &ObjectId, event: &str, payload: Value) {
        let _ = self.tx.send(UserEvent {
            user_id: user_id.to_hex(),
            event: event.to_string(),
            payload,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UserEvent> {
        self.tx.subscribe()
    }
}
