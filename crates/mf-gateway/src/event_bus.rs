use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Notification observer messages. Delivery pipelines are external;
/// the bus only exposes the state changes they subscribe to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StudioEvent {
    ReservationChanged {
        reservation_id: String,
        owner_uid: String,
        status: String,
    },
    StorageNotice {
        reservation_id: String,
        owner_uid: String,
        notice: String,
    },
    AuditRecorded {
        reason_code: String,
        resource_id: String,
    },
    Raw(Value),
}

/// A broadcast-style event bus built on flume channels.
///
/// Each [`subscribe`] call gets every message published afterwards.
/// Cheap to clone; disconnected subscribers are pruned on publish.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Vec<flume::Sender<StudioEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> flume::Receiver<StudioEvent> {
        let (tx, rx) = flume::unbounded();
        let mut senders = self.inner.lock().expect("EventBus lock poisoned");
        senders.push(tx);
        rx
    }

    pub fn publish(&self, event: StudioEvent) {
        let mut senders = self.inner.lock().expect("EventBus lock poisoned");
        senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().expect("EventBus lock poisoned").len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        bus.publish(StudioEvent::AuditRecorded {
            reason_code: "risk_denied".to_string(),
            resource_id: "ord-1".to_string(),
        });
        let event = rx.try_recv().unwrap();
        assert!(matches!(event, StudioEvent::AuditRecorded { .. }));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        drop(rx);
        bus.publish(StudioEvent::Raw(serde_json::json!({})));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
