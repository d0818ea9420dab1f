//! Event emission system.
//!
//! Events are pushed from the daemon to UI subscribers. Delivery is
//! fire-and-forget: the purchase pipeline never waits on, or fails
//! because of, a notification.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use aula_entitlement::NotificationSink;
use aula_types::UserId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// An event emitted by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event type name (e.g. "EntitlementGranted", "WalletCredited").
    pub event_type: String,
    /// Unix timestamp.
    pub timestamp: u64,
    /// Type-specific payload.
    pub payload: serde_json::Value,
}

/// Filter for event subscriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFilter {
    /// Category filter: "wallet", "purchase", "system".
    pub categories: Option<Vec<String>>,
    /// Filter to specific user ids.
    pub user_ids: Option<Vec<UserId>>,
}

/// Event bus for broadcasting events to subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: Event) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events. Returns a receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Get the current sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl EventFilter {
    /// Check if an event matches this filter.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref categories) = self.categories {
            let event_category = categorize_event(&event.event_type);
            if !categories.contains(&event_category) {
                return false;
            }
        }

        if let Some(ref user_ids) = self.user_ids {
            if let Some(uid) = event.payload.get("user_id").and_then(|v| v.as_u64()) {
                if !user_ids.contains(&uid) {
                    return false;
                }
            }
        }

        true
    }
}

/// Categorize an event type into a category.
fn categorize_event(event_type: &str) -> String {
    match event_type {
        s if s.starts_with("Wallet") => "wallet".to_string(),
        s if s.starts_with("Entitlement") || s.starts_with("Purchase") || s.starts_with("Code") => {
            "purchase".to_string()
        }
        _ => "system".to_string(),
    }
}

/// Bridge from the entitlement service's notification seam onto the
/// event bus.
pub struct EventBusSink {
    bus: EventBus,
}

impl EventBusSink {
    /// Wrap an event bus as a notification sink.
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl NotificationSink for EventBusSink {
    fn notify(&self, user_id: UserId, title: &str, message: &str, kind: &str) {
        self.bus.emit(Event {
            event_type: "EntitlementGranted".to_string(),
            timestamp: aula_types::unix_now(),
            payload: serde_json::json!({
                "user_id": user_id,
                "title": title,
                "message": message,
                "kind": kind,
            }),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_bus_emit_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(Event {
            event_type: "DaemonStarted".to_string(),
            timestamp: 1000,
            payload: serde_json::json!({"version": "0.1.0"}),
        });

        let event = rx.try_recv().expect("receive event");
        assert_eq!(event.event_type, "DaemonStarted");
        assert_eq!(bus.sequence(), 1);
    }

    #[test]
    fn test_event_filter_categories() {
        let filter = EventFilter {
            categories: Some(vec!["purchase".to_string()]),
            user_ids: None,
        };

        let purchase_event = Event {
            event_type: "EntitlementGranted".to_string(),
            timestamp: 1000,
            payload: serde_json::json!({}),
        };
        assert!(filter.matches(&purchase_event));

        let wallet_event = Event {
            event_type: "WalletCredited".to_string(),
            timestamp: 1000,
            payload: serde_json::json!({}),
        };
        assert!(!filter.matches(&wallet_event));
    }

    #[test]
    fn test_event_filter_user_ids() {
        let filter = EventFilter {
            categories: None,
            user_ids: Some(vec![7]),
        };

        let for_seven = Event {
            event_type: "WalletCredited".to_string(),
            timestamp: 1000,
            payload: serde_json::json!({"user_id": 7}),
        };
        assert!(filter.matches(&for_seven));

        let for_eight = Event {
            event_type: "WalletCredited".to_string(),
            timestamp: 1000,
            payload: serde_json::json!({"user_id": 8}),
        };
        assert!(!filter.matches(&for_eight));
    }

    #[test]
    fn test_categorize_event() {
        assert_eq!(categorize_event("WalletCredited"), "wallet");
        assert_eq!(categorize_event("WalletDebited"), "wallet");
        assert_eq!(categorize_event("EntitlementGranted"), "purchase");
        assert_eq!(categorize_event("PurchaseRolledBack"), "purchase");
        assert_eq!(categorize_event("DaemonStarted"), "system");
    }

    #[test]
    fn test_sink_emits_entitlement_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let sink = EventBusSink::new(bus);

        sink.notify(7, "Package activated", "Package 3 is now available.", "purchase");

        let event = rx.try_recv().expect("receive event");
        assert_eq!(event.event_type, "EntitlementGranted");
        assert_eq!(event.payload["user_id"], 7);
    }
}
