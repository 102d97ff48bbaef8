// src/session/events.rs
//! Session lifecycle event bus
//!
//! External subscribers (notification/UI layers) receive typed lifecycle
//! events through a broadcast channel instead of an ad hoc emitter. Slow
//! subscribers lag and lose old events; the core never blocks on them.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A session lifecycle event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Started {
        meeting_id: String,
        session_id: String,
    },
    Paused {
        meeting_id: String,
        session_id: String,
    },
    Resumed {
        meeting_id: String,
        session_id: String,
    },
    Stopped {
        meeting_id: String,
        session_id: String,
        duration_secs: u64,
    },
    Failed {
        meeting_id: String,
        session_id: String,
        reason: String,
    },
}

/// Broadcast bus for session lifecycle events
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    /// Create a bus retaining up to `capacity` undelivered events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to lifecycle events from this point on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Handle for publishing from detached tasks
    pub fn sender(&self) -> broadcast::Sender<SessionEvent> {
        self.sender.clone()
    }

    /// Publish an event. Dropped silently when nobody is subscribed.
    pub fn publish(&self, event: SessionEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_receives_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(SessionEvent::Started {
            meeting_id: "m1".to_string(),
            session_id: "s1".to_string(),
        });

        match rx.recv().await.unwrap() {
            SessionEvent::Started { meeting_id, .. } => assert_eq!(meeting_id, "m1"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::default();
        bus.publish(SessionEvent::Paused {
            meeting_id: "m1".to_string(),
            session_id: "s1".to_string(),
        });
    }

    #[test]
    fn test_event_serialization_tag() {
        let event = SessionEvent::Stopped {
            meeting_id: "m1".to_string(),
            session_id: "s1".to_string(),
            duration_secs: 42,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"stopped\""));
    }
}
