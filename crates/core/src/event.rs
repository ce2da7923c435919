//! Engine event system — decoupled observability for the adaptive pipeline.
//!
//! Events are published when the engine fires, suppresses, or skips
//! something. Observers (metrics exporters, audit loggers, tests) subscribe
//! without the engine knowing about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// All observable engine events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// An evaluation selected one or more actions for a learner.
    ActionsTriggered {
        user_id: String,
        event_id: Uuid,
        rule_names: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// A matched rule was dropped by the selection policy.
    RuleSuppressed {
        user_id: String,
        rule_name: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A telemetry event could not be evaluated and was skipped.
    EventSkipped {
        user_id: String,
        event_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A sink failed to accept a batch.
    DispatchFailed {
        sink: String,
        user_id: String,
        event_id: Uuid,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// The rule catalog was replaced.
    CatalogUpdated {
        total_rules: usize,
        active_rules: usize,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for engine events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Slow
/// subscribers lag and lose the oldest events; publishers never wait.
pub struct EventBus {
    sender: broadcast::Sender<Arc<EngineEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<EngineEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(EngineEvent::RuleSuppressed {
            user_id: "u1".into(),
            rule_name: "AI_TTS_ON".into(),
            reason: "capacity".into(),
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            EngineEvent::RuleSuppressed { rule_name, .. } => {
                assert_eq!(rule_name, "AI_TTS_ON");
            }
            _ => panic!("Expected RuleSuppressed event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(EngineEvent::CatalogUpdated {
            total_rules: 0,
            active_rules: 0,
            timestamp: Utc::now(),
        });
    }
}
