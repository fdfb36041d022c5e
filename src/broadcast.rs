//! Best-effort event broadcasting.
//!
//! Sinks are optional; publish failures are logged and swallowed so a dead
//! subscriber can never stall a council cycle.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouncilEvent {
    pub topic: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
}

pub trait BroadcastSink: Send + Sync {
    fn publish(&self, event: CouncilEvent);
}

/// Fan-out over a tokio broadcast channel; consumers subscribe for WS/SSE
/// style delivery.
pub struct ChannelSink {
    sender: broadcast::Sender<CouncilEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CouncilEvent> {
        self.sender.subscribe()
    }
}

impl BroadcastSink for ChannelSink {
    fn publish(&self, event: CouncilEvent) {
        // send only fails when nobody is subscribed
        if let Err(e) = self.sender.send(event) {
            debug!(error = %e, "broadcast dropped (no subscribers)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let sink = ChannelSink::new(16);
        let mut rx = sink.subscribe();
        sink.publish(CouncilEvent {
            topic: "council_1".to_string(),
            event_type: "consensus".to_string(),
            data: serde_json::json!({"symbol": "BTCUSDT"}),
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "council_1");
        assert_eq!(event.event_type, "consensus");
    }

    #[test]
    fn publish_without_subscribers_is_swallowed() {
        let sink = ChannelSink::new(4);
        sink.publish(CouncilEvent {
            topic: "council_1".to_string(),
            event_type: "consensus".to_string(),
            data: serde_json::Value::Null,
        });
    }
}
