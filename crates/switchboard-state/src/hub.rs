//! Broadcast tap over the conversation event log.
//!
//! Lossy by design (slow subscribers miss events); never load-bearing. The
//! durable record is the repository.

use switchboard_protocol::{ConversationEvent, SessionId};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionEventRecord {
    pub session_id: SessionId,
    pub event: ConversationEvent,
}

#[derive(Clone, Debug)]
pub struct SessionEventHub {
    sender: broadcast::Sender<SessionEventRecord>,
}

impl SessionEventHub {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer);
        Self { sender }
    }

    pub fn publish(&self, record: SessionEventRecord) {
        let _ = self.sender.send(record);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEventRecord> {
        self.sender.subscribe()
    }

    pub fn subscribe_stream(&self) -> BroadcastStream<SessionEventRecord> {
        BroadcastStream::new(self.sender.subscribe())
    }
}

impl Default for SessionEventHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use switchboard_protocol::EventKind;

    #[tokio::test]
    async fn subscribers_observe_published_events() {
        let hub = SessionEventHub::new(16);
        let mut receiver = hub.subscribe();

        hub.publish(SessionEventRecord {
            session_id: SessionId::from_string("s-1"),
            event: ConversationEvent::new(EventKind::AgentRouted, None, json!({})),
        });

        let record = receiver.recv().await.unwrap();
        assert_eq!(record.session_id.as_str(), "s-1");
        assert_eq!(record.event.kind, EventKind::AgentRouted);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_silent() {
        let hub = SessionEventHub::new(16);
        hub.publish(SessionEventRecord {
            session_id: SessionId::from_string("s-1"),
            event: ConversationEvent::new(EventKind::Error, None, json!({})),
        });
    }
}
