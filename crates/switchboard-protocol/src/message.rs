//! Bus message types.
//!
//! A [`Message`] is immutable once constructed: ownership moves into the bus
//! on send and out to the receiving agent on dequeue. `to_agent = None` means
//! broadcast to every registered agent except the sender.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::MessageId;

/// Message types for agent communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Agent hello/registration.
    Greeting,
    /// Request for action.
    Request,
    /// Response to a request.
    Response,
    /// Event notification.
    Notification,
    /// Error notification.
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub kind: MessageKind,
    pub from_agent: String,
    /// `None` means broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_agent: Option<String>,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    /// Ties a response back to the request it answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<MessageId>,
}

impl Message {
    /// A message targeted at one agent.
    pub fn to(
        kind: MessageKind,
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: MessageId::new(),
            kind,
            from_agent: from_agent.into(),
            to_agent: Some(to_agent.into()),
            payload,
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    /// A message for every registered agent except the sender.
    pub fn broadcast(kind: MessageKind, from_agent: impl Into<String>, payload: Value) -> Self {
        Self {
            id: MessageId::new(),
            kind,
            from_agent: from_agent.into(),
            to_agent: None,
            payload,
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    pub fn with_correlation(mut self, correlation_id: MessageId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.to_agent.is_none()
    }
}
