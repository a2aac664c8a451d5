//! Conversation state — the durable record of one customer interaction.
//!
//! A session spans one or more channel-level triggers (emails in a thread, a
//! phone call) and is identified by an immutable [`SessionId`]. The event log
//! is append-only; the checkpoint is last-writer-wins. Aggregated metadata is
//! maintained inside [`ConversationState::add_event`] so that
//! `metadata.total_events == events.len()` holds at all times.

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::SessionError;
use crate::ids::{EventId, SessionId};

/// Agent name used on events written by the resume service.
pub const RESUME_AGENT: &str = "resume_service";
/// Agent name used on events written by the orchestrator.
pub const ORCHESTRATOR_AGENT: &str = "orchestrator";

/// Contact medium for a session. Determines which identity fields are
/// mandatory (`email_id` for email, `call_id` for phone).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Phone,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Phone => "phone",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Customer-type classification from the contact directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactClass {
    Client,
    Vendor,
    Lead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Timeout,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Timeout => "timeout",
            SessionStatus::Error => "error",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, SessionStatus::InProgress)
    }

    /// Statuses eligible for retention cleanup. `in_progress` and `timeout`
    /// sessions are resume candidates and are never swept.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Error)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    EmailReceived,
    CallReceived,
    AgentRouted,
    LlmCall,
    AgentClassification,
    WorkerCall,
    ResponseSent,
    CallTransferred,
    CheckpointCreated,
    Error,
    ContactInfoExtracted,
    AgentResponse,
    ConversationResumed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::EmailReceived => "email_received",
            EventKind::CallReceived => "call_received",
            EventKind::AgentRouted => "agent_routed",
            EventKind::LlmCall => "llm_call",
            EventKind::AgentClassification => "agent_classification",
            EventKind::WorkerCall => "worker_call",
            EventKind::ResponseSent => "response_sent",
            EventKind::CallTransferred => "call_transferred",
            EventKind::CheckpointCreated => "checkpoint_created",
            EventKind::Error => "error",
            EventKind::ContactInfoExtracted => "contact_info_extracted",
            EventKind::AgentResponse => "agent_response",
            EventKind::ConversationResumed => "conversation_resumed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in a session's append-only event log. Never mutated after
/// creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEvent {
    pub event_id: EventId,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub data: Value,
    /// State snapshot attached for resume auditing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<ConversationCheckpoint>,
}

impl ConversationEvent {
    pub fn new(kind: EventKind, agent_name: Option<String>, data: Value) -> Self {
        Self {
            event_id: EventId::new(),
            timestamp: Utc::now(),
            kind,
            agent_name,
            data,
            checkpoint: None,
        }
    }

    pub fn with_checkpoint(mut self, checkpoint: ConversationCheckpoint) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }
}

/// Snapshot of "where processing is" for a session. At most one is held per
/// session; a new checkpoint overwrites the previous one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationCheckpoint {
    pub timestamp: DateTime<Utc>,
    pub current_agent: String,
    pub state: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub pending_actions: Vec<String>,
}

impl ConversationCheckpoint {
    pub fn new(current_agent: impl Into<String>, state: SessionStatus) -> Self {
        Self {
            timestamp: Utc::now(),
            current_agent: current_agent.into(),
            state,
            next_action: None,
            context: Value::Null,
            pending_actions: Vec::new(),
        }
    }

    pub fn with_next_action(mut self, next_action: impl Into<String>) -> Self {
        self.next_action = Some(next_action.into());
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_pending_actions(mut self, pending_actions: Vec<String>) -> Self {
        self.pending_actions = pending_actions;
        self
    }
}

/// Aggregated counters, derived incrementally as events are appended. Never
/// independently authoritative.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationMetadata {
    pub total_events: usize,
    #[serde(default)]
    pub agents_involved: IndexSet<String>,
    pub llm_calls: u64,
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_duration_seconds: Option<i64>,
}

/// Parameters for opening a session. Channel-specific identifiers are
/// validated before a state is constructed.
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub channel: Option<Channel>,
    pub contact_identifier: String,
    pub contact_name: Option<String>,
    pub classification: Option<ContactClass>,
    pub email_id: Option<String>,
    pub thread_id: Option<String>,
    pub call_id: Option<String>,
    pub phone_number: Option<String>,
    pub call_direction: Option<CallDirection>,
}

impl NewSession {
    pub fn email(contact_identifier: impl Into<String>) -> Self {
        Self {
            channel: Some(Channel::Email),
            contact_identifier: contact_identifier.into(),
            ..Self::default()
        }
    }

    pub fn phone(contact_identifier: impl Into<String>) -> Self {
        Self {
            channel: Some(Channel::Phone),
            contact_identifier: contact_identifier.into(),
            ..Self::default()
        }
    }

    pub fn email_id(mut self, email_id: impl Into<String>) -> Self {
        self.email_id = Some(email_id.into());
        self
    }

    pub fn thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    pub fn phone_number(mut self, phone_number: impl Into<String>) -> Self {
        self.phone_number = Some(phone_number.into());
        self
    }

    pub fn call_direction(mut self, direction: CallDirection) -> Self {
        self.call_direction = Some(direction);
        self
    }

    pub fn contact_name(mut self, contact_name: impl Into<String>) -> Self {
        self.contact_name = Some(contact_name.into());
        self
    }

    pub fn classification(mut self, classification: ContactClass) -> Self {
        self.classification = Some(classification);
        self
    }

    /// Enforce the channel-specific identity requirements.
    pub fn validate(&self) -> Result<Channel, SessionError> {
        match self.channel {
            Some(Channel::Email) if self.email_id.is_none() => {
                Err(SessionError::InvalidChannelConfig {
                    channel: Channel::Email,
                    missing: "email_id",
                })
            }
            Some(Channel::Phone) if self.call_id.is_none() => {
                Err(SessionError::InvalidChannelConfig {
                    channel: Channel::Phone,
                    missing: "call_id",
                })
            }
            Some(channel) => Ok(channel),
            None => Err(SessionError::MissingChannel),
        }
    }
}

/// The aggregate root for one tracked customer interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub session_id: SessionId,
    pub channel: Channel,

    // Email-channel identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    // Phone-channel identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_direction: Option<CallDirection>,

    /// Email address or phone number — the canonical lookup key.
    pub contact_identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<ContactClass>,

    pub status: SessionStatus,
    #[serde(default)]
    pub events: Vec<ConversationEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checkpoint: Option<ConversationCheckpoint>,
    #[serde(default)]
    pub metadata: ConversationMetadata,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_at: Option<DateTime<Utc>>,
}

impl ConversationState {
    /// Open a new in-progress session. Callers are expected to have run
    /// [`NewSession::validate`] first; the channel passed here is the
    /// validated one.
    pub fn open(channel: Channel, spec: NewSession) -> Self {
        let now = Utc::now();
        Self {
            session_id: SessionId::new(),
            channel,
            email_id: spec.email_id,
            thread_id: spec.thread_id,
            call_id: spec.call_id,
            phone_number: spec.phone_number,
            call_direction: spec.call_direction,
            contact_identifier: spec.contact_identifier,
            contact_name: spec.contact_name,
            classification: spec.classification,
            status: SessionStatus::InProgress,
            events: Vec::new(),
            last_checkpoint: None,
            metadata: ConversationMetadata::default(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            timeout_at: None,
        }
    }

    /// Append an event and fold it into the aggregated metadata.
    pub fn add_event(&mut self, event: ConversationEvent) -> &ConversationEvent {
        if let Some(agent) = &event.agent_name {
            self.metadata.agents_involved.insert(agent.clone());
        }
        if event.kind == EventKind::LlmCall {
            self.metadata.llm_calls += 1;
            if let Some(tokens) = event.data.get("total_tokens").and_then(Value::as_u64) {
                self.metadata.total_tokens += tokens;
            }
        }
        self.events.push(event);
        self.metadata.total_events = self.events.len();
        self.updated_at = Utc::now();
        self.events.last().expect("event was just pushed")
    }

    /// Overwrite the last checkpoint.
    pub fn set_checkpoint(&mut self, checkpoint: ConversationCheckpoint) {
        self.last_checkpoint = Some(checkpoint);
        self.updated_at = Utc::now();
    }

    pub fn mark_completed(&mut self) {
        let now = Utc::now();
        self.status = SessionStatus::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
        self.metadata.processing_duration_ms =
            Some((now - self.created_at).num_milliseconds().max(0));
    }

    pub fn mark_timeout(&mut self, timeout_at: Option<DateTime<Utc>>) {
        let now = Utc::now();
        self.status = SessionStatus::Timeout;
        self.timeout_at = Some(timeout_at.unwrap_or(now));
        self.updated_at = now;
    }

    /// Flip to error status, appending a single diagnostic event.
    pub fn mark_error(&mut self, error_data: Value) {
        self.status = SessionStatus::Error;
        self.add_event(ConversationEvent::new(EventKind::Error, None, error_data));
    }

    /// Explicit resume: back to `in_progress` with the timeout cleared. The
    /// audit trail is the caller's responsibility (a resume event is logged
    /// by the resume service).
    pub fn reopen(&mut self) {
        self.status = SessionStatus::InProgress;
        self.timeout_at = None;
        self.updated_at = Utc::now();
    }

    pub fn events_by_kind(&self, kind: EventKind) -> Vec<&ConversationEvent> {
        self.events.iter().filter(|e| e.kind == kind).collect()
    }

    pub fn events_by_agent(&self, agent_name: &str) -> Vec<&ConversationEvent> {
        self.events
            .iter()
            .filter(|e| e.agent_name.as_deref() == Some(agent_name))
            .collect()
    }

    /// How many times the resume service has restarted this session.
    pub fn resume_attempts(&self) -> usize {
        self.events
            .iter()
            .filter(|e| {
                e.kind == EventKind::AgentRouted
                    && e.agent_name.as_deref() == Some(RESUME_AGENT)
                    && e.data.get("action").and_then(Value::as_str) == Some("resume")
            })
            .count()
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|completed| (completed - self.created_at).num_milliseconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn email_session() -> ConversationState {
        let spec = NewSession::email("client@example.com")
            .email_id("gmail-1")
            .thread_id("t-1");
        let channel = spec.validate().unwrap();
        ConversationState::open(channel, spec)
    }

    #[test]
    fn email_session_requires_email_id() {
        let err = NewSession::email("client@example.com").validate().unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidChannelConfig {
                channel: Channel::Email,
                missing: "email_id"
            }
        ));
    }

    #[test]
    fn phone_session_requires_call_id() {
        let err = NewSession::phone("+13055551234").validate().unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidChannelConfig {
                channel: Channel::Phone,
                missing: "call_id"
            }
        ));
    }

    #[test]
    fn metadata_tracks_event_count_and_agents() {
        let mut state = email_session();
        state.add_event(ConversationEvent::new(
            EventKind::EmailReceived,
            None,
            json!({}),
        ));
        state.add_event(ConversationEvent::new(
            EventKind::AgentRouted,
            Some("orchestrator".to_owned()),
            json!({"target_agent": "scheduling"}),
        ));
        state.add_event(ConversationEvent::new(
            EventKind::ResponseSent,
            Some("scheduling".to_owned()),
            json!({}),
        ));

        assert_eq!(state.metadata.total_events, state.events.len());
        assert_eq!(state.metadata.total_events, 3);
        let agents: Vec<_> = state.metadata.agents_involved.iter().cloned().collect();
        assert_eq!(agents, vec!["orchestrator", "scheduling"]);
    }

    #[test]
    fn llm_call_events_accumulate_tokens() {
        let mut state = email_session();
        state.add_event(ConversationEvent::new(
            EventKind::LlmCall,
            Some("orchestrator".to_owned()),
            json!({"total_tokens": 120}),
        ));
        state.add_event(ConversationEvent::new(
            EventKind::LlmCall,
            Some("scheduling".to_owned()),
            json!({"total_tokens": 80}),
        ));
        assert_eq!(state.metadata.llm_calls, 2);
        assert_eq!(state.metadata.total_tokens, 200);
    }

    #[test]
    fn mark_completed_records_duration() {
        let mut state = email_session();
        state.mark_completed();
        assert_eq!(state.status, SessionStatus::Completed);
        assert!(state.completed_at.is_some());
        assert!(state.metadata.processing_duration_ms.is_some());
        assert_eq!(state.duration_ms(), state.metadata.processing_duration_ms);
    }

    #[test]
    fn mark_error_appends_exactly_one_diagnostic_event() {
        let mut state = email_session();
        state.mark_error(json!({"error": "classification failed", "step": "routing"}));
        assert_eq!(state.status, SessionStatus::Error);
        let errors = state.events_by_kind(EventKind::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].data["step"], "routing");
    }

    #[test]
    fn reopen_clears_timeout() {
        let mut state = email_session();
        state.mark_timeout(None);
        assert_eq!(state.status, SessionStatus::Timeout);
        assert!(state.timeout_at.is_some());

        state.reopen();
        assert_eq!(state.status, SessionStatus::InProgress);
        assert!(state.timeout_at.is_none());
    }

    #[test]
    fn resume_attempts_counts_only_resume_service_routings() {
        let mut state = email_session();
        state.add_event(ConversationEvent::new(
            EventKind::AgentRouted,
            Some(RESUME_AGENT.to_owned()),
            json!({"action": "resume"}),
        ));
        state.add_event(ConversationEvent::new(
            EventKind::AgentRouted,
            Some(ORCHESTRATOR_AGENT.to_owned()),
            json!({"target_agent": "billing"}),
        ));
        state.add_event(ConversationEvent::new(
            EventKind::AgentRouted,
            Some(RESUME_AGENT.to_owned()),
            json!({"action": "resume"}),
        ));
        assert_eq!(state.resume_attempts(), 2);
    }

    #[test]
    fn checkpoint_is_overwritten_not_appended() {
        let mut state = email_session();
        state.set_checkpoint(
            ConversationCheckpoint::new("orchestrator", SessionStatus::InProgress)
                .with_next_action("scheduling"),
        );
        state.set_checkpoint(
            ConversationCheckpoint::new("scheduling", SessionStatus::InProgress)
                .with_next_action("billing"),
        );
        let checkpoint = state.last_checkpoint.as_ref().unwrap();
        assert_eq!(checkpoint.current_agent, "scheduling");
        assert_eq!(checkpoint.next_action.as_deref(), Some("billing"));
    }

    #[test]
    fn state_serde_roundtrip() {
        let mut state = email_session();
        state.add_event(ConversationEvent::new(
            EventKind::EmailReceived,
            None,
            json!({"subject": "quote request"}),
        ));
        let json = serde_json::to_string(&state).unwrap();
        let back: ConversationState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.session_id, state.session_id);
        assert_eq!(back.events.len(), 1);
        assert_eq!(back.metadata.total_events, 1);
    }
}
