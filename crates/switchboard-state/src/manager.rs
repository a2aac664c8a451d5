//! High-level API for conversation tracking — the sole mutation path for
//! conversation state.
//!
//! Lifecycle operations return `bool`: a logging or persistence hiccup is
//! recorded and reported as failure, but never aborts the caller's primary
//! workflow. Session start is the exception — a session that cannot be
//! created is a hard error.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use switchboard_protocol::{
    Channel, ConversationCheckpoint, ConversationEvent, ConversationState, EventKind, NewSession,
    SessionError, SessionId, SessionStatus,
};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::hub::{SessionEventHub, SessionEventRecord};
use crate::repository::{ConversationRepository, SessionStatistics};

#[derive(Clone)]
pub struct ConversationStateManager {
    repo: Arc<dyn ConversationRepository>,
    hub: SessionEventHub,
}

impl ConversationStateManager {
    pub fn new(repo: Arc<dyn ConversationRepository>) -> Self {
        Self::with_hub(repo, SessionEventHub::default())
    }

    pub fn with_hub(repo: Arc<dyn ConversationRepository>, hub: SessionEventHub) -> Self {
        Self { repo, hub }
    }

    pub fn repository(&self) -> &Arc<dyn ConversationRepository> {
        &self.repo
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEventRecord> {
        self.hub.subscribe()
    }

    pub fn hub(&self) -> &SessionEventHub {
        &self.hub
    }

    /// Start a new conversation session. Validates the channel-specific
    /// identifiers, appends the initial `email_received`/`call_received`
    /// event, and persists the new state.
    #[instrument(
        skip(self, spec, initial_data),
        fields(channel = ?spec.channel, contact = %spec.contact_identifier)
    )]
    pub async fn start_session(
        &self,
        spec: NewSession,
        initial_data: Value,
    ) -> Result<SessionId, SessionError> {
        let channel = spec.validate()?;
        let mut state = ConversationState::open(channel, spec);

        let kind = match channel {
            Channel::Email => EventKind::EmailReceived,
            Channel::Phone => EventKind::CallReceived,
        };
        let event = ConversationEvent::new(kind, None, initial_data);
        let record = SessionEventRecord {
            session_id: state.session_id.clone(),
            event: event.clone(),
        };
        state.add_event(event);

        self.repo
            .create(&state)
            .await
            .map_err(|error| SessionError::Repository(error.to_string()))?;
        self.hub.publish(record);

        info!(
            session_id = %state.session_id,
            channel = %channel,
            "conversation session started"
        );
        Ok(state.session_id)
    }

    /// Append one event to the session's log. Returns `false` (and logs)
    /// rather than failing the caller.
    pub async fn log_event(
        &self,
        session_id: &SessionId,
        kind: EventKind,
        agent_name: Option<&str>,
        data: Value,
        checkpoint: Option<ConversationCheckpoint>,
    ) -> bool {
        let mut event = ConversationEvent::new(kind, agent_name.map(str::to_owned), data);
        if let Some(checkpoint) = checkpoint {
            event = event.with_checkpoint(checkpoint);
        }
        let record = SessionEventRecord {
            session_id: session_id.clone(),
            event: event.clone(),
        };

        match self.repo.append_event(session_id, event).await {
            Ok(true) => {
                self.hub.publish(record);
                debug!(session_id = %session_id, kind = %kind, "event logged");
                true
            }
            Ok(false) => {
                warn!(session_id = %session_id, kind = %kind, "event not logged: unknown session");
                false
            }
            Err(error) => {
                warn!(session_id = %session_id, kind = %kind, %error, "event not logged");
                false
            }
        }
    }

    /// Overwrite the session's last checkpoint.
    pub async fn create_checkpoint(
        &self,
        session_id: &SessionId,
        current_agent: &str,
        state: SessionStatus,
        next_action: Option<&str>,
        context: Value,
        pending_actions: Vec<String>,
    ) -> bool {
        let mut checkpoint = ConversationCheckpoint::new(current_agent, state)
            .with_context(context)
            .with_pending_actions(pending_actions);
        if let Some(next_action) = next_action {
            checkpoint = checkpoint.with_next_action(next_action);
        }

        match self.repo.update_checkpoint(session_id, checkpoint).await {
            Ok(true) => {
                debug!(session_id = %session_id, "checkpoint written");
                true
            }
            Ok(false) => {
                warn!(session_id = %session_id, "checkpoint not written: unknown session");
                false
            }
            Err(error) => {
                warn!(session_id = %session_id, %error, "checkpoint not written");
                false
            }
        }
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn complete_session(&self, session_id: &SessionId) -> bool {
        match self.repo.mark_completed(session_id).await {
            Ok(modified) => {
                if modified {
                    info!(session_id = %session_id, "session completed");
                }
                modified
            }
            Err(error) => {
                warn!(session_id = %session_id, %error, "failed to complete session");
                false
            }
        }
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn mark_timeout(
        &self,
        session_id: &SessionId,
        timeout_at: Option<DateTime<Utc>>,
    ) -> bool {
        match self.repo.mark_timeout(session_id, timeout_at).await {
            Ok(modified) => {
                if modified {
                    info!(session_id = %session_id, "session timed out");
                }
                modified
            }
            Err(error) => {
                warn!(session_id = %session_id, %error, "failed to mark timeout");
                false
            }
        }
    }

    /// Flip the session to error status with a diagnostic event.
    #[instrument(skip(self, error_data), fields(session_id = %session_id))]
    pub async fn mark_error(&self, session_id: &SessionId, error_data: Value) -> bool {
        match self.repo.mark_error(session_id, error_data).await {
            Ok(modified) => {
                if modified {
                    info!(session_id = %session_id, "session marked as error");
                }
                modified
            }
            Err(error) => {
                warn!(session_id = %session_id, %error, "failed to mark error");
                false
            }
        }
    }

    pub async fn get_session(&self, session_id: &SessionId) -> Option<ConversationState> {
        match self.repo.find_by_session_id(session_id).await {
            Ok(state) => state,
            Err(error) => {
                warn!(session_id = %session_id, %error, "session lookup failed");
                None
            }
        }
    }

    pub async fn get_session_by_email(&self, email_id: &str) -> Option<ConversationState> {
        match self.repo.find_by_email_id(email_id).await {
            Ok(state) => state,
            Err(error) => {
                warn!(email_id, %error, "session lookup by email failed");
                None
            }
        }
    }

    pub async fn get_session_by_call(&self, call_id: &str) -> Option<ConversationState> {
        match self.repo.find_by_call_id(call_id).await {
            Ok(state) => state,
            Err(error) => {
                warn!(call_id, %error, "session lookup by call failed");
                None
            }
        }
    }

    /// Most recently created session for an email thread.
    pub async fn get_session_by_thread(&self, thread_id: &str) -> Option<ConversationState> {
        match self.repo.find_by_thread_id(thread_id).await {
            Ok(state) => state,
            Err(error) => {
                warn!(thread_id, %error, "session lookup by thread failed");
                None
            }
        }
    }

    pub async fn contact_history(
        &self,
        contact_identifier: &str,
        limit: usize,
        channel: Option<Channel>,
    ) -> Vec<ConversationState> {
        match self
            .repo
            .find_by_contact(contact_identifier, limit, channel)
            .await
        {
            Ok(states) => states,
            Err(error) => {
                warn!(contact_identifier, %error, "contact history lookup failed");
                Vec::new()
            }
        }
    }

    /// Incomplete sessions created within the last `max_age_hours` —
    /// candidates for resume.
    pub async fn find_incomplete_sessions(&self, max_age_hours: i64) -> Vec<ConversationState> {
        match self.repo.find_incomplete(Duration::hours(max_age_hours)).await {
            Ok(states) => states,
            Err(error) => {
                warn!(max_age_hours, %error, "incomplete-session scan failed");
                Vec::new()
            }
        }
    }

    pub async fn statistics(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        channel: Option<Channel>,
    ) -> Option<SessionStatistics> {
        match self.repo.statistics(start, end, channel).await {
            Ok(stats) => Some(stats),
            Err(error) => {
                warn!(%error, "statistics aggregation failed");
                None
            }
        }
    }

    /// Delete terminal sessions older than `days_old` days.
    #[instrument(skip(self))]
    pub async fn cleanup_old_sessions(&self, days_old: i64) -> usize {
        match self.repo.delete_older_than(Duration::days(days_old)).await {
            Ok(deleted) => {
                info!(deleted, "cleaned up old conversation sessions");
                deleted
            }
            Err(error) => {
                warn!(%error, "session cleanup failed");
                0
            }
        }
    }
}
