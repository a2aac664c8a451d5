//! Error taxonomy for the Switchboard core.
//!
//! Bus and session-start failures are fatal to the call that made them;
//! collaborator failures (classification, generation, escalation) are caught
//! at the orchestrator/agent boundary and recorded; resume failures are
//! per-session results that never abort a batch.

use thiserror::Error;

use crate::conversation::{Channel, SessionStatus};
use crate::ids::SessionId;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("agent '{0}' is not registered on the bus")]
    UnknownAgent(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{channel} sessions require {missing}")]
    InvalidChannelConfig {
        channel: Channel,
        missing: &'static str,
    },
    #[error("a channel must be specified to start a session")]
    MissingChannel,
    #[error("session not found: {0}")]
    NotFound(SessionId),
    #[error("repository error: {0}")]
    Repository(String),
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("no intent prompt loaded")]
    MissingPrompt,
    #[error("classification failed: {0}")]
    Failed(String),
    #[error("classifier output could not be repaired: {0}")]
    MalformedOutput(String),
}

#[derive(Debug, Error)]
#[error("text generation failed: {0}")]
pub struct GenerateError(pub String);

#[derive(Debug, Error)]
#[error("escalation transport failed: {0}")]
pub struct EscalationError(pub String);

#[derive(Debug, Error)]
pub enum ResumeError {
    #[error("session not found: {0}")]
    NotFound(SessionId),
    #[error("no checkpoint available for session {0}")]
    NoCheckpointAvailable(SessionId),
    #[error("session {session_id} is {status}, cannot resume")]
    NotResumable {
        session_id: SessionId,
        status: SessionStatus,
    },
    #[error("resume failed for session {session_id}: {reason}")]
    Failed {
        session_id: SessionId,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_channel_config_names_the_missing_field() {
        let err = SessionError::InvalidChannelConfig {
            channel: Channel::Email,
            missing: "email_id",
        };
        assert_eq!(err.to_string(), "email sessions require email_id");
    }

    #[test]
    fn not_resumable_names_the_status() {
        let err = ResumeError::NotResumable {
            session_id: SessionId::from_string("s-1"),
            status: SessionStatus::Completed,
        };
        assert_eq!(err.to_string(), "session s-1 is completed, cannot resume");
    }
}
