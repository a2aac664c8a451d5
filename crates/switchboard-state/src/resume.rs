//! Recovery of interrupted conversations from their last checkpoint.
//!
//! Resumable statuses are `timeout` and `in_progress`; `force` additionally
//! admits `error`. A `completed` session is never resumable, `force`
//! included.

use serde::Serialize;
use serde_json::json;
use switchboard_protocol::{
    CallDirection, Channel, ContactClass, ConversationCheckpoint, ConversationState, EventKind,
    RESUME_AGENT, ResumeError, SessionId, SessionStatus,
};
use tracing::{info, instrument, warn};

use crate::manager::ConversationStateManager;

/// Successful resume: the session is back in progress and the caller can
/// continue from the returned checkpoint.
#[derive(Debug, Clone)]
pub struct ResumedSession {
    pub session_id: SessionId,
    pub previous_status: SessionStatus,
    pub checkpoint: ConversationCheckpoint,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResumeOutcome {
    Resumed {
        #[serde(skip_serializing_if = "Option::is_none")]
        next_action: Option<String>,
    },
    Skipped {
        reason: String,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ResumeAttempt {
    pub session_id: SessionId,
    #[serde(flatten)]
    pub outcome: ResumeOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResumeReport {
    pub total_found: usize,
    pub resumed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub results: Vec<ResumeAttempt>,
}

/// Read-only checkpoint view for manual recovery tooling.
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointSummary {
    pub session_id: SessionId,
    pub channel: Channel,
    pub contact_identifier: String,
    pub contact_name: Option<String>,
    pub classification: Option<ContactClass>,
    pub call_direction: Option<CallDirection>,
    pub current_agent: String,
    pub next_action: Option<String>,
    pub context: serde_json::Value,
    pub pending_actions: Vec<String>,
    pub events_count: usize,
    pub last_event: Option<EventKind>,
}

#[derive(Clone)]
pub struct ResumeService {
    manager: ConversationStateManager,
}

impl ResumeService {
    pub fn new(manager: ConversationStateManager) -> Self {
        Self { manager }
    }

    /// Incomplete sessions within the age window, optionally narrowed by
    /// status and channel.
    pub async fn find_resumable_sessions(
        &self,
        status: Option<SessionStatus>,
        max_age_hours: i64,
        channel: Option<Channel>,
    ) -> Vec<ConversationState> {
        let sessions: Vec<_> = self
            .manager
            .find_incomplete_sessions(max_age_hours)
            .await
            .into_iter()
            .filter(|s| status.is_none_or(|wanted| s.status == wanted))
            .filter(|s| channel.is_none_or(|wanted| s.channel == wanted))
            .collect();
        info!(
            found = sessions.len(),
            status = ?status,
            channel = ?channel,
            "resumable session scan"
        );
        sessions
    }

    /// Resume one session from its last checkpoint. On success the session
    /// is back to `in_progress` with its timeout cleared, and the resume is
    /// recorded as an `agent_routed` event carrying the checkpoint snapshot.
    #[instrument(skip(self), fields(session_id = %session_id, force))]
    pub async fn resume_session(
        &self,
        session_id: &SessionId,
        force: bool,
    ) -> Result<ResumedSession, ResumeError> {
        let session = self
            .manager
            .get_session(session_id)
            .await
            .ok_or_else(|| ResumeError::NotFound(session_id.clone()))?;

        let resumable = match session.status {
            SessionStatus::Timeout | SessionStatus::InProgress => true,
            SessionStatus::Error => force,
            // Completed conversations stay completed.
            SessionStatus::Completed => false,
        };
        if !resumable {
            return Err(ResumeError::NotResumable {
                session_id: session_id.clone(),
                status: session.status,
            });
        }

        let checkpoint = session
            .last_checkpoint
            .clone()
            .ok_or_else(|| ResumeError::NoCheckpointAvailable(session_id.clone()))?;

        let logged = self
            .manager
            .log_event(
                session_id,
                EventKind::AgentRouted,
                Some(RESUME_AGENT),
                json!({
                    "action": "resume",
                    "previous_status": session.status.as_str(),
                    "checkpoint_timestamp": checkpoint.timestamp.to_rfc3339(),
                    "current_agent": checkpoint.current_agent,
                    "next_action": checkpoint.next_action,
                }),
                Some(checkpoint.clone()),
            )
            .await;
        if !logged {
            return Err(ResumeError::Failed {
                session_id: session_id.clone(),
                reason: "could not record resume event".to_owned(),
            });
        }

        // Reload so the status flip does not clobber the resume event.
        let mut fresh = self
            .manager
            .get_session(session_id)
            .await
            .ok_or_else(|| ResumeError::NotFound(session_id.clone()))?;
        fresh.reopen();
        match self.manager.repository().update(&fresh).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(ResumeError::NotFound(session_id.clone()));
            }
            Err(error) => {
                warn!(session_id = %session_id, %error, "resume status update failed");
                return Err(ResumeError::Failed {
                    session_id: session_id.clone(),
                    reason: error.to_string(),
                });
            }
        }

        info!(
            session_id = %session_id,
            current_agent = %checkpoint.current_agent,
            next_action = ?checkpoint.next_action,
            "session resumed from checkpoint"
        );
        Ok(ResumedSession {
            session_id: session_id.clone(),
            previous_status: session.status,
            checkpoint,
        })
    }

    /// Checkpoint data for manual restore; `None` when the session or its
    /// checkpoint is missing.
    pub async fn restore_checkpoint(&self, session_id: &SessionId) -> Option<CheckpointSummary> {
        let session = self.manager.get_session(session_id).await?;
        let checkpoint = session.last_checkpoint.as_ref()?;
        Some(CheckpointSummary {
            session_id: session.session_id.clone(),
            channel: session.channel,
            contact_identifier: session.contact_identifier.clone(),
            contact_name: session.contact_name.clone(),
            classification: session.classification,
            call_direction: session.call_direction,
            current_agent: checkpoint.current_agent.clone(),
            next_action: checkpoint.next_action.clone(),
            context: checkpoint.context.clone(),
            pending_actions: checkpoint.pending_actions.clone(),
            events_count: session.events.len(),
            last_event: session.events.last().map(|e| e.kind),
        })
    }

    /// Bulk-resume all eligible timed-out sessions. Sessions at the retry
    /// budget are reported as skipped and left untouched.
    #[instrument(skip(self))]
    pub async fn auto_resume_timeouts(
        &self,
        max_age_hours: i64,
        max_retries: usize,
    ) -> ResumeReport {
        let sessions = self
            .find_resumable_sessions(Some(SessionStatus::Timeout), max_age_hours, None)
            .await;

        let mut report = ResumeReport {
            total_found: sessions.len(),
            ..ResumeReport::default()
        };

        for session in sessions {
            let attempts = session.resume_attempts();
            if attempts >= max_retries {
                warn!(
                    session_id = %session.session_id,
                    attempts,
                    max_retries,
                    "skipping session at resume retry budget"
                );
                report.skipped += 1;
                report.results.push(ResumeAttempt {
                    session_id: session.session_id,
                    outcome: ResumeOutcome::Skipped {
                        reason: format!("exceeded max retries ({attempts}/{max_retries})"),
                    },
                });
                continue;
            }

            match self.resume_session(&session.session_id, false).await {
                Ok(resumed) => {
                    report.resumed += 1;
                    report.results.push(ResumeAttempt {
                        session_id: session.session_id,
                        outcome: ResumeOutcome::Resumed {
                            next_action: resumed.checkpoint.next_action,
                        },
                    });
                }
                Err(error) => {
                    report.failed += 1;
                    report.results.push(ResumeAttempt {
                        session_id: session.session_id,
                        outcome: ResumeOutcome::Failed {
                            reason: error.to_string(),
                        },
                    });
                }
            }
        }

        info!(
            total_found = report.total_found,
            resumed = report.resumed,
            failed = report.failed,
            skipped = report.skipped,
            "auto-resume complete"
        );
        report
    }

    /// Terminal opt-out: stop resuming this session and mark it errored.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn mark_abandoned(&self, session_id: &SessionId, reason: Option<&str>) -> bool {
        let reason = reason.unwrap_or("session abandoned after repeated resume attempts");
        self.manager
            .mark_error(
                session_id,
                json!({
                    "action": "mark_abandoned",
                    "abandoned": true,
                    "reason": reason,
                }),
            )
            .await
    }
}
