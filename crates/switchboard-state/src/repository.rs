//! Repository boundary for conversation-state persistence.
//!
//! The manager is the sole caller; any backend that supports
//! read-modify-write by session id can implement this. Boolean returns
//! follow "was anything modified" semantics — `Ok(false)` means the session
//! does not exist, `Err` means the backend itself failed.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use switchboard_protocol::{
    Channel, ConversationCheckpoint, ConversationEvent, ConversationState, SessionId,
    SessionStatus,
};

/// Per-status aggregates over a statistics window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusBucket {
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_duration_ms: Option<f64>,
    pub avg_events: f64,
    pub avg_llm_calls: f64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatistics {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    pub total_conversations: usize,
    pub total_tokens: u64,
    pub by_status: HashMap<SessionStatus, StatusBucket>,
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn create(&self, state: &ConversationState) -> Result<()>;

    async fn find_by_session_id(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<ConversationState>>;
    async fn find_by_email_id(&self, email_id: &str) -> Result<Option<ConversationState>>;
    async fn find_by_call_id(&self, call_id: &str) -> Result<Option<ConversationState>>;
    /// Most recently created session for the thread.
    async fn find_by_thread_id(&self, thread_id: &str) -> Result<Option<ConversationState>>;
    /// Sessions for a contact, newest first.
    async fn find_by_contact(
        &self,
        contact_identifier: &str,
        limit: usize,
        channel: Option<Channel>,
    ) -> Result<Vec<ConversationState>>;
    async fn find_by_status(
        &self,
        status: SessionStatus,
        limit: usize,
        channel: Option<Channel>,
    ) -> Result<Vec<ConversationState>>;
    /// Incomplete (`in_progress` or `timeout`) sessions created within the
    /// age window — the resume candidates.
    async fn find_incomplete(&self, max_age: Duration) -> Result<Vec<ConversationState>>;

    /// Replace the stored session. `updated_at` is refreshed on write.
    async fn update(&self, state: &ConversationState) -> Result<bool>;
    /// Append one event atomically (a partial append must never corrupt the
    /// log).
    async fn append_event(&self, session_id: &SessionId, event: ConversationEvent)
    -> Result<bool>;
    /// Overwrite the last checkpoint atomically.
    async fn update_checkpoint(
        &self,
        session_id: &SessionId,
        checkpoint: ConversationCheckpoint,
    ) -> Result<bool>;
    async fn mark_completed(&self, session_id: &SessionId) -> Result<bool>;
    async fn mark_timeout(
        &self,
        session_id: &SessionId,
        timeout_at: Option<DateTime<Utc>>,
    ) -> Result<bool>;
    /// Flip to error status and append the single diagnostic event in one
    /// atomic read-modify-write.
    async fn mark_error(&self, session_id: &SessionId, error_data: Value) -> Result<bool>;

    async fn statistics(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        channel: Option<Channel>,
    ) -> Result<SessionStatistics>;
    /// Retention sweep: delete terminal sessions older than `age`. Returns
    /// the number deleted. `in_progress`/`timeout` sessions are never swept.
    async fn delete_older_than(&self, age: Duration) -> Result<usize>;
}
