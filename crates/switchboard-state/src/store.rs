//! File-backed conversation-state repository.
//!
//! One pretty-printed JSON document per session under `<root>/sessions/`.
//! Read-modify-write operations take a per-session async lock so that
//! event-append and checkpoint-write are individually atomic.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use switchboard_protocol::{
    Channel, ConversationCheckpoint, ConversationEvent, ConversationState, SessionId,
    SessionStatus,
};
use tokio::fs;
use tracing::{debug, instrument, warn};

use crate::repository::{ConversationRepository, SessionStatistics, StatusBucket};

#[derive(Debug)]
pub struct FileStateRepository {
    root: PathBuf,
    write_locks: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileStateRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    fn session_path(&self, session_id: &SessionId) -> PathBuf {
        self.sessions_dir().join(format!("{session_id}.json"))
    }

    fn lock_for(&self, session_id: &SessionId) -> Arc<tokio::sync::Mutex<()>> {
        let mut guard = self.write_locks.lock();
        guard
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create sessions dir {parent:?}"))?;
        }
        Ok(())
    }

    async fn load(&self, session_id: &SessionId) -> Result<Option<ConversationState>> {
        let path = self.session_path(session_id);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed reading session file {path:?}"))?;
        let state = serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing session file {path:?}"))?;
        Ok(Some(state))
    }

    async fn save(&self, state: &ConversationState) -> Result<()> {
        let path = self.session_path(&state.session_id);
        Self::ensure_parent(&path).await?;
        let payload =
            serde_json::to_string_pretty(state).context("failed serializing session")?;
        fs::write(&path, payload)
            .await
            .with_context(|| format!("failed writing session file {path:?}"))?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<ConversationState>> {
        let dir = self.sessions_dir();
        if !fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&dir)
            .await
            .with_context(|| format!("failed listing sessions dir {dir:?}"))?;
        let mut states = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed reading session file {path:?}"))?;
            match serde_json::from_str::<ConversationState>(&raw) {
                Ok(state) => states.push(state),
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping unparseable session file");
                }
            }
        }
        Ok(states)
    }

    /// Read-modify-write under the session's lock. Returns `Ok(false)` when
    /// the session does not exist.
    async fn modify<F>(&self, session_id: &SessionId, mutate: F) -> Result<bool>
    where
        F: FnOnce(&mut ConversationState),
    {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let Some(mut state) = self.load(session_id).await? else {
            return Ok(false);
        };
        mutate(&mut state);
        state.updated_at = Utc::now();
        self.save(&state).await?;
        Ok(true)
    }
}

#[async_trait]
impl ConversationRepository for FileStateRepository {
    #[instrument(skip(self, state), fields(session_id = %state.session_id, channel = %state.channel))]
    async fn create(&self, state: &ConversationState) -> Result<()> {
        let lock = self.lock_for(&state.session_id);
        let _guard = lock.lock().await;

        let path = self.session_path(&state.session_id);
        if fs::try_exists(&path).await.unwrap_or(false) {
            bail!("session already exists: {}", state.session_id);
        }
        self.save(state).await?;
        debug!("session document created");
        Ok(())
    }

    async fn find_by_session_id(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<ConversationState>> {
        self.load(session_id).await
    }

    async fn find_by_email_id(&self, email_id: &str) -> Result<Option<ConversationState>> {
        let states = self.load_all().await?;
        Ok(states
            .into_iter()
            .find(|s| s.email_id.as_deref() == Some(email_id)))
    }

    async fn find_by_call_id(&self, call_id: &str) -> Result<Option<ConversationState>> {
        let states = self.load_all().await?;
        Ok(states
            .into_iter()
            .find(|s| s.call_id.as_deref() == Some(call_id)))
    }

    async fn find_by_thread_id(&self, thread_id: &str) -> Result<Option<ConversationState>> {
        let states = self.load_all().await?;
        Ok(states
            .into_iter()
            .filter(|s| s.thread_id.as_deref() == Some(thread_id))
            .max_by_key(|s| s.created_at))
    }

    async fn find_by_contact(
        &self,
        contact_identifier: &str,
        limit: usize,
        channel: Option<Channel>,
    ) -> Result<Vec<ConversationState>> {
        let mut states: Vec<_> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|s| s.contact_identifier == contact_identifier)
            .filter(|s| channel.is_none_or(|c| s.channel == c))
            .collect();
        states.sort_by_key(|s| std::cmp::Reverse(s.created_at));
        states.truncate(limit);
        Ok(states)
    }

    async fn find_by_status(
        &self,
        status: SessionStatus,
        limit: usize,
        channel: Option<Channel>,
    ) -> Result<Vec<ConversationState>> {
        let mut states: Vec<_> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|s| s.status == status)
            .filter(|s| channel.is_none_or(|c| s.channel == c))
            .collect();
        states.sort_by_key(|s| std::cmp::Reverse(s.created_at));
        states.truncate(limit);
        Ok(states)
    }

    async fn find_incomplete(&self, max_age: Duration) -> Result<Vec<ConversationState>> {
        let cutoff = Utc::now() - max_age;
        let mut states: Vec<_> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|s| {
                matches!(
                    s.status,
                    SessionStatus::InProgress | SessionStatus::Timeout
                ) && s.created_at >= cutoff
            })
            .collect();
        states.sort_by_key(|s| std::cmp::Reverse(s.created_at));
        Ok(states)
    }

    async fn update(&self, state: &ConversationState) -> Result<bool> {
        let lock = self.lock_for(&state.session_id);
        let _guard = lock.lock().await;

        let path = self.session_path(&state.session_id);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(false);
        }
        let mut refreshed = state.clone();
        refreshed.updated_at = Utc::now();
        self.save(&refreshed).await?;
        Ok(true)
    }

    async fn append_event(
        &self,
        session_id: &SessionId,
        event: ConversationEvent,
    ) -> Result<bool> {
        self.modify(session_id, |state| {
            state.add_event(event);
        })
        .await
    }

    async fn update_checkpoint(
        &self,
        session_id: &SessionId,
        checkpoint: ConversationCheckpoint,
    ) -> Result<bool> {
        self.modify(session_id, |state| state.set_checkpoint(checkpoint))
            .await
    }

    async fn mark_completed(&self, session_id: &SessionId) -> Result<bool> {
        self.modify(session_id, |state| state.mark_completed()).await
    }

    async fn mark_timeout(
        &self,
        session_id: &SessionId,
        timeout_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        self.modify(session_id, |state| state.mark_timeout(timeout_at))
            .await
    }

    async fn mark_error(&self, session_id: &SessionId, error_data: Value) -> Result<bool> {
        self.modify(session_id, |state| state.mark_error(error_data))
            .await
    }

    async fn statistics(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        channel: Option<Channel>,
    ) -> Result<SessionStatistics> {
        let start = start.unwrap_or_else(|| Utc::now() - Duration::days(30));
        let end = end.unwrap_or_else(Utc::now);

        let states: Vec<_> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|s| s.created_at >= start && s.created_at <= end)
            .filter(|s| channel.is_none_or(|c| s.channel == c))
            .collect();

        let mut by_status: HashMap<SessionStatus, Vec<&ConversationState>> = HashMap::new();
        for state in &states {
            by_status.entry(state.status).or_default().push(state);
        }

        let buckets = by_status
            .into_iter()
            .map(|(status, group)| {
                let count = group.len();
                let durations: Vec<f64> = group
                    .iter()
                    .filter_map(|s| s.metadata.processing_duration_ms)
                    .map(|d| d as f64)
                    .collect();
                let bucket = StatusBucket {
                    count,
                    avg_duration_ms: (!durations.is_empty())
                        .then(|| durations.iter().sum::<f64>() / durations.len() as f64),
                    avg_events: group.iter().map(|s| s.metadata.total_events as f64).sum::<f64>()
                        / count as f64,
                    avg_llm_calls: group.iter().map(|s| s.metadata.llm_calls as f64).sum::<f64>()
                        / count as f64,
                    total_tokens: group.iter().map(|s| s.metadata.total_tokens).sum(),
                };
                (status, bucket)
            })
            .collect::<HashMap<_, _>>();

        Ok(SessionStatistics {
            start,
            end,
            channel,
            total_conversations: states.len(),
            total_tokens: states.iter().map(|s| s.metadata.total_tokens).sum(),
            by_status: buckets,
        })
    }

    #[instrument(skip(self))]
    async fn delete_older_than(&self, age: Duration) -> Result<usize> {
        let cutoff = Utc::now() - age;
        let states = self.load_all().await?;
        let mut deleted = 0;
        for state in states {
            if state.status.is_terminal() && state.created_at < cutoff {
                let lock = self.lock_for(&state.session_id);
                let _guard = lock.lock().await;
                let path = self.session_path(&state.session_id);
                if fs::try_exists(&path).await.unwrap_or(false) {
                    fs::remove_file(&path)
                        .await
                        .with_context(|| format!("failed deleting session file {path:?}"))?;
                    deleted += 1;
                }
            }
        }
        debug!(deleted, "retention sweep complete");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use anyhow::Result;
    use serde_json::json;
    use switchboard_protocol::{ConversationEvent, EventKind, NewSession};
    use tokio::fs;

    use super::*;

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    fn email_state(email_id: &str, thread_id: &str) -> ConversationState {
        let spec = NewSession::email("client@example.com")
            .email_id(email_id)
            .thread_id(thread_id);
        let channel = spec.validate().unwrap();
        ConversationState::open(channel, spec)
    }

    #[tokio::test]
    async fn session_document_round_trips() -> Result<()> {
        let root = unique_test_root("switchboard-store-roundtrip");
        let repo = FileStateRepository::new(&root);

        let mut state = email_state("gmail-1", "t-1");
        state.add_event(ConversationEvent::new(
            EventKind::EmailReceived,
            None,
            json!({"subject": "quote"}),
        ));
        repo.create(&state).await?;

        let loaded = repo.find_by_session_id(&state.session_id).await?.unwrap();
        assert_eq!(loaded.session_id, state.session_id);
        assert_eq!(loaded.events.len(), 1);
        assert_eq!(loaded.metadata.total_events, 1);

        let err = repo.create(&state).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn append_event_preserves_metadata_invariant() -> Result<()> {
        let root = unique_test_root("switchboard-store-append");
        let repo = FileStateRepository::new(&root);

        let state = email_state("gmail-1", "t-1");
        repo.create(&state).await?;

        for i in 0..5 {
            let appended = repo
                .append_event(
                    &state.session_id,
                    ConversationEvent::new(
                        EventKind::AgentRouted,
                        Some("orchestrator".to_owned()),
                        json!({"step": i}),
                    ),
                )
                .await?;
            assert!(appended);
        }

        let loaded = repo.find_by_session_id(&state.session_id).await?.unwrap();
        assert_eq!(loaded.events.len(), 5);
        assert_eq!(loaded.metadata.total_events, loaded.events.len());
        Ok(())
    }

    #[tokio::test]
    async fn append_event_on_missing_session_reports_false() -> Result<()> {
        let root = unique_test_root("switchboard-store-missing");
        let repo = FileStateRepository::new(&root);

        let appended = repo
            .append_event(
                &SessionId::from_string("ghost"),
                ConversationEvent::new(EventKind::Error, None, json!({})),
            )
            .await?;
        assert!(!appended);
        Ok(())
    }

    #[tokio::test]
    async fn thread_lookup_returns_most_recent_session() -> Result<()> {
        let root = unique_test_root("switchboard-store-thread");
        let repo = FileStateRepository::new(&root);

        let older = email_state("gmail-1", "t-1");
        repo.create(&older).await?;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newer = email_state("gmail-2", "t-1");
        repo.create(&newer).await?;

        let found = repo.find_by_thread_id("t-1").await?.unwrap();
        assert_eq!(found.session_id, newer.session_id);

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn contact_lookup_filters_by_channel() -> Result<()> {
        let root = unique_test_root("switchboard-store-contact");
        let repo = FileStateRepository::new(&root);

        let email = email_state("gmail-1", "t-1");
        repo.create(&email).await?;

        let phone_spec = NewSession::phone("client@example.com").call_id("call-1");
        let channel = phone_spec.validate().unwrap();
        let phone = ConversationState::open(channel, phone_spec);
        repo.create(&phone).await?;

        let all = repo
            .find_by_contact("client@example.com", 10, None)
            .await?;
        assert_eq!(all.len(), 2);

        let email_only = repo
            .find_by_contact("client@example.com", 10, Some(Channel::Email))
            .await?;
        assert_eq!(email_only.len(), 1);
        assert_eq!(email_only[0].session_id, email.session_id);

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn mark_error_appends_one_event_and_flips_status() -> Result<()> {
        let root = unique_test_root("switchboard-store-error");
        let repo = FileStateRepository::new(&root);

        let state = email_state("gmail-1", "t-1");
        repo.create(&state).await?;
        repo.mark_error(&state.session_id, json!({"error": "boom"}))
            .await?;

        let loaded = repo.find_by_session_id(&state.session_id).await?.unwrap();
        assert_eq!(loaded.status, SessionStatus::Error);
        assert_eq!(loaded.events_by_kind(EventKind::Error).len(), 1);
        assert_eq!(loaded.metadata.total_events, loaded.events.len());

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn retention_sweep_spares_incomplete_sessions() -> Result<()> {
        let root = unique_test_root("switchboard-store-sweep");
        let repo = FileStateRepository::new(&root);

        let mut completed = email_state("gmail-1", "t-1");
        completed.mark_completed();
        completed.created_at = Utc::now() - Duration::days(120);
        repo.create(&completed).await?;

        let mut stale_open = email_state("gmail-2", "t-2");
        stale_open.created_at = Utc::now() - Duration::days(120);
        repo.create(&stale_open).await?;

        let deleted = repo.delete_older_than(Duration::days(90)).await?;
        assert_eq!(deleted, 1);
        assert!(
            repo.find_by_session_id(&completed.session_id)
                .await?
                .is_none()
        );
        assert!(
            repo.find_by_session_id(&stale_open.session_id)
                .await?
                .is_some()
        );

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn statistics_buckets_by_status() -> Result<()> {
        let root = unique_test_root("switchboard-store-stats");
        let repo = FileStateRepository::new(&root);

        let mut done = email_state("gmail-1", "t-1");
        done.add_event(ConversationEvent::new(
            EventKind::LlmCall,
            Some("orchestrator".to_owned()),
            json!({"total_tokens": 150}),
        ));
        done.mark_completed();
        repo.create(&done).await?;

        let open = email_state("gmail-2", "t-2");
        repo.create(&open).await?;

        let stats = repo.statistics(None, None, None).await?;
        assert_eq!(stats.total_conversations, 2);
        assert_eq!(stats.total_tokens, 150);
        assert_eq!(stats.by_status[&SessionStatus::Completed].count, 1);
        assert_eq!(stats.by_status[&SessionStatus::InProgress].count, 1);
        assert!(
            stats.by_status[&SessionStatus::Completed]
                .avg_duration_ms
                .is_some()
        );

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }
}
