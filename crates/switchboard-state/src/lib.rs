//! # switchboard-state — conversation-state engine
//!
//! The durable record of customer interactions: a repository boundary with a
//! file-backed implementation, the [`ConversationStateManager`] façade that
//! is the sole mutation path, a broadcast hub over the event log, and the
//! [`ResumeService`] that restarts interrupted sessions from their last
//! checkpoint.

mod hub;
mod manager;
mod repository;
mod resume;
mod store;

pub use hub::{SessionEventHub, SessionEventRecord};
pub use manager::ConversationStateManager;
pub use repository::{ConversationRepository, SessionStatistics, StatusBucket};
pub use resume::{
    CheckpointSummary, ResumeAttempt, ResumeOutcome, ResumeReport, ResumeService, ResumedSession,
};
pub use store::FileStateRepository;
