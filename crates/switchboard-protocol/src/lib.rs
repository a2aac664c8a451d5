//! # switchboard-protocol — shared Switchboard contract
//!
//! Defines the types, error taxonomy, and collaborator ports every
//! Switchboard crate depends on. Intentionally dependency-light (no tokio)
//! so it can be used as a pure contract crate.
//!
//! ## Module overview
//!
//! - [`ids`] — typed ID wrappers (SessionId, EventId, MessageId)
//! - [`message`] — bus Message + MessageKind
//! - [`agent`] — AgentInfo + AgentStatus registry types
//! - [`conversation`] — ConversationState aggregate, events, checkpoints
//! - [`ports`] — collaborator boundary traits (classifier, generator,
//!   directory, escalation) and their request/response types
//! - [`error`] — domain error taxonomy

pub mod agent;
pub mod conversation;
pub mod error;
pub mod ids;
pub mod message;
pub mod ports;

pub use agent::{AgentInfo, AgentStatus};
pub use conversation::{
    CallDirection, Channel, ContactClass, ConversationCheckpoint, ConversationEvent,
    ConversationMetadata, ConversationState, EventKind, NewSession, ORCHESTRATOR_AGENT,
    RESUME_AGENT, SessionStatus,
};
pub use error::{
    BusError, ClassifyError, EscalationError, GenerateError, ResumeError, SessionError,
};
pub use ids::{EventId, MessageId, SessionId};
pub use message::{Message, MessageKind};
pub use ports::{
    Classifier, ClassifierOutput, Contact, ContactDirectory, EscalationTransport, PromptTemplate,
    RoutingDecision, TextGenerator, TokenUsage, TransferOutcome, TransferRequest, TransferStatus,
};
