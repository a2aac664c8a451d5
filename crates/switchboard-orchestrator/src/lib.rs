//! # switchboard-orchestrator — inbound contact routing
//!
//! The [`ConversationOrchestrator`] resolves or creates the session for each
//! inbound email or call, classifies it through the Classifier port, and
//! records the routing decision as an `agent_routed` event plus checkpoint.
//! [`SwitchboardBuilder`] wires a full deployment; [`ContactCache`] keeps
//! harvested contact identifiers per session with a TTL.

mod builder;
mod cache;
mod orchestrator;

pub use builder::{Switchboard, SwitchboardBuilder};
pub use cache::{CachedContact, ContactCache};
pub use orchestrator::{CallRoute, ConversationOrchestrator, EmailRoute, OrchestratorConfig};
