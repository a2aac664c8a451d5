//! # switchboard-bus — in-process agent communication
//!
//! Per-agent FIFO mailboxes with targeted and broadcast delivery
//! ([`MessageBus`]) and a status/liveness directory ([`AgentRegistry`]).
//! These are the only two shared mutable structures in the Switchboard core;
//! all mutation goes through their APIs.

mod bus;
mod registry;

pub use bus::MessageBus;
pub use registry::AgentRegistry;
