//! Agent directory, independent of message delivery.
//!
//! Pure bookkeeping: identity, capabilities, and liveness. Mutation failures
//! are never fatal to the caller — updates on unknown agents are silent
//! no-ops.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use switchboard_protocol::{AgentInfo, AgentStatus};
use tracing::debug;

#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: Arc<RwLock<HashMap<String, AgentInfo>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert by name.
    pub fn register(&self, info: AgentInfo) {
        debug!(agent = %info.name, agent_type = %info.agent_type, "registering agent");
        self.agents.write().insert(info.name.clone(), info);
    }

    /// Remove; no-op if absent.
    pub fn unregister(&self, agent_name: &str) {
        self.agents.write().remove(agent_name);
    }

    pub fn get(&self, agent_name: &str) -> Option<AgentInfo> {
        self.agents.read().get(agent_name).cloned()
    }

    /// All entries, optionally filtered by status.
    pub fn list(&self, status: Option<AgentStatus>) -> Vec<AgentInfo> {
        let agents = self.agents.read();
        let mut listed: Vec<AgentInfo> = agents
            .values()
            .filter(|info| status.is_none_or(|s| info.status == s))
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        listed
    }

    pub fn update_status(&self, agent_name: &str, status: AgentStatus) {
        if let Some(info) = self.agents.write().get_mut(agent_name) {
            info.status = status;
            info.last_seen = Utc::now();
        }
    }

    /// Refresh `last_seen`; no-op if the agent is unknown.
    pub fn heartbeat(&self, agent_name: &str) {
        if let Some(info) = self.agents.write().get_mut(agent_name) {
            info.last_seen = Utc::now();
        }
    }
}
