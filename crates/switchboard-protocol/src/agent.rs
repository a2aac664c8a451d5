//! Registry-facing agent identity types.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Inactive,
    Error,
}

/// Information about a registered agent. Owned by the registry; mutated only
/// through registry operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    pub agent_type: String,
    pub status: AgentStatus,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub metadata: IndexMap<String, String>,
}

impl AgentInfo {
    pub fn new(
        name: impl Into<String>,
        agent_type: impl Into<String>,
        capabilities: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            agent_type: agent_type.into(),
            status: AgentStatus::Active,
            registered_at: now,
            last_seen: now,
            capabilities,
            metadata: IndexMap::new(),
        }
    }
}
