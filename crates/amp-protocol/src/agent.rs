use serde::{Deserialize, Serialize};

/// Lifecycle status of an agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Busy,
    Terminating,
}

/// Descriptor for an agent process, published by its host node into the
/// node's gossiped metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub agent_id: String,
    pub name: String,
    pub capabilities: Vec<String>,
    pub status: AgentStatus,
}

impl AgentDescriptor {
    pub fn new(name: impl Into<String>, capabilities: Vec<String>) -> Self {
        Self {
            agent_id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            capabilities,
            status: AgentStatus::Idle,
        }
    }
}
