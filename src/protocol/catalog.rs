use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Display metadata for one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
}

/// Agents the service knows about, split by availability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCatalog {
    pub configured_agents: Vec<String>,
    pub available_agents: Vec<String>,
    pub unavailable_agents: Vec<String>,
    #[serde(default)]
    pub agent_details: Vec<AgentInfo>,
}

impl AgentCatalog {
    #[must_use]
    pub fn is_available(&self, agent_id: &str) -> bool {
        self.available_agents.iter().any(|id| id == agent_id)
    }

    /// Display name for `agent_id`, or `"<id> assistant"` when none is listed.
    #[must_use]
    pub fn display_name(&self, agent_id: &str) -> String {
        self.agent_details
            .iter()
            .find(|info| info.id == agent_id && !info.name.trim().is_empty())
            .map_or_else(|| format!("{agent_id} assistant"), |info| info.name.clone())
    }
}

/// Model names grouped by provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCatalog {
    pub models: BTreeMap<String, Vec<String>>,
}

impl ModelCatalog {
    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    #[must_use]
    pub fn models_for(&self, provider: &str) -> &[String] {
        self.models.get(provider).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn contains(&self, provider: &str, model: &str) -> bool {
        self.models_for(provider).iter().any(|m| m == model)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    #[serde(default)]
    pub message: String,
}

impl HealthStatus {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}
