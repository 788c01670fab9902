//! Runtime agent registry.
//!
//! Maps workflow agent ids to `Agent` implementations. Provider adapters
//! register themselves at startup; a default agent can absorb ids with no
//! dedicated registration.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::Agent;

#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<dyn Agent>>>,
    default_agent: RwLock<Option<Arc<dyn Agent>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under an id, replacing any previous registration.
    pub async fn register(&self, agent_id: impl Into<String>, agent: Arc<dyn Agent>) {
        self.agents.write().await.insert(agent_id.into(), agent);
    }

    /// Set the fallback agent used when no id-specific agent exists.
    pub async fn set_default(&self, agent: Arc<dyn Agent>) {
        *self.default_agent.write().await = Some(agent);
    }

    /// Resolve an agent id, falling back to the default agent.
    pub async fn resolve(&self, agent_id: &str) -> DomainResult<Arc<dyn Agent>> {
        if let Some(agent) = self.agents.read().await.get(agent_id) {
            return Ok(agent.clone());
        }
        if let Some(agent) = self.default_agent.read().await.clone() {
            return Ok(agent);
        }
        Err(DomainError::AgentNotFound(agent_id.to_string()))
    }
}
