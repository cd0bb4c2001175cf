use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::{
    agent::{core::base_agent::AgentBehavior, types::AgentType},
    error::{Error, Result, agent_error::AgentError},
    multi_agent::registry::agent_handle::{AgentHandle, AgentStats},
};

/// Maps each worker type to the one live worker handling it.
#[derive(Default)]
pub struct AgentRegistry {
    agents: Arc<RwLock<HashMap<AgentType, AgentHandle>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files `agent` under its declared type and starts its mailbox. A worker
    /// already registered for that type is replaced and its mailbox closed
    /// once drained; the replaced handle is returned.
    pub async fn register(&self, agent: Arc<dyn AgentBehavior>) -> Option<AgentHandle> {
        let agent_type = agent.agent_type();
        let agent_id = agent.get_id().to_string();
        let handle = AgentHandle::spawn(agent);

        let previous = self.agents.write().await.insert(agent_type, handle);

        if let Some(old) = &previous {
            warn!(
                "Agent {} replaced {} as {}",
                agent_id,
                old.agent_id(),
                agent_type
            );
            old.close().await;
        } else {
            info!("Agent {} registered as {}", agent_id, agent_type);
        }
        previous
    }

    pub async fn unregister(&self, agent_type: AgentType) -> Result<()> {
        let handle = self
            .agents
            .write()
            .await
            .remove(&agent_type)
            .ok_or(Error::AgentError(AgentError::AgentNotFound(agent_type)))?;

        handle.close().await;
        info!("Agent {} unregistered from {}", handle.agent_id(), agent_type);
        Ok(())
    }

    /// Looks up the worker for `agent_type`. Absence is an ordinary answer.
    pub async fn resolve(&self, agent_type: AgentType) -> Option<AgentHandle> {
        self.agents.read().await.get(&agent_type).cloned()
    }

    /// Splits `types` into resolvable handles and the types nobody serves.
    /// Duplicates in `types` are collapsed.
    pub async fn resolve_all(&self, types: &[AgentType]) -> (Vec<AgentHandle>, Vec<AgentType>) {
        let agents = self.agents.read().await;
        let mut seen = BTreeSet::new();
        let mut resolved = Vec::new();
        let mut missing = Vec::new();

        for agent_type in types {
            if !seen.insert(*agent_type) {
                continue;
            }
            match agents.get(agent_type) {
                Some(handle) => resolved.push(handle.clone()),
                None => missing.push(*agent_type),
            }
        }
        (resolved, missing)
    }

    pub async fn registered_types(&self) -> BTreeSet<AgentType> {
        self.agents.read().await.keys().copied().collect()
    }

    pub async fn all_handles(&self) -> Vec<AgentHandle> {
        let agents = self.agents.read().await;
        let mut handles: Vec<AgentHandle> = agents.values().cloned().collect();
        handles.sort_by_key(|h| h.agent_type());
        handles
    }

    /// Liveness of every registered worker.
    pub async fn liveness(&self) -> BTreeMap<AgentType, bool> {
        self.agents
            .read()
            .await
            .iter()
            .map(|(agent_type, handle)| (*agent_type, handle.is_alive()))
            .collect()
    }

    /// Closes and removes every worker.
    pub async fn clear(&self) {
        let drained: Vec<AgentHandle> = self.agents.write().await.drain().map(|(_, h)| h).collect();
        for handle in drained {
            handle.close().await;
        }
    }

    pub async fn get_stats(&self) -> RegistryStats {
        let agents = self.agents.read().await;
        let alive = agents.values().filter(|h| h.is_alive()).count();
        let per_agent = agents
            .iter()
            .map(|(agent_type, handle)| (*agent_type, handle.stats()))
            .collect();
        let statuses = agents
            .iter()
            .map(|(agent_type, handle)| (*agent_type, handle.agent().get_status()))
            .collect();

        RegistryStats {
            total_agents: agents.len(),
            alive_agents: alive,
            per_agent,
            statuses,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_agents: usize,
    pub alive_agents: usize,
    pub per_agent: BTreeMap<AgentType, AgentStats>,
    /// What each worker reports through `get_status`
    pub statuses: BTreeMap<AgentType, serde_json::Value>,
}
