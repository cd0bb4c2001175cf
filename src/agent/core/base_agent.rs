use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::{
    agent::{task::AgentTask, types::AgentType},
    error::Result,
    multi_agent::communication::message::AgentMessage,
};

/// Contract every worker implements to take part in orchestration.
///
/// Implementations take `&self`: a worker shared behind an `Arc` keeps its
/// private state behind its own locks. Unless [`concurrent_safe`] returns
/// true, the registry never runs two calls on the same worker at once.
///
/// [`concurrent_safe`]: AgentBehavior::concurrent_safe
#[async_trait]
pub trait AgentBehavior: Send + Sync {
    /// Unique id of this worker instance.
    fn get_id(&self) -> &str;

    /// The registry key this worker is filed under.
    fn agent_type(&self) -> AgentType;

    /// Called once before the worker is registered.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Runs the worker's domain logic for a routed task. An `Err` marks the
    /// task FAILED; the returned value is kept as the worker's output.
    async fn process_task(&self, task: &AgentTask) -> Result<serde_json::Value>;

    /// Handles an inbound message. Errors are logged by the caller and never
    /// reach the sender.
    async fn receive_message(&self, message: &AgentMessage) -> Result<()>;

    /// Whether tasks may be processed in parallel on this worker.
    fn concurrent_safe(&self) -> bool {
        false
    }

    /// Called once after the worker's mailbox has drained.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn get_status(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.get_id(),
            "type": self.agent_type(),
        })
    }
}

/// Identity and logging helpers shared by workers.
#[derive(Debug, Clone)]
pub struct BaseAgent {
    pub id: String,
    pub agent_type: AgentType,
}

impl BaseAgent {
    pub fn new(id: String, agent_type: AgentType) -> Self {
        Self { id, agent_type }
    }

    /// Fresh id prefixed with the lowercase type name.
    pub fn generate_id(agent_type: &AgentType) -> String {
        format!(
            "{}-{}",
            agent_type.to_string().to_lowercase(),
            uuid::Uuid::new_v4().simple()
        )
    }

    pub fn log_task_event(&self, task: &AgentTask, event: &str) {
        info!(
            agent_id = %self.id,
            agent_type = %self.agent_type,
            task_id = %task.id(),
            user_id = %task.user_id,
            "{event}"
        );
    }

    pub fn log_message_event(&self, message: &AgentMessage, event: &str) {
        debug!(
            agent_id = %self.id,
            message_id = %message.id,
            sender_id = %message.sender_id,
            message_type = ?message.message_type,
            "{event}"
        );
    }

    pub fn log_error(&self, context: &str, err: &dyn std::error::Error) {
        error!(agent_id = %self.id, agent_type = %self.agent_type, "{context}: {err}");
    }
}
