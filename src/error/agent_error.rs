use std::time::Duration;

use crate::agent::types::{AgentType, TaskStatus};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("no registered agent for targets {0:?}")]
    RoutingError(Vec<AgentType>),

    #[error("agent {agent_type} failed: {reason}")]
    ProcessingError { agent_type: AgentType, reason: String },

    #[error("task timed out after {0:?}")]
    Timeout(Duration),

    #[error("message delivery failed: {0}")]
    MessageDeliveryError(String),

    #[error("initialization failed: {0}")]
    InitializationError(String),

    #[error("system not ready")]
    NotInitialized,

    #[error("agent not found: {0}")]
    AgentNotFound(AgentType),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task id {0} is already in use")]
    DuplicateTask(String),

    #[error("task abandoned at shutdown")]
    Shutdown,

    #[error("invalid task transition {from:?} -> {to:?}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}
