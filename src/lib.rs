//! Task orchestration core: typed workers, a priority task processor,
//! system metrics, messaging and per-user session bootstrap behind one
//! [`MasterControlProgram`].

pub mod agent;
pub mod agents;
pub mod error;
pub mod multi_agent;
pub mod shared;
pub mod testing;

pub use agent::{
    core::{AgentBehavior, BaseAgent},
    task::{AgentTask, FailureReason, Task, TaskRecord},
    types::{AgentType, LoadStatus, Priority, TaskStatus, TaskType},
};
pub use error::{Error, Result, agent_error::AgentError};
pub use multi_agent::{
    communication::{AgentMessage, MessageType, Recipient},
    coordination::TaskHandle,
    manager::MasterControlProgram,
    state::{SystemMetrics, SystemState},
};
pub use shared::config::OrchestratorConfig;
