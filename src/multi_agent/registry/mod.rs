pub mod agent_handle;
pub mod agent_registry;

pub use agent_handle::{AgentHandle, AgentStats, TaskOutcome};
pub use agent_registry::{AgentRegistry, RegistryStats};
