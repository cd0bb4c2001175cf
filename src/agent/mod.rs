pub mod core;
pub mod task;
pub mod types;

pub use core::{AgentBehavior, BaseAgent};
pub use task::{AgentTask, FailureReason, Task, TaskRecord};
pub use types::{AgentType, LoadStatus, Priority, TaskStatus, TaskType};
