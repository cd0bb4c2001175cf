use std::{collections::BTreeMap, fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    agent::types::{AgentType, Priority, TaskStatus, TaskType},
    error::agent_error::AgentError,
};

/// Payload key that routes a task down a worker's simulation path.
pub const TEST_TASK_FLAG: &str = "is_test_task";

/// A unit of work and its lifecycle timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub task_type: TaskType,
    pub priority: Priority,
    pub status: TaskStatus,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(task_type: TaskType, priority: Priority, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_type,
            priority,
            status: TaskStatus::Pending,
            payload,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Moves the task forward in its lifecycle. Terminal tasks never change.
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), AgentError> {
        if !self.status.can_transition_to(next) {
            return Err(AgentError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        match next {
            TaskStatus::Processing => self.started_at = Some(now),
            TaskStatus::Completed | TaskStatus::Failed => self.completed_at = Some(now),
            TaskStatus::Pending => {}
        }
        self.status = next;
        Ok(())
    }

    /// Time from submission to the terminal transition.
    pub fn response_time(&self) -> Option<Duration> {
        self.completed_at
            .and_then(|done| (done - self.created_at).to_std().ok())
    }

    pub fn is_test_task(&self) -> bool {
        self.payload
            .get(TEST_TASK_FLAG)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// A task addressed to one or more worker types on behalf of a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTask {
    #[serde(flatten)]
    pub task: Task,
    pub user_id: String,
    pub context: Vec<String>,
    pub target_agent_types: Vec<AgentType>,
    /// Overrides the orchestrator's default deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl AgentTask {
    pub fn new(
        user_id: impl Into<String>,
        task_type: TaskType,
        target_agent_types: Vec<AgentType>,
    ) -> Self {
        Self {
            task: Task::new(task_type, Priority::default(), serde_json::json!({})),
            user_id: user_id.into(),
            context: Vec::new(),
            target_agent_types,
            timeout: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.task.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.task.payload = payload;
        self
    }

    pub fn with_context<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn id(&self) -> &str {
        &self.task.id
    }

    pub fn task_type(&self) -> TaskType {
        self.task.task_type
    }

    pub fn priority(&self) -> Priority {
        self.task.priority
    }

    pub fn status(&self) -> TaskStatus {
        self.task.status
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.task.payload
    }
}

/// Why a task ended up FAILED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// No target type resolved in the registry. The task never ran.
    Routing { unresolved: Vec<AgentType> },
    /// A worker returned an error or panicked.
    Processing { agent_type: AgentType, error: String },
    /// The task outlived its deadline.
    Timeout { after: Duration },
    /// The processor stopped before the task was dispatched.
    Shutdown,
}

impl FailureReason {
    pub fn is_routing(&self) -> bool {
        matches!(self, FailureReason::Routing { .. })
    }

    pub fn into_error(self) -> AgentError {
        match self {
            FailureReason::Routing { unresolved } => AgentError::RoutingError(unresolved),
            FailureReason::Processing { agent_type, error } => AgentError::ProcessingError {
                agent_type,
                reason: error,
            },
            FailureReason::Timeout { after } => AgentError::Timeout(after),
            FailureReason::Shutdown => AgentError::Shutdown,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Routing { unresolved } => {
                write!(f, "routing failed, unresolved targets {unresolved:?}")
            }
            FailureReason::Processing { agent_type, error } => {
                write!(f, "{agent_type} failed: {error}")
            }
            FailureReason::Timeout { after } => write!(f, "timed out after {after:?}"),
            FailureReason::Shutdown => write!(f, "processor shut down"),
        }
    }
}

/// Point-in-time view of a task and what its workers produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task: AgentTask,
    pub failure: Option<FailureReason>,
    pub outputs: BTreeMap<AgentType, serde_json::Value>,
}

impl TaskRecord {
    pub fn new(task: AgentTask) -> Self {
        Self {
            task,
            failure: None,
            outputs: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        self.task.id()
    }

    pub fn status(&self) -> TaskStatus {
        self.task.status()
    }

    pub fn is_success(&self) -> bool {
        self.status() == TaskStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_task_is_immutable() {
        let mut task = Task::new(TaskType::Analysis, Priority::Low, serde_json::json!({}));
        task.transition(TaskStatus::Processing).unwrap();
        task.transition(TaskStatus::Completed).unwrap();

        let err = task.transition(TaskStatus::Failed).unwrap_err();
        assert!(matches!(err, AgentError::InvalidTransition { .. }));
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());
        assert!(task.response_time().is_some());
    }

    #[test]
    fn test_processing_cannot_return_to_pending() {
        let mut task = Task::new(TaskType::Planning, Priority::High, serde_json::json!({}));
        task.transition(TaskStatus::Processing).unwrap();
        assert!(task.transition(TaskStatus::Pending).is_err());
        assert!(task.started_at.is_some());
    }

    #[test]
    fn test_agent_task_builder() {
        let task = AgentTask::new("user-1", TaskType::Tutoring, vec![AgentType::Tutoring])
            .with_id("t-1")
            .with_priority(Priority::Critical)
            .with_context(["initial_setup", "user_profile"])
            .with_payload(serde_json::json!({ TEST_TASK_FLAG: true }));

        assert_eq!(task.id(), "t-1");
        assert_eq!(task.priority(), Priority::Critical);
        assert_eq!(task.context, vec!["initial_setup", "user_profile"]);
        assert!(task.task.is_test_task());
        assert_eq!(task.status(), TaskStatus::Pending);
    }

    #[test]
    fn test_failure_reason_keeps_its_kind_as_error() {
        assert!(matches!(
            FailureReason::Shutdown.into_error(),
            AgentError::Shutdown
        ));
        assert!(matches!(
            FailureReason::Timeout { after: Duration::from_secs(1) }.into_error(),
            AgentError::Timeout(_)
        ));
        let routing = FailureReason::Routing { unresolved: vec![AgentType::UiUx] };
        assert!(routing.is_routing());
        assert!(matches!(routing.into_error(), AgentError::RoutingError(t) if t == vec![AgentType::UiUx]));
    }
}
