use std::fmt;

use serde::{Deserialize, Serialize};

/// Worker type a task can be routed to.
///
/// Closed set of worker kinds. Adding a worker means adding a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentType {
    CognitiveProfile,
    LearningPath,
    ContentAdaptation,
    Assessment,
    Engagement,
    Feedback,
    UiUx,
    Scheduling,
    Tutoring,
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentType::CognitiveProfile => "COGNITIVE_PROFILE",
            AgentType::LearningPath => "LEARNING_PATH",
            AgentType::ContentAdaptation => "CONTENT_ADAPTATION",
            AgentType::Assessment => "ASSESSMENT",
            AgentType::Engagement => "ENGAGEMENT",
            AgentType::Feedback => "FEEDBACK",
            AgentType::UiUx => "UI_UX",
            AgentType::Scheduling => "SCHEDULING",
            AgentType::Tutoring => "TUTORING",
        };
        write!(f, "{name}")
    }
}

/// Kind of work a task carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    CognitiveProfiling,
    LearningPathGeneration,
    LearningPathUpdate,
    ContentAdaptation,
    AssessmentGeneration,
    EngagementOptimization,
    FeedbackGeneration,
    UiOptimization,
    ScheduleOptimization,
    FlashcardOptimization,
    MultiAgentCoordination,
    Tutoring,
    Analysis,
    ContentGeneration,
    Planning,
}

/// Dispatch priority, `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 0,
    #[default]
    Medium = 1,
    High = 2,
    Critical = 3,
}

impl Priority {
    /// Highest band first.
    pub const DISPATCH_ORDER: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];
}

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Transitions only move forward. A pending task may fail without ever
    /// being processed (routing failures, shutdown).
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Pending, TaskStatus::Failed)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
        )
    }
}

/// Load classification derived from queue depth at snapshot time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    Idle,
    Processing,
    Overloaded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::Medium < Priority::High);
        assert!(Priority::High < Priority::Critical);
    }

    #[test]
    fn test_status_transitions_are_monotonic() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Processing));
        assert!(TaskStatus::Processing.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Processing.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Processing));
    }

    #[test]
    fn test_agent_type_wire_name() {
        let json = serde_json::to_string(&AgentType::CognitiveProfile).unwrap();
        assert_eq!(json, "\"COGNITIVE_PROFILE\"");
        assert_eq!(AgentType::UiUx.to_string(), "UI_UX");
    }
}
