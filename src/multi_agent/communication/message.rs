use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::types::{AgentType, Priority};

/// What a message is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// A user session was bootstrapped
    UserSessionStarted,
    /// Progress report from a worker
    TaskProgress,
    /// Final result of a task
    TaskResult,
    /// Worker or system status change
    StatusUpdate,
    /// Error report
    Error,
    /// Application-defined message kind
    Custom(String),
}

/// Who a message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    Broadcast,
    Agent(AgentType),
}

/// Message exchanged between the orchestrator, workers and sessions.
///
/// Delivery is fire-and-forget; nothing acknowledges a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub sender_id: String,
    pub recipient: Recipient,
    pub message_type: MessageType,
    pub priority: Priority,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AgentMessage {
    pub fn new(
        sender_id: impl Into<String>,
        recipient: Recipient,
        message_type: MessageType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.into(),
            recipient,
            message_type,
            priority: Priority::default(),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Message addressed to every registered worker.
    pub fn broadcast(
        sender_id: impl Into<String>,
        message_type: MessageType,
        payload: serde_json::Value,
    ) -> Self {
        Self::new(sender_id, Recipient::Broadcast, message_type, payload)
    }

    pub fn to_agent(
        sender_id: impl Into<String>,
        agent_type: AgentType,
        message_type: MessageType,
        payload: serde_json::Value,
    ) -> Self {
        Self::new(sender_id, Recipient::Agent(agent_type), message_type, payload)
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient == Recipient::Broadcast
    }
}

/// Predicate over messages used to query history.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub sender_id: Option<String>,
    pub message_types: Option<Vec<MessageType>>,
    pub min_priority: Option<Priority>,
}

impl MessageFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }

    pub fn with_types(mut self, types: Vec<MessageType>) -> Self {
        self.message_types = Some(types);
        self
    }

    pub fn with_min_priority(mut self, priority: Priority) -> Self {
        self.min_priority = Some(priority);
        self
    }

    pub fn matches(&self, message: &AgentMessage) -> bool {
        if let Some(ref sender) = self.sender_id
            && &message.sender_id != sender
        {
            return false;
        }

        if let Some(ref types) = self.message_types
            && !types.contains(&message.message_type)
        {
            return false;
        }

        if let Some(min_priority) = self.min_priority
            && message.priority < min_priority
        {
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = AgentMessage::to_agent(
            "mcp",
            AgentType::Assessment,
            MessageType::TaskProgress,
            serde_json::json!({"progress": 0.5}),
        );

        assert_eq!(msg.sender_id, "mcp");
        assert_eq!(msg.recipient, Recipient::Agent(AgentType::Assessment));
        assert!(!msg.is_broadcast());
    }

    #[test]
    fn test_broadcast_message() {
        let msg = AgentMessage::broadcast(
            "mcp",
            MessageType::StatusUpdate,
            serde_json::json!({"status": "ready"}),
        );

        assert!(msg.is_broadcast());
    }

    #[test]
    fn test_message_filter() {
        let msg = AgentMessage::broadcast("agent1", MessageType::Error, serde_json::json!({}))
            .with_priority(Priority::High);

        let filter = MessageFilter::new()
            .from_sender("agent1")
            .with_min_priority(Priority::Medium);
        assert!(filter.matches(&msg));

        let other = MessageFilter::new().with_types(vec![MessageType::TaskResult]);
        assert!(!other.matches(&msg));
    }
}
