use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    agent::{task::TaskRecord, types::AgentType},
    error::{Error, Result, agent_error::AgentError},
    multi_agent::{
        communication::message::{AgentMessage, MessageFilter, MessageType, Recipient},
        coordination::TaskLifecycleObserver,
        registry::{AgentHandle, AgentRegistry},
    },
};

/// Sender id used for messages the orchestrator itself emits.
pub const SYSTEM_SENDER: &str = "mcp";

/// Communication manager settings.
#[derive(Debug, Clone)]
pub struct CommunicationConfig {
    /// Messages kept in history
    pub history_size: usize,
    /// Buffer of the session feed; slow subscribers lose the oldest messages
    pub session_capacity: usize,
}

impl Default for CommunicationConfig {
    fn default() -> Self {
        Self {
            history_size: 1000,
            session_capacity: 256,
        }
    }
}

/// Message counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MessageBusStats {
    pub total_messages: u64,
    pub broadcast_messages: u64,
    pub p2p_messages: u64,
    pub session_messages: u64,
    pub deliveries: u64,
    pub skipped_targets: u64,
    pub failed_deliveries: u64,
}

/// Where a broadcast ended up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: Vec<AgentType>,
    /// Requested types with no registered worker
    pub skipped: Vec<AgentType>,
    /// Workers whose mailbox refused the message
    pub failed: Vec<AgentType>,
}

/// Best-effort message delivery to workers, plus a feed for user sessions.
///
/// Delivery returns once the message sits in each receiver's mailbox; the
/// receivers handle it later, in the order they were sent messages.
pub struct CommunicationManager {
    registry: Arc<AgentRegistry>,
    session_tx: broadcast::Sender<Arc<AgentMessage>>,
    history: Mutex<VecDeque<Arc<AgentMessage>>>,
    config: CommunicationConfig,
    stats: Mutex<MessageBusStats>,
}

impl CommunicationManager {
    pub fn new(registry: Arc<AgentRegistry>, config: CommunicationConfig) -> Self {
        let (session_tx, _) = broadcast::channel(config.session_capacity.max(1));
        Self {
            registry,
            session_tx,
            history: Mutex::new(VecDeque::with_capacity(config.history_size)),
            config,
            stats: Mutex::new(MessageBusStats::default()),
        }
    }

    /// Sends `message` to every registered worker, or only to the
    /// registered members of `targets`. Unregistered targets are skipped.
    pub async fn broadcast_message(
        &self,
        message: AgentMessage,
        targets: Option<&[AgentType]>,
    ) -> BroadcastReport {
        let (handles, skipped) = match targets {
            Some(types) => self.registry.resolve_all(types).await,
            None => (self.registry.all_handles().await, Vec::new()),
        };

        let message = Arc::new(message);
        self.save_to_history(message.clone());
        debug!(
            "Broadcasting message {} to {} agents",
            message.id,
            handles.len()
        );

        let mut report = BroadcastReport {
            skipped,
            ..Default::default()
        };
        for handle in &handles {
            match handle.deliver(message.clone()) {
                Ok(()) => report.delivered.push(handle.agent_type()),
                Err(e) => {
                    warn!(
                        agent_type = %handle.agent_type(),
                        message_id = %message.id,
                        "{}",
                        e
                    );
                    report.failed.push(handle.agent_type());
                }
            }
        }

        let mut stats = self.stats();
        stats.total_messages += 1;
        stats.broadcast_messages += 1;
        stats.deliveries += report.delivered.len() as u64;
        stats.skipped_targets += report.skipped.len() as u64;
        stats.failed_deliveries += report.failed.len() as u64;
        report
    }

    /// Sends a point-to-point message. A broadcast recipient goes to every worker.
    pub async fn send_message(&self, message: AgentMessage) -> Result<()> {
        let agent_type = match message.recipient {
            Recipient::Broadcast => {
                self.broadcast_message(message, None).await;
                return Ok(());
            }
            Recipient::Agent(agent_type) => agent_type,
        };

        let handle: AgentHandle = match self.registry.resolve(agent_type).await {
            Some(handle) => handle,
            None => {
                self.stats().failed_deliveries += 1;
                return Err(Error::AgentError(AgentError::AgentNotFound(agent_type)));
            }
        };

        let message = Arc::new(message);
        self.save_to_history(message.clone());
        let result = handle.deliver(message);

        let mut stats = self.stats();
        stats.total_messages += 1;
        stats.p2p_messages += 1;
        match result {
            Ok(()) => stats.deliveries += 1,
            Err(_) => stats.failed_deliveries += 1,
        }
        result
    }

    /// Subscribes to messages addressed to user sessions.
    pub fn subscribe_sessions(&self) -> broadcast::Receiver<Arc<AgentMessage>> {
        self.session_tx.subscribe()
    }

    /// Publishes to session subscribers. Having none is fine.
    pub fn publish_to_sessions(&self, message: AgentMessage) {
        let message = Arc::new(message);
        self.save_to_history(message.clone());
        let receivers = self.session_tx.send(message).unwrap_or(0);

        let mut stats = self.stats();
        stats.total_messages += 1;
        stats.session_messages += 1;
        stats.deliveries += receivers as u64;
    }

    /// History, oldest first, optionally filtered.
    pub fn get_history(&self, filter: Option<MessageFilter>) -> Vec<Arc<AgentMessage>> {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        match filter {
            Some(filter) => history
                .iter()
                .filter(|msg| filter.matches(msg))
                .cloned()
                .collect(),
            None => history.iter().cloned().collect(),
        }
    }

    pub fn get_stats(&self) -> MessageBusStats {
        *self.stats()
    }

    fn save_to_history(&self, message: Arc<AgentMessage>) {
        if self.config.history_size == 0 {
            return;
        }
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        if history.len() >= self.config.history_size {
            history.pop_front();
        }
        history.push_back(message);
    }

    fn stats(&self) -> std::sync::MutexGuard<'_, MessageBusStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TaskLifecycleObserver for CommunicationManager {
    /// Tells sessions how each task ended.
    fn on_task_finished(&self, record: &TaskRecord) {
        let payload = serde_json::json!({
            "task_id": record.id(),
            "user_id": record.task.user_id,
            "status": record.status(),
            "failure": record.failure.as_ref().map(|f| f.to_string()),
            "outputs": record.outputs,
        });
        let message = AgentMessage::broadcast(SYSTEM_SENDER, MessageType::TaskResult, payload)
            .with_priority(record.task.priority());
        self.publish_to_sessions(message);
        info!(task_id = %record.id(), "task result published to sessions");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingAgent;
    use std::time::Duration;

    async fn settle(agent: &RecordingAgent, expected: usize) {
        for _ in 0..100 {
            if agent.received_messages().len() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_broadcast_to_subset_skips_unregistered() {
        let registry = Arc::new(AgentRegistry::new());
        let feedback = Arc::new(RecordingAgent::new(AgentType::Feedback));
        let tutoring = Arc::new(RecordingAgent::new(AgentType::Tutoring));
        registry.register(feedback.clone()).await;
        registry.register(tutoring.clone()).await;
        let comms = CommunicationManager::new(registry, CommunicationConfig::default());

        let msg = AgentMessage::broadcast("tester", MessageType::StatusUpdate, serde_json::json!({}));
        let report = comms
            .broadcast_message(msg, Some(&[AgentType::Feedback, AgentType::Assessment]))
            .await;

        assert_eq!(report.delivered, vec![AgentType::Feedback]);
        assert_eq!(report.skipped, vec![AgentType::Assessment]);
        settle(&feedback, 1).await;
        assert_eq!(feedback.received_messages().len(), 1);
        assert!(tutoring.received_messages().is_empty());
    }

    #[tokio::test]
    async fn test_fifo_per_receiver() {
        let registry = Arc::new(AgentRegistry::new());
        let agent = Arc::new(RecordingAgent::new(AgentType::Engagement));
        registry.register(agent.clone()).await;
        let comms = CommunicationManager::new(registry, CommunicationConfig::default());

        for i in 0..20 {
            let msg = AgentMessage::to_agent(
                "tester",
                AgentType::Engagement,
                MessageType::Custom(format!("m{i}")),
                serde_json::json!({ "seq": i }),
            );
            comms.send_message(msg).await.unwrap();
        }

        settle(&agent, 20).await;
        let seqs: Vec<u64> = agent
            .received_messages()
            .iter()
            .filter_map(|m| m.payload["seq"].as_u64())
            .collect();
        assert_eq!(seqs, (0..20).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_send_to_unregistered_agent() {
        let comms = CommunicationManager::new(
            Arc::new(AgentRegistry::new()),
            CommunicationConfig::default(),
        );
        let msg = AgentMessage::to_agent(
            "tester",
            AgentType::UiUx,
            MessageType::StatusUpdate,
            serde_json::json!({}),
        );

        let err = comms.send_message(msg).await.unwrap_err();
        assert!(matches!(
            err,
            Error::AgentError(AgentError::AgentNotFound(AgentType::UiUx))
        ));
        assert_eq!(comms.get_stats().failed_deliveries, 1);
    }

    #[tokio::test]
    async fn test_failing_receiver_does_not_block_others() {
        let registry = Arc::new(AgentRegistry::new());
        let bad = Arc::new(RecordingAgent::new(AgentType::Assessment).failing_messages());
        let good = Arc::new(RecordingAgent::new(AgentType::Scheduling));
        registry.register(bad.clone()).await;
        registry.register(good.clone()).await;
        let comms = CommunicationManager::new(registry.clone(), CommunicationConfig::default());

        let msg = AgentMessage::broadcast("tester", MessageType::StatusUpdate, serde_json::json!({}));
        let report = comms.broadcast_message(msg, None).await;
        assert_eq!(report.delivered.len(), 2);

        settle(&good, 1).await;
        settle(&bad, 1).await;
        assert_eq!(good.received_messages().len(), 1);

        let handle = registry.resolve(AgentType::Assessment).await.unwrap();
        for _ in 0..100 {
            if handle.stats().messages_failed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(handle.stats().messages_failed, 1);
        assert!(handle.is_alive());
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let comms = CommunicationManager::new(
            Arc::new(AgentRegistry::new()),
            CommunicationConfig {
                history_size: 2,
                ..Default::default()
            },
        );
        for i in 0..3 {
            comms.publish_to_sessions(AgentMessage::broadcast(
                "tester",
                MessageType::TaskProgress,
                serde_json::json!({ "i": i }),
            ));
        }

        let history = comms.get_history(None);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].payload["i"], 1);

        let filtered = comms.get_history(Some(
            MessageFilter::new().with_types(vec![MessageType::TaskResult]),
        ));
        assert!(filtered.is_empty());
    }
}
