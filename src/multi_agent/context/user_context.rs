use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::{
    agent::types::TaskType,
    error::{Error, Result, agent_error::AgentError},
    multi_agent::{
        communication::{AgentMessage, CommunicationManager, MessageType, SYSTEM_SENDER},
        state::GlobalVariableSink,
    },
};

#[derive(Debug, Clone)]
struct UserSession {
    first_initialized_at: DateTime<Utc>,
    session_count: u64,
    bootstrap_tasks: HashMap<TaskType, String>,
}

/// Result of seeding a user's session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserInitialization {
    pub user_id: String,
    pub session_count: u64,
    pub first_initialized_at: DateTime<Utc>,
}

impl UserInitialization {
    pub fn is_first_session(&self) -> bool {
        self.session_count == 1
    }
}

/// Seeds per-user global variables and remembers which bootstrap tasks
/// were issued for whom. Never submits tasks itself.
pub struct UserContextManager {
    communication: Arc<CommunicationManager>,
    sessions: RwLock<HashMap<String, UserSession>>,
}

impl UserContextManager {
    pub fn new(communication: Arc<CommunicationManager>) -> Self {
        Self {
            communication,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Writes the session variables for `user_id` through `sink`, then tells
    /// every worker that the session started.
    pub async fn initialize_for_user(
        &self,
        user_id: &str,
        sink: &dyn GlobalVariableSink,
    ) -> Result<UserInitialization> {
        if user_id.trim().is_empty() {
            return Err(Error::AgentError(AgentError::InvalidInput(
                "user id must not be empty".into(),
            )));
        }

        let now = Utc::now();
        let init = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .entry(user_id.to_string())
                .or_insert_with(|| UserSession {
                    first_initialized_at: now,
                    session_count: 0,
                    bootstrap_tasks: HashMap::new(),
                });
            session.session_count += 1;
            UserInitialization {
                user_id: user_id.to_string(),
                session_count: session.session_count,
                first_initialized_at: session.first_initialized_at,
            }
        };

        let seeds = [
            ("current_user_id".to_string(), serde_json::json!(user_id)),
            ("session_started_at".to_string(), serde_json::json!(now)),
            (
                format!("user.{user_id}.initialized_at"),
                serde_json::json!(init.first_initialized_at),
            ),
            (
                format!("user.{user_id}.session_count"),
                serde_json::json!(init.session_count),
            ),
        ];
        for (key, value) in seeds {
            sink.set_global_variable(key, value).await;
        }

        let announcement = AgentMessage::broadcast(
            SYSTEM_SENDER,
            MessageType::UserSessionStarted,
            serde_json::json!({
                "user_id": user_id,
                "session_count": init.session_count,
            }),
        );
        self.communication
            .broadcast_message(announcement, None)
            .await;

        info!(
            user_id = %user_id,
            session_count = init.session_count,
            "user context initialized"
        );
        Ok(init)
    }

    /// Id of the last bootstrap task of `task_type` issued for `user_id`.
    pub async fn bootstrap_task(&self, user_id: &str, task_type: TaskType) -> Option<String> {
        self.sessions
            .read()
            .await
            .get(user_id)?
            .bootstrap_tasks
            .get(&task_type)
            .cloned()
    }

    pub async fn record_bootstrap(&self, user_id: &str, task_type: TaskType, task_id: &str) {
        if let Some(session) = self.sessions.write().await.get_mut(user_id) {
            session
                .bootstrap_tasks
                .insert(task_type, task_id.to_string());
        }
    }

    pub async fn known_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        users.sort();
        users
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::types::AgentType;
    use crate::multi_agent::{communication::CommunicationConfig, registry::AgentRegistry};
    use crate::testing::RecordingAgent;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MapSink(Mutex<HashMap<String, serde_json::Value>>);

    #[async_trait]
    impl GlobalVariableSink for MapSink {
        async fn set_global_variable(&self, key: String, value: serde_json::Value) {
            self.0.lock().unwrap().insert(key, value);
        }
    }

    fn manager(registry: Arc<AgentRegistry>) -> UserContextManager {
        UserContextManager::new(Arc::new(CommunicationManager::new(
            registry,
            CommunicationConfig::default(),
        )))
    }

    #[tokio::test]
    async fn test_seeds_variables_through_sink() {
        let users = manager(Arc::new(AgentRegistry::new()));
        let sink = MapSink::default();

        let init = users.initialize_for_user("alice", &sink).await.unwrap();
        assert!(init.is_first_session());

        let vars = sink.0.lock().unwrap();
        assert_eq!(vars["current_user_id"], serde_json::json!("alice"));
        assert_eq!(vars["user.alice.session_count"], serde_json::json!(1));
        assert!(vars.contains_key("session_started_at"));
    }

    #[tokio::test]
    async fn test_repeat_initialization_counts_sessions() {
        let users = manager(Arc::new(AgentRegistry::new()));
        let sink = MapSink::default();

        let first = users.initialize_for_user("bob", &sink).await.unwrap();
        let second = users.initialize_for_user("bob", &sink).await.unwrap();
        assert_eq!(second.session_count, 2);
        assert_eq!(first.first_initialized_at, second.first_initialized_at);
        assert_eq!(users.known_users().await, vec!["bob"]);
    }

    #[tokio::test]
    async fn test_rejects_blank_user() {
        let users = manager(Arc::new(AgentRegistry::new()));
        let err = users
            .initialize_for_user("  ", &MapSink::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AgentError(AgentError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_announces_session_to_workers() {
        let registry = Arc::new(AgentRegistry::new());
        let agent = Arc::new(RecordingAgent::new(AgentType::Engagement));
        registry.register(agent.clone()).await;
        let users = manager(registry);

        users
            .initialize_for_user("carol", &MapSink::default())
            .await
            .unwrap();

        for _ in 0..100 {
            if !agent.received_messages().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let messages = agent.received_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_type, MessageType::UserSessionStarted);
    }

    #[tokio::test]
    async fn test_bootstrap_tracking() {
        let users = manager(Arc::new(AgentRegistry::new()));
        users
            .initialize_for_user("dave", &MapSink::default())
            .await
            .unwrap();

        assert_eq!(
            users.bootstrap_task("dave", TaskType::CognitiveProfiling).await,
            None
        );
        users
            .record_bootstrap("dave", TaskType::CognitiveProfiling, "task-1")
            .await;
        assert_eq!(
            users
                .bootstrap_task("dave", TaskType::CognitiveProfiling)
                .await
                .as_deref(),
            Some("task-1")
        );
    }
}
