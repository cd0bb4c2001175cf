use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::{Mutex, broadcast};
use tracing::{debug, error, info};

use crate::{
    agent::{
        core::base_agent::AgentBehavior,
        task::{AgentTask, TaskRecord},
        types::{AgentType, Priority, TaskStatus, TaskType},
    },
    error::{Error, Result, agent_error::AgentError},
    multi_agent::{
        communication::{AgentMessage, BroadcastReport, CommunicationConfig, CommunicationManager},
        context::{UserContextManager, UserInitialization},
        coordination::{TaskHandle, TaskProcessor},
        registry::AgentRegistry,
        state::{SystemState, SystemStateManager},
    },
    shared::config::OrchestratorConfig,
};

/// Task type issued once per user when a session is first seeded.
pub const BOOTSTRAP_TASK: TaskType = TaskType::CognitiveProfiling;

/// Single entry point of the orchestrator. Owns the registry, task
/// processor, state, messaging and user-context components.
///
/// Build one with [`MasterControlProgram::start`] and share it behind an
/// `Arc`. After [`stop`](Self::stop) every call that hands off work answers
/// [`AgentError::NotInitialized`].
pub struct MasterControlProgram {
    config: OrchestratorConfig,
    registry: Arc<AgentRegistry>,
    processor: TaskProcessor,
    state: Arc<SystemStateManager>,
    communication: Arc<CommunicationManager>,
    users: UserContextManager,
    bootstrap_lock: Mutex<()>,
    initialized: AtomicBool,
}

impl MasterControlProgram {
    /// Validates `config`, initializes and registers `agents`, then starts
    /// dispatching. Any failure here leaves nothing running.
    pub async fn start(
        config: OrchestratorConfig,
        agents: Vec<Arc<dyn AgentBehavior>>,
    ) -> Result<Self> {
        config.validate()?;

        for agent in &agents {
            if let Err(e) = agent.initialize().await {
                error!(agent_id = %agent.get_id(), "agent failed to initialize: {}", e);
                return Err(Error::AgentError(AgentError::InitializationError(format!(
                    "agent {} ({}) failed to initialize: {e}",
                    agent.get_id(),
                    agent.agent_type()
                ))));
            }
        }

        let registry = Arc::new(AgentRegistry::new());
        for agent in agents {
            registry.register(agent).await;
        }
        let known_types = registry.registered_types().await;

        let processor = TaskProcessor::new(registry.clone(), &config);
        let state = Arc::new(SystemStateManager::new(
            known_types.clone(),
            registry.clone(),
            processor.queue(),
            config.clone(),
        ));
        let communication = Arc::new(CommunicationManager::new(
            registry.clone(),
            CommunicationConfig {
                history_size: config.message_history_size,
                ..Default::default()
            },
        ));
        let users = UserContextManager::new(communication.clone());

        processor.add_observer(state.clone()).await;
        processor.add_observer(communication.clone()).await;
        processor.start().await;

        info!(
            agents = ?known_types,
            max_concurrent_tasks = config.max_concurrent_tasks,
            "master control program started"
        );
        Ok(Self {
            config,
            registry,
            processor,
            state,
            communication,
            users,
            bootstrap_lock: Mutex::new(()),
            initialized: AtomicBool::new(true),
        })
    }

    /// Waits for in-flight tasks, fails queued ones and shuts every worker
    /// down. Calling it twice is a no-op.
    pub async fn stop(&self) {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            return;
        }
        self.processor.stop().await;
        self.registry.clear().await;
        info!("master control program stopped");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Hands `task` to the processor. Routing, processing and timeout
    /// failures are not errors here; they show up on the returned handle
    /// and in the metrics. A task id that is already in use is rejected.
    pub async fn submit_task(&self, task: AgentTask) -> Result<TaskHandle> {
        self.ensure_initialized()?;
        debug!(task_id = %task.id(), task_type = ?task.task_type(), "task submitted");
        self.processor.submit(task).await
    }

    pub async fn task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.processor.task_status(task_id).await
    }

    pub async fn get_task(&self, task_id: &str) -> Result<TaskRecord> {
        self.processor
            .get_task(task_id)
            .await
            .ok_or_else(|| Error::AgentError(AgentError::TaskNotFound(task_id.to_string())))
    }

    pub async fn get_system_state(&self) -> SystemState {
        self.state.get_system_state().await
    }

    pub async fn get_global_variable(&self, key: &str) -> Option<serde_json::Value> {
        self.state.get_global_variable(key).await
    }

    pub async fn set_global_variable(&self, key: impl Into<String>, value: serde_json::Value) {
        self.state.set_global_variable(key, value).await;
    }

    pub async fn broadcast_message(
        &self,
        message: AgentMessage,
        targets: Option<&[AgentType]>,
    ) -> Result<BroadcastReport> {
        self.ensure_initialized()?;
        Ok(self.communication.broadcast_message(message, targets).await)
    }

    pub async fn send_message(&self, message: AgentMessage) -> Result<()> {
        self.ensure_initialized()?;
        self.communication.send_message(message).await
    }

    /// Messages published for user sessions, task results included.
    pub fn subscribe_sessions(&self) -> broadcast::Receiver<Arc<AgentMessage>> {
        self.communication.subscribe_sessions()
    }

    /// Seeds the user's session, then submits the profiling bootstrap task
    /// unless an earlier one for this user is pending, running or done.
    /// Returns the handle of a newly submitted bootstrap task.
    pub async fn initialize_for_user(&self, user_id: &str) -> Result<Option<TaskHandle>> {
        self.ensure_initialized()?;
        let _guard = self.bootstrap_lock.lock().await;

        let init: UserInitialization = self
            .users
            .initialize_for_user(user_id, self.state.as_ref())
            .await?;

        if let Some(previous) = self.users.bootstrap_task(user_id, BOOTSTRAP_TASK).await {
            match self.processor.task_status(&previous).await {
                Some(TaskStatus::Failed) => {
                    info!(user_id = %user_id, task_id = %previous, "retrying failed bootstrap task");
                }
                status => {
                    debug!(
                        user_id = %user_id,
                        task_id = %previous,
                        ?status,
                        "bootstrap task already issued"
                    );
                    return Ok(None);
                }
            }
        }

        let task = AgentTask::new(user_id, BOOTSTRAP_TASK, vec![AgentType::CognitiveProfile])
            .with_priority(Priority::High)
            .with_context(["initial_setup", "user_profile"])
            .with_payload(serde_json::json!({
                "user_id": user_id,
                "session_count": init.session_count,
            }));
        let handle = self.processor.submit(task).await?;
        self.users
            .record_bootstrap(user_id, BOOTSTRAP_TASK, handle.id())
            .await;

        info!(user_id = %user_id, task_id = %handle.id(), "bootstrap task submitted");
        Ok(Some(handle))
    }

    /// Initializes `agent` and files it under its type, replacing any worker
    /// already serving that type.
    pub async fn register_agent(&self, agent: Arc<dyn AgentBehavior>) -> Result<()> {
        self.ensure_initialized()?;
        agent.initialize().await.map_err(|e| {
            Error::AgentError(AgentError::InitializationError(format!(
                "agent {} failed to initialize: {e}",
                agent.get_id()
            )))
        })?;
        self.registry.register(agent).await;
        Ok(())
    }

    pub async fn unregister_agent(&self, agent_type: AgentType) -> Result<()> {
        self.ensure_initialized()?;
        self.registry.unregister(agent_type).await
    }

    pub fn registry(&self) -> Arc<AgentRegistry> {
        self.processor.get_agent_registry()
    }

    pub fn communication(&self) -> Arc<CommunicationManager> {
        self.communication.clone()
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::AgentError(AgentError::NotInitialized))
        }
    }
}
