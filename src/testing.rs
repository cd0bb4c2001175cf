// Deterministic fakes for exercising the orchestrator - no timing tricks
// unless a delay is asked for explicitly.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::{
    agent::{
        core::base_agent::{AgentBehavior, BaseAgent},
        task::{AgentTask, TaskRecord},
        types::AgentType,
    },
    error::{Error, Result, agent_error::AgentError},
    multi_agent::{
        communication::message::AgentMessage, coordination::TaskLifecycleObserver,
    },
};

#[derive(Debug, Clone)]
enum Behavior {
    Succeed,
    Fail(String),
    Panic,
}

/// Worker that records what reached it and answers as configured.
#[derive(Debug)]
pub struct RecordingAgent {
    base: BaseAgent,
    behavior: Behavior,
    fail_messages: bool,
    fail_initialize: bool,
    concurrent: bool,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    tasks: Mutex<Vec<String>>,
    messages: Mutex<Vec<AgentMessage>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl RecordingAgent {
    pub fn new(agent_type: AgentType) -> Self {
        Self {
            base: BaseAgent::new(BaseAgent::generate_id(&agent_type), agent_type),
            behavior: Behavior::Succeed,
            fail_messages: false,
            fail_initialize: false,
            concurrent: false,
            delay: None,
            gate: None,
            tasks: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self, reason: &str) -> Self {
        self.behavior = Behavior::Fail(reason.to_string());
        self
    }

    pub fn panicking(mut self) -> Self {
        self.behavior = Behavior::Panic;
        self
    }

    pub fn failing_messages(mut self) -> Self {
        self.fail_messages = true;
        self
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn concurrent(mut self) -> Self {
        self.concurrent = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Each task waits for one permit of `gate` before running.
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Ids of tasks this worker started, in order.
    pub fn processed_tasks(&self) -> Vec<String> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn received_messages(&self) -> Vec<AgentMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Most tasks ever running on this worker at the same time.
    pub fn max_overlap(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentBehavior for RecordingAgent {
    fn get_id(&self) -> &str {
        &self.base.id
    }

    fn agent_type(&self) -> AgentType {
        self.base.agent_type
    }

    async fn initialize(&self) -> Result<()> {
        if self.fail_initialize {
            return Err(Error::AgentError(AgentError::InitializationError(format!(
                "{} refused to start",
                self.base.id
            ))));
        }
        Ok(())
    }

    async fn process_task(&self, task: &AgentTask) -> Result<serde_json::Value> {
        if let Some(gate) = &self.gate
            && let Ok(permit) = gate.acquire().await
        {
            permit.forget();
        }

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(task.id().to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        match &self.behavior {
            Behavior::Succeed => Ok(serde_json::json!({
                "agent_id": self.base.id,
                "task_id": task.id(),
            })),
            Behavior::Fail(reason) => Err(Error::AgentError(AgentError::ProcessingError {
                agent_type: self.base.agent_type,
                reason: reason.clone(),
            })),
            Behavior::Panic => panic!("{} blew up", self.base.id),
        }
    }

    async fn receive_message(&self, message: &AgentMessage) -> Result<()> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());

        if self.fail_messages {
            return Err(Error::AgentError(AgentError::MessageDeliveryError(
                "rejected".into(),
            )));
        }
        Ok(())
    }

    fn concurrent_safe(&self) -> bool {
        self.concurrent
    }
}

/// Observer counting terminal outcomes.
#[derive(Debug, Default)]
pub struct TaskCounter {
    pub completed: AtomicUsize,
    pub failed: AtomicUsize,
}

impl TaskLifecycleObserver for TaskCounter {
    fn on_task_finished(&self, record: &TaskRecord) {
        if record.is_success() {
            self.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
