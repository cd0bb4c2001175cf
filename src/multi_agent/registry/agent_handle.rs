use std::{
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use futures::FutureExt;
use serde::Serialize;
use tokio::{
    sync::{Mutex, mpsc, oneshot},
    time::Instant,
};
use tracing::{debug, error, info, warn};

use crate::{
    agent::{core::base_agent::AgentBehavior, task::AgentTask, task::FailureReason, types::AgentType},
    error::{Error, Result, agent_error::AgentError},
    multi_agent::communication::message::AgentMessage,
};

/// What a worker produced for one dispatched task.
pub type TaskOutcome = std::result::Result<serde_json::Value, FailureReason>;

enum Envelope {
    Task {
        task: Box<AgentTask>,
        deadline: Instant,
        started: Instant,
        reply: oneshot::Sender<TaskOutcome>,
    },
    Message(Arc<AgentMessage>),
}

#[derive(Debug, Default)]
struct Counters {
    tasks_processed: AtomicU64,
    tasks_failed: AtomicU64,
    messages_received: AtomicU64,
    messages_failed: AtomicU64,
    alive: AtomicBool,
}

/// Per-worker delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AgentStats {
    pub tasks_processed: u64,
    pub tasks_failed: u64,
    pub messages_received: u64,
    pub messages_failed: u64,
}

struct HandleInner {
    agent: Arc<dyn AgentBehavior>,
    agent_type: AgentType,
    mailbox: mpsc::UnboundedSender<Envelope>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    counters: Arc<Counters>,
}

/// A registered worker and the mailbox feeding it.
///
/// Everything sent to one handle is handled in send order. Tasks run one at
/// a time unless the worker is `concurrent_safe`.
#[derive(Clone)]
pub struct AgentHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("agent_id", &self.inner.agent.get_id())
            .field("agent_type", &self.inner.agent_type)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl AgentHandle {
    /// Starts the mailbox loop for `agent`. Must be called inside a tokio runtime.
    pub fn spawn(agent: Arc<dyn AgentBehavior>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let counters = Arc::new(Counters::default());
        counters.alive.store(true, Ordering::SeqCst);

        tokio::spawn(Self::mailbox_loop(
            agent.clone(),
            rx,
            shutdown_rx,
            counters.clone(),
        ));

        Self {
            inner: Arc::new(HandleInner {
                agent_type: agent.agent_type(),
                agent,
                mailbox: tx,
                shutdown_tx: Mutex::new(Some(shutdown_tx)),
                counters,
            }),
        }
    }

    pub fn agent_type(&self) -> AgentType {
        self.inner.agent_type
    }

    pub fn agent_id(&self) -> &str {
        self.inner.agent.get_id()
    }

    pub fn agent(&self) -> &Arc<dyn AgentBehavior> {
        &self.inner.agent
    }

    /// True if this handle wraps exactly `agent`.
    pub fn is_instance(&self, agent: &Arc<dyn AgentBehavior>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.inner.agent), Arc::as_ptr(agent))
    }

    pub fn is_alive(&self) -> bool {
        self.inner.counters.alive.load(Ordering::SeqCst) && !self.inner.mailbox.is_closed()
    }

    pub fn stats(&self) -> AgentStats {
        let c = &self.inner.counters;
        AgentStats {
            tasks_processed: c.tasks_processed.load(Ordering::Relaxed),
            tasks_failed: c.tasks_failed.load(Ordering::Relaxed),
            messages_received: c.messages_received.load(Ordering::Relaxed),
            messages_failed: c.messages_failed.load(Ordering::Relaxed),
        }
    }

    /// Queues `task` and waits for the worker's result. The worker is
    /// cancelled once `deadline` passes.
    pub async fn dispatch(&self, task: AgentTask, deadline: Instant) -> TaskOutcome {
        let (reply, rx) = oneshot::channel();
        let envelope = Envelope::Task {
            task: Box::new(task),
            deadline,
            started: Instant::now(),
            reply,
        };

        if self.inner.mailbox.send(envelope).is_err() {
            return Err(self.closed_failure());
        }

        rx.await.unwrap_or_else(|_| Err(self.closed_failure()))
    }

    /// Hands `message` to the mailbox and returns without waiting for it
    /// to be handled.
    pub fn deliver(&self, message: Arc<AgentMessage>) -> Result<()> {
        self.inner
            .mailbox
            .send(Envelope::Message(message))
            .map_err(|_| {
                Error::AgentError(AgentError::MessageDeliveryError(format!(
                    "mailbox of {} is closed",
                    self.inner.agent_type
                )))
            })
    }

    /// Stops accepting work. Already queued work is still handled.
    pub async fn close(&self) {
        if let Some(tx) = self.inner.shutdown_tx.lock().await.take() {
            let _ = tx.send(());
        }
    }

    fn closed_failure(&self) -> FailureReason {
        FailureReason::Processing {
            agent_type: self.inner.agent_type,
            error: "agent mailbox closed".into(),
        }
    }

    async fn mailbox_loop(
        agent: Arc<dyn AgentBehavior>,
        mut rx: mpsc::UnboundedReceiver<Envelope>,
        mut shutdown_rx: oneshot::Receiver<()>,
        counters: Arc<Counters>,
    ) {
        let agent_id = agent.get_id().to_string();
        info!("Agent {} mailbox started", agent_id);

        loop {
            tokio::select! {
                biased;
                envelope = rx.recv() => match envelope {
                    Some(envelope) => Self::handle(&agent, envelope, &counters).await,
                    None => break,
                },
                _ = &mut shutdown_rx => {
                    info!("Agent {} received shutdown signal", agent_id);
                    rx.close();
                    while let Some(envelope) = rx.recv().await {
                        Self::handle(&agent, envelope, &counters).await;
                    }
                    break;
                }
            }
        }

        counters.alive.store(false, Ordering::SeqCst);
        if let Err(e) = agent.shutdown().await {
            error!("Agent {} shutdown error: {:?}", agent_id, e);
        }
        info!("Agent {} stopped", agent_id);
    }

    async fn handle(agent: &Arc<dyn AgentBehavior>, envelope: Envelope, counters: &Arc<Counters>) {
        match envelope {
            Envelope::Task {
                task,
                deadline,
                started,
                reply,
            } => {
                if agent.concurrent_safe() {
                    let agent = agent.clone();
                    let counters = counters.clone();
                    tokio::spawn(async move {
                        let outcome = Self::run_task(&agent, &task, deadline, started).await;
                        Self::record(&counters, &outcome);
                        let _ = reply.send(outcome);
                    });
                } else {
                    let outcome = Self::run_task(agent, &task, deadline, started).await;
                    Self::record(counters, &outcome);
                    let _ = reply.send(outcome);
                }
            }
            Envelope::Message(message) => {
                counters.messages_received.fetch_add(1, Ordering::Relaxed);
                let result = AssertUnwindSafe(agent.receive_message(&message))
                    .catch_unwind()
                    .await;
                let failure = match result {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(_) => Some("panicked".to_string()),
                };
                if let Some(reason) = failure {
                    counters.messages_failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        agent_type = %agent.agent_type(),
                        message_id = %message.id,
                        "message delivery failed: {reason}"
                    );
                }
            }
        }
    }

    async fn run_task(
        agent: &Arc<dyn AgentBehavior>,
        task: &AgentTask,
        deadline: Instant,
        started: Instant,
    ) -> TaskOutcome {
        let agent_type = agent.agent_type();
        debug!(task_id = %task.id(), agent_type = %agent_type, "agent picked up task");

        let work = AssertUnwindSafe(agent.process_task(task)).catch_unwind();
        match tokio::time::timeout_at(deadline, work).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(FailureReason::Processing {
                agent_type,
                error: e.to_string(),
            }),
            Ok(Err(_)) => Err(FailureReason::Processing {
                agent_type,
                error: "agent panicked while processing task".into(),
            }),
            Err(_) => Err(FailureReason::Timeout {
                after: deadline.saturating_duration_since(started),
            }),
        }
    }

    fn record(counters: &Counters, outcome: &TaskOutcome) {
        match outcome {
            Ok(_) => counters.tasks_processed.fetch_add(1, Ordering::Relaxed),
            Err(_) => counters.tasks_failed.fetch_add(1, Ordering::Relaxed),
        };
    }
}
