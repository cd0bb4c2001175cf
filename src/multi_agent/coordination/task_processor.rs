use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures::future::join_all;
use tokio::{
    sync::{Mutex, Notify, RwLock, Semaphore, watch},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, error, info, warn};

use crate::{
    agent::{
        task::{AgentTask, FailureReason, Task, TaskRecord},
        types::TaskStatus,
    },
    error::{Error, Result, agent_error::AgentError},
    multi_agent::{
        coordination::task_queue::{TaskQueue, TaskQueueStats},
        registry::AgentRegistry,
    },
    shared::config::OrchestratorConfig,
};

/// Notified once for every task that reaches a terminal state.
pub trait TaskLifecycleObserver: Send + Sync {
    fn on_task_finished(&self, record: &TaskRecord);
}

/// Lets a caller follow one submitted task to its terminal state.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: String,
    rx: watch::Receiver<TaskRecord>,
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Latest known state of the task.
    pub fn current(&self) -> TaskRecord {
        self.rx.borrow().clone()
    }

    /// Resolves once the task is COMPLETED or FAILED.
    pub async fn wait(mut self) -> TaskRecord {
        let finished: Option<TaskRecord> = self
            .rx
            .wait_for(|r| r.status().is_terminal())
            .await
            .ok()
            .map(|record| (*record).clone());
        finished.unwrap_or_else(|| self.rx.borrow().clone())
    }
}

struct ProcessorInner {
    registry: Arc<AgentRegistry>,
    queue: Arc<TaskQueue>,
    /// One entry per task between submit and its terminal state
    watchers: RwLock<HashMap<String, watch::Sender<TaskRecord>>>,
    /// False once `stop` began; submits hold a read guard until queued
    intake_open: RwLock<bool>,
    observers: RwLock<Vec<Arc<dyn TaskLifecycleObserver>>>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    notify: Notify,
    default_timeout: Duration,
}

/// Owns the task queue and moves every task through its lifecycle.
///
/// A task with several target types is sent to all of them at once and
/// completes only if every one of them succeeds.
pub struct TaskProcessor {
    inner: Arc<ProcessorInner>,
    dispatcher: Mutex<Option<(JoinHandle<()>, watch::Sender<bool>)>>,
    running: AtomicBool,
}

impl TaskProcessor {
    pub fn new(registry: Arc<AgentRegistry>, config: &OrchestratorConfig) -> Self {
        Self {
            inner: Arc::new(ProcessorInner {
                registry,
                queue: Arc::new(TaskQueue::new(config.completed_task_retention)),
                watchers: RwLock::new(HashMap::new()),
                intake_open: RwLock::new(true),
                observers: RwLock::new(Vec::new()),
                permits: Arc::new(Semaphore::new(config.max_concurrent_tasks)),
                max_concurrent: config.max_concurrent_tasks,
                notify: Notify::new(),
                default_timeout: config.task_timeout(),
            }),
            dispatcher: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn get_agent_registry(&self) -> Arc<AgentRegistry> {
        self.inner.registry.clone()
    }

    pub fn queue(&self) -> Arc<TaskQueue> {
        self.inner.queue.clone()
    }

    pub async fn add_observer(&self, observer: Arc<dyn TaskLifecycleObserver>) {
        self.inner.observers.write().await.push(observer);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts the dispatcher. Tasks submitted before the first start wait in
    /// the queue; after `stop` new tasks fail until the next start.
    pub async fn start(&self) {
        let mut dispatcher = self.dispatcher.lock().await;
        if dispatcher.is_some() {
            return;
        }

        *self.inner.intake_open.write().await = true;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Self::run_dispatcher(self.inner.clone(), shutdown_rx));
        *dispatcher = Some((handle, shutdown_tx));
        self.running.store(true, Ordering::SeqCst);
        info!("Task processor started");
    }

    /// Stops dispatching, waits for in-flight tasks and fails whatever is
    /// still queued.
    pub async fn stop(&self) {
        let Some((handle, shutdown_tx)) = self.dispatcher.lock().await.take() else {
            return;
        };
        // waits for submits already past the intake check
        *self.inner.intake_open.write().await = false;

        let _ = shutdown_tx.send(true);
        self.running.store(false, Ordering::SeqCst);
        if let Err(e) = handle.await {
            error!("Task dispatcher ended abnormally: {:?}", e);
        }

        let max = u32::try_from(self.inner.max_concurrent).unwrap_or(u32::MAX);
        if let Ok(all) = self.inner.permits.acquire_many(max).await {
            drop(all);
        }

        let abandoned = self.inner.queue.drain_pending().await;
        if !abandoned.is_empty() {
            warn!("Failing {} queued tasks on shutdown", abandoned.len());
        }
        for task in abandoned {
            self.inner.fail_unstarted(task, FailureReason::Shutdown).await;
        }
        info!("Task processor stopped");
    }

    /// Validates routing and queues `task`.
    ///
    /// A task whose targets are empty or all unregistered fails right away
    /// and never reaches PROCESSING. So does a task submitted after `stop`.
    /// The only error is a task id that is already in use, since the id
    /// is how the task is tracked.
    pub async fn submit(&self, task: AgentTask) -> Result<TaskHandle> {
        let task_id = task.id().to_string();
        let intake_open = self.inner.intake_open.read().await;

        let rx = {
            let mut watchers = self.inner.watchers.write().await;
            if watchers.contains_key(&task_id) || self.inner.queue.get(&task_id).await.is_some() {
                warn!(task_id = %task_id, "rejecting task, id already in use");
                return Err(Error::AgentError(AgentError::DuplicateTask(task_id)));
            }
            let (tx, rx) = watch::channel(TaskRecord::new(task.clone()));
            watchers.insert(task_id.clone(), tx);
            rx
        };
        let handle = TaskHandle {
            id: task_id.clone(),
            rx,
        };

        if !*intake_open {
            warn!(task_id = %task_id, "processor stopped, task not accepted");
            self.inner.fail_unstarted(task, FailureReason::Shutdown).await;
            return Ok(handle);
        }

        let (resolved, missing) = self
            .inner
            .registry
            .resolve_all(&task.target_agent_types)
            .await;
        if resolved.is_empty() {
            warn!(task_id = %task_id, "no registered agent for targets {:?}", missing);
            self.inner
                .fail_unstarted(task, FailureReason::Routing { unresolved: missing })
                .await;
            return Ok(handle);
        }
        if !missing.is_empty() {
            warn!(
                task_id = %task_id,
                "targets {:?} are not registered yet and must be by dispatch time",
                missing
            );
        }

        let priority = task.priority();
        if let Err(e) = self.inner.queue.enqueue(task.clone()).await {
            error!(task_id = %task_id, "enqueue failed: {}", e);
            self.inner
                .fail_unstarted(
                    task,
                    FailureReason::Processing {
                        agent_type: resolved[0].agent_type(),
                        error: e.to_string(),
                    },
                )
                .await;
            return Ok(handle);
        }

        debug!(task_id = %task_id, priority = ?priority, "task queued");
        self.inner.notify.notify_one();
        Ok(handle)
    }

    pub async fn get_task(&self, task_id: &str) -> Option<TaskRecord> {
        self.inner.queue.get(task_id).await
    }

    pub async fn task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.inner.queue.get_task_status(task_id).await
    }

    pub async fn pending_tasks(&self) -> Vec<Task> {
        self.inner.queue.pending_snapshot().await
    }

    pub async fn completed_tasks(&self) -> Vec<Task> {
        self.inner.queue.completed_snapshot().await
    }

    pub async fn queue_depth(&self) -> usize {
        self.inner.queue.depth().await
    }

    pub async fn in_flight(&self) -> usize {
        self.inner.queue.in_flight().await
    }

    pub async fn get_stats(&self) -> TaskQueueStats {
        self.inner.queue.get_stats().await
    }

    async fn run_dispatcher(inner: Arc<ProcessorInner>, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                permit = inner.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let task = loop {
                if let Some(task) = inner.queue.dequeue().await {
                    break task;
                }
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => return,
                    _ = inner.notify.notified() => {}
                }
            };

            let inner = inner.clone();
            tokio::spawn(async move {
                inner.execute(task).await;
                drop(permit);
            });
        }
    }
}

impl ProcessorInner {
    async fn execute(&self, task: AgentTask) {
        let (handles, missing) = self.registry.resolve_all(&task.target_agent_types).await;
        if handles.is_empty() || !missing.is_empty() {
            warn!(task_id = %task.id(), "targets {:?} unresolved at dispatch", missing);
            self.fail_unstarted(task, FailureReason::Routing { unresolved: missing })
                .await;
            return;
        }

        let task = match self.queue.mark_in_progress(task.clone()).await {
            Ok(task) => task,
            Err(e) => {
                error!(task_id = %task.id(), "cannot start task: {}", e);
                let agent_type = handles[0].agent_type();
                self.fail_unstarted(
                    task,
                    FailureReason::Processing {
                        agent_type,
                        error: e.to_string(),
                    },
                )
                .await;
                return;
            }
        };
        self.publish(TaskRecord::new(task.clone())).await;

        let timeout = task.timeout.unwrap_or(self.default_timeout);
        let deadline = Instant::now() + timeout;
        info!(
            task_id = %task.id(),
            targets = ?task.target_agent_types,
            "dispatching task"
        );

        let outcomes = join_all(handles.iter().map(|handle| {
            let task = task.clone();
            async move { (handle.agent_type(), handle.dispatch(task, deadline).await) }
        }))
        .await;

        let mut record = TaskRecord::new(task);
        for (agent_type, outcome) in outcomes {
            match outcome {
                Ok(output) => {
                    record.outputs.insert(agent_type, output);
                }
                Err(reason) => {
                    error!(task_id = %record.id(), agent_type = %agent_type, "{}", reason);
                    if record.failure.is_none() {
                        record.failure = Some(reason);
                    }
                }
            }
        }

        let next = if record.failure.is_none() {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        if let Err(e) = record.task.task.transition(next) {
            error!(task_id = %record.id(), "{}", e);
        }
        self.complete(record).await;
    }

    /// Fails a task that never reached PROCESSING.
    async fn fail_unstarted(&self, mut task: AgentTask, reason: FailureReason) -> TaskRecord {
        if let Err(e) = task.task.transition(TaskStatus::Failed) {
            error!(task_id = %task.id(), "{}", e);
        }
        let mut record = TaskRecord::new(task);
        record.failure = Some(reason);
        self.complete(record.clone()).await;
        record
    }

    async fn complete(&self, record: TaskRecord) {
        self.queue.finish(record.clone()).await;

        for observer in self.observers.read().await.iter() {
            observer.on_task_finished(&record);
        }

        match &record.failure {
            None => info!(task_id = %record.id(), "task completed"),
            Some(reason) => warn!(task_id = %record.id(), "task failed: {}", reason),
        }

        if let Some(tx) = self.watchers.write().await.remove(record.id()) {
            tx.send_replace(record);
        }
    }

    async fn publish(&self, record: TaskRecord) {
        if let Some(tx) = self.watchers.read().await.get(record.id()) {
            tx.send_replace(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::types::{AgentType, Priority, TaskType};
    use crate::testing::{RecordingAgent, TaskCounter};

    async fn processor_with(
        agents: Vec<Arc<RecordingAgent>>,
        config: OrchestratorConfig,
    ) -> TaskProcessor {
        let registry = Arc::new(AgentRegistry::new());
        for agent in agents {
            registry.register(agent).await;
        }
        let processor = TaskProcessor::new(registry, &config);
        processor.start().await;
        processor
    }

    #[tokio::test]
    async fn test_empty_targets_fail_routing() {
        let processor = processor_with(vec![], OrchestratorConfig::default()).await;
        let counter = Arc::new(TaskCounter::default());
        processor.add_observer(counter.clone()).await;

        let task = AgentTask::new("u", TaskType::Analysis, vec![]);
        let record = processor.submit(task).await.unwrap().wait().await;

        assert_eq!(record.status(), TaskStatus::Failed);
        assert!(record.failure.as_ref().unwrap().is_routing());
        assert!(record.task.task.started_at.is_none());
        assert_eq!(counter.failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fan_out_reaches_every_target() {
        let a = Arc::new(RecordingAgent::new(AgentType::LearningPath));
        let b = Arc::new(RecordingAgent::new(AgentType::Scheduling));
        let processor =
            processor_with(vec![a.clone(), b.clone()], OrchestratorConfig::default()).await;

        let task = AgentTask::new(
            "u",
            TaskType::ScheduleOptimization,
            vec![AgentType::LearningPath, AgentType::Scheduling],
        );
        let record = processor.submit(task).await.unwrap().wait().await;

        assert_eq!(record.status(), TaskStatus::Completed);
        assert_eq!(record.outputs.len(), 2);
        assert_eq!(a.processed_tasks().len(), 1);
        assert_eq!(b.processed_tasks().len(), 1);
    }

    #[tokio::test]
    async fn test_fan_out_fails_if_any_target_fails() {
        let ok = Arc::new(RecordingAgent::new(AgentType::LearningPath));
        let bad = Arc::new(RecordingAgent::new(AgentType::Feedback).failing("boom"));
        let processor =
            processor_with(vec![ok.clone(), bad], OrchestratorConfig::default()).await;

        let task = AgentTask::new(
            "u",
            TaskType::FeedbackGeneration,
            vec![AgentType::LearningPath, AgentType::Feedback],
        );
        let record = processor.submit(task).await.unwrap().wait().await;

        assert_eq!(record.status(), TaskStatus::Failed);
        assert!(matches!(
            record.failure,
            Some(FailureReason::Processing { agent_type: AgentType::Feedback, .. })
        ));
        assert_eq!(ok.processed_tasks().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry_is_timeout() {
        let slow = Arc::new(
            RecordingAgent::new(AgentType::Tutoring).with_delay(Duration::from_secs(30)),
        );
        let processor = processor_with(vec![slow], OrchestratorConfig::default()).await;

        let task = AgentTask::new("u", TaskType::Tutoring, vec![AgentType::Tutoring])
            .with_timeout(Duration::from_millis(50));
        let record = processor.submit(task).await.unwrap().wait().await;

        assert_eq!(record.status(), TaskStatus::Failed);
        assert!(matches!(record.failure, Some(FailureReason::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_panicking_agent_is_contained() {
        let agent = Arc::new(RecordingAgent::new(AgentType::UiUx).panicking());
        let processor = processor_with(vec![agent], OrchestratorConfig::default()).await;

        let task = AgentTask::new("u", TaskType::UiOptimization, vec![AgentType::UiUx]);
        let record = processor.submit(task).await.unwrap().wait().await;
        assert_eq!(record.status(), TaskStatus::Failed);

        let again = AgentTask::new("u", TaskType::UiOptimization, vec![AgentType::UiUx]);
        let record = processor.submit(again).await.unwrap().wait().await;
        assert_eq!(record.status(), TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_dispatch_order_follows_priority() {
        let gate = Arc::new(Semaphore::new(0));
        let agent = Arc::new(
            RecordingAgent::new(AgentType::Assessment).with_gate(gate.clone()),
        );
        let config = OrchestratorConfig {
            max_concurrent_tasks: 1,
            ..Default::default()
        };
        let processor = processor_with(vec![agent.clone()], config).await;

        let make = |id: &str, priority: Priority| {
            AgentTask::new("u", TaskType::AssessmentGeneration, vec![AgentType::Assessment])
                .with_id(id)
                .with_priority(priority)
        };

        let mut handles = Vec::new();
        handles.push(processor.submit(make("first", Priority::Critical)).await.unwrap());
        handles.push(processor.submit(make("low", Priority::Low)).await.unwrap());
        handles.push(processor.submit(make("high-a", Priority::High)).await.unwrap());
        handles.push(processor.submit(make("medium", Priority::Medium)).await.unwrap());
        handles.push(processor.submit(make("high-b", Priority::High)).await.unwrap());

        gate.add_permits(handles.len());
        for handle in handles {
            assert_eq!(handle.wait().await.status(), TaskStatus::Completed);
        }

        assert_eq!(
            agent.processed_tasks(),
            vec!["first", "high-a", "high-b", "medium", "low"]
        );
    }

    #[tokio::test]
    async fn test_single_worker_never_overlaps() {
        let agent = Arc::new(
            RecordingAgent::new(AgentType::Engagement).with_delay(Duration::from_millis(5)),
        );
        let processor = processor_with(vec![agent.clone()], OrchestratorConfig::default()).await;

        let mut handles = Vec::new();
        for i in 0..5 {
            let task = AgentTask::new(
                "u",
                TaskType::EngagementOptimization,
                vec![AgentType::Engagement],
            )
            .with_id(format!("t{i}"));
            handles.push(processor.submit(task).await.unwrap());
        }
        for handle in handles {
            handle.wait().await;
        }

        assert_eq!(agent.max_overlap(), 1);
        assert_eq!(agent.processed_tasks(), vec!["t0", "t1", "t2", "t3", "t4"]);
    }

    #[tokio::test]
    async fn test_task_submitted_before_start_waits() {
        let registry = Arc::new(AgentRegistry::new());
        registry
            .register(Arc::new(RecordingAgent::new(AgentType::Feedback)))
            .await;
        let processor = TaskProcessor::new(registry, &OrchestratorConfig::default());

        let handle = processor
            .submit(AgentTask::new("u", TaskType::FeedbackGeneration, vec![AgentType::Feedback]))
            .await
            .unwrap();
        assert_eq!(handle.current().status(), TaskStatus::Pending);
        assert_eq!(processor.queue_depth().await, 1);

        processor.start().await;
        assert_eq!(handle.wait().await.status(), TaskStatus::Completed);
        processor.stop().await;
    }

    #[tokio::test]
    async fn test_submit_after_stop_fails_with_shutdown() {
        let agent = Arc::new(RecordingAgent::new(AgentType::Feedback));
        let processor = processor_with(vec![agent.clone()], OrchestratorConfig::default()).await;
        let counter = Arc::new(TaskCounter::default());
        processor.add_observer(counter.clone()).await;

        processor.stop().await;
        let record = processor
            .submit(AgentTask::new("u", TaskType::FeedbackGeneration, vec![AgentType::Feedback]))
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(record.status(), TaskStatus::Failed);
        assert_eq!(record.failure, Some(FailureReason::Shutdown));
        assert!(record.task.task.started_at.is_none());
        assert_eq!(counter.failed.load(Ordering::SeqCst), 1);
        assert_eq!(processor.queue_depth().await, 0);
        assert!(agent.processed_tasks().is_empty());

        processor.start().await;
        let record = processor
            .submit(AgentTask::new("u", TaskType::FeedbackGeneration, vec![AgentType::Feedback]))
            .await
            .unwrap()
            .wait()
            .await;
        assert_eq!(record.status(), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_stop_fails_queued_tasks() {
        let gate = Arc::new(Semaphore::new(0));
        let agent = Arc::new(RecordingAgent::new(AgentType::Feedback).with_gate(gate.clone()));
        let config = OrchestratorConfig {
            max_concurrent_tasks: 1,
            ..Default::default()
        };
        let processor = Arc::new(processor_with(vec![agent.clone()], config).await);
        let counter = Arc::new(TaskCounter::default());
        processor.add_observer(counter.clone()).await;

        let make = |id: &str| {
            AgentTask::new("u", TaskType::FeedbackGeneration, vec![AgentType::Feedback]).with_id(id)
        };
        let running = processor.submit(make("running")).await.unwrap();
        while processor.in_flight().await == 0 {
            tokio::task::yield_now().await;
        }
        let queued = processor.submit(make("queued")).await.unwrap();

        let stopper = tokio::spawn({
            let processor = processor.clone();
            async move { processor.stop().await }
        });
        while processor.is_running() {
            tokio::task::yield_now().await;
        }
        gate.add_permits(1);
        stopper.await.unwrap();

        assert_eq!(running.wait().await.status(), TaskStatus::Completed);
        let record = queued.wait().await;
        assert_eq!(record.failure, Some(FailureReason::Shutdown));
        assert_eq!(agent.processed_tasks(), vec!["running"]);
        assert_eq!(counter.completed.load(Ordering::SeqCst), 1);
        assert_eq!(counter.failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_task_id_is_rejected() {
        let gate = Arc::new(Semaphore::new(0));
        let agent = Arc::new(RecordingAgent::new(AgentType::Scheduling).with_gate(gate.clone()));
        let processor = processor_with(vec![agent.clone()], OrchestratorConfig::default()).await;
        let counter = Arc::new(TaskCounter::default());
        processor.add_observer(counter.clone()).await;

        let make = || {
            AgentTask::new("u", TaskType::ScheduleOptimization, vec![AgentType::Scheduling])
                .with_id("dup")
        };
        let first = processor.submit(make()).await.unwrap();

        let err = processor.submit(make()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::AgentError(AgentError::DuplicateTask(ref id)) if id == "dup"
        ));

        gate.add_permits(1);
        let record = first.wait().await;
        assert_eq!(record.status(), TaskStatus::Completed);

        // a finished record still owns its id
        assert!(processor.submit(make()).await.is_err());
        assert_eq!(agent.processed_tasks(), vec!["dup"]);
        assert_eq!(counter.completed.load(Ordering::SeqCst), 1);
        assert_eq!(counter.failed.load(Ordering::SeqCst), 0);
    }
}
