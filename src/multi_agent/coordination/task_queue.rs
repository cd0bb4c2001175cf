use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use tokio::sync::RwLock;

use crate::agent::{
    task::{AgentTask, Task, TaskRecord},
    types::{Priority, TaskStatus},
};
use crate::error::{Error, Result, agent_error::AgentError};

#[derive(Default)]
struct QueueState {
    /// Pending tasks, one FIFO per priority
    pending: HashMap<Priority, VecDeque<AgentTask>>,
    /// Tasks in PROCESSING, by id
    in_progress: HashMap<String, AgentTask>,
    /// Finished records, oldest first
    finished: VecDeque<TaskRecord>,
}

/// Priority queue plus in-progress and finished task records.
///
/// All state sits behind one lock so a snapshot never sees a task in two
/// places at once.
pub struct TaskQueue {
    state: RwLock<QueueState>,
    retention: usize,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl TaskQueue {
    /// `retention` bounds how many finished records are kept.
    pub fn new(retention: usize) -> Self {
        let mut pending = HashMap::new();
        for priority in Priority::DISPATCH_ORDER {
            pending.insert(priority, VecDeque::new());
        }

        Self {
            state: RwLock::new(QueueState {
                pending,
                ..Default::default()
            }),
            retention,
        }
    }

    /// Queues a PENDING task behind others of its priority.
    pub async fn enqueue(&self, task: AgentTask) -> Result<()> {
        if task.status() != TaskStatus::Pending {
            return Err(Error::AgentError(AgentError::InvalidTransition {
                from: task.status(),
                to: TaskStatus::Pending,
            }));
        }

        self.state
            .write()
            .await
            .pending
            .entry(task.priority())
            .or_default()
            .push_back(task);
        Ok(())
    }

    /// Pops the next task, highest priority first and FIFO within a band.
    pub async fn dequeue(&self) -> Option<AgentTask> {
        let mut state = self.state.write().await;
        Priority::DISPATCH_ORDER
            .iter()
            .find_map(|priority| state.pending.get_mut(priority)?.pop_front())
    }

    pub async fn mark_in_progress(&self, mut task: AgentTask) -> Result<AgentTask> {
        task.task.transition(TaskStatus::Processing)?;
        self.state
            .write()
            .await
            .in_progress
            .insert(task.id().to_string(), task.clone());
        Ok(task)
    }

    /// Files a terminal record, dropping the oldest one past retention.
    pub async fn finish(&self, record: TaskRecord) {
        let mut state = self.state.write().await;
        state.in_progress.remove(record.id());
        state.finished.push_back(record);
        while state.finished.len() > self.retention {
            state.finished.pop_front();
        }
    }

    /// Removes every pending task, in dispatch order.
    pub async fn drain_pending(&self) -> Vec<AgentTask> {
        let mut state = self.state.write().await;
        let mut drained = Vec::new();
        for priority in Priority::DISPATCH_ORDER {
            if let Some(queue) = state.pending.get_mut(&priority) {
                drained.extend(queue.drain(..));
            }
        }
        drained
    }

    /// Looks a task up wherever it currently is.
    pub async fn get(&self, task_id: &str) -> Option<TaskRecord> {
        let state = self.state.read().await;

        if let Some(task) = state.in_progress.get(task_id) {
            return Some(TaskRecord::new(task.clone()));
        }

        if let Some(record) = state.finished.iter().rev().find(|r| r.id() == task_id) {
            return Some(record.clone());
        }

        state
            .pending
            .values()
            .flat_map(|queue| queue.iter())
            .find(|t| t.id() == task_id)
            .map(|t| TaskRecord::new(t.clone()))
    }

    pub async fn get_task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.get(task_id).await.map(|r| r.status())
    }

    /// Pending tasks in the order they would be dispatched.
    pub async fn pending_snapshot(&self) -> Vec<Task> {
        let state = self.state.read().await;
        Priority::DISPATCH_ORDER
            .iter()
            .filter_map(|priority| state.pending.get(priority))
            .flat_map(|queue| queue.iter().map(|t| t.task.clone()))
            .collect()
    }

    /// Retained tasks that completed successfully, oldest first.
    pub async fn completed_snapshot(&self) -> Vec<Task> {
        self.state
            .read()
            .await
            .finished
            .iter()
            .filter(|r| r.is_success())
            .map(|r| r.task.task.clone())
            .collect()
    }

    /// Retained tasks that ended FAILED, oldest first.
    pub async fn failed_snapshot(&self) -> Vec<Task> {
        self.state
            .read()
            .await
            .finished
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| r.task.task.clone())
            .collect()
    }

    pub async fn depth(&self) -> usize {
        self.state.read().await.pending.values().map(|q| q.len()).sum()
    }

    pub async fn in_flight(&self) -> usize {
        self.state.read().await.in_progress.len()
    }

    pub async fn get_stats(&self) -> TaskQueueStats {
        let state = self.state.read().await;
        let completed = state.finished.iter().filter(|r| r.is_success()).count();

        TaskQueueStats {
            pending: state.pending.values().map(|q| q.len()).sum(),
            in_progress: state.in_progress.len(),
            completed,
            failed: state.finished.len() - completed,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskQueueStats {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}
