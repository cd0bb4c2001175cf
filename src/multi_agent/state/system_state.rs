use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    agent::{
        task::{Task, TaskRecord},
        types::{AgentType, LoadStatus},
    },
    multi_agent::{
        coordination::{TaskLifecycleObserver, TaskQueue},
        registry::AgentRegistry,
    },
    shared::config::OrchestratorConfig,
};

/// Somewhere to write per-session global variables.
#[async_trait]
pub trait GlobalVariableSink: Send + Sync {
    async fn set_global_variable(&self, key: String, value: serde_json::Value);
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    /// completed / (completed + failed), 0 before any task finished
    pub success_rate: f64,
    pub average_response_time_ms: f64,
    /// finished / (finished + outstanding)
    pub task_completion_rate: f64,
}

/// Immutable point-in-time view of the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    pub active_agents: BTreeMap<AgentType, bool>,
    pub task_queue: Vec<Task>,
    /// Retained tasks that finished COMPLETED
    pub completed_tasks: Vec<Task>,
    /// Retained tasks that finished FAILED
    pub failed_tasks: Vec<Task>,
    pub metrics: SystemMetrics,
    pub global_variables: HashMap<String, serde_json::Value>,
    pub last_updated: DateTime<Utc>,
    /// Tasks queued or in flight
    pub current_load: usize,
    pub load: LoadStatus,
}

#[derive(Debug)]
struct Counters {
    completed: u64,
    failed: u64,
    response_time_total: Duration,
    response_samples: u64,
    last_updated: DateTime<Utc>,
}

/// Aggregates task outcomes and global variables into snapshots.
pub struct SystemStateManager {
    known_agents: BTreeSet<AgentType>,
    registry: Arc<AgentRegistry>,
    queue: Arc<TaskQueue>,
    config: OrchestratorConfig,
    counters: Mutex<Counters>,
    global_variables: RwLock<HashMap<String, serde_json::Value>>,
}

impl SystemStateManager {
    /// `known_agents` are always listed in snapshots, live or not.
    pub fn new(
        known_agents: BTreeSet<AgentType>,
        registry: Arc<AgentRegistry>,
        queue: Arc<TaskQueue>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            known_agents,
            registry,
            queue,
            config,
            counters: Mutex::new(Counters {
                completed: 0,
                failed: 0,
                response_time_total: Duration::ZERO,
                response_samples: 0,
                last_updated: Utc::now(),
            }),
            global_variables: RwLock::new(HashMap::new()),
        }
    }

    pub fn update_metrics(&self, success: bool) {
        let mut counters = self.counters();
        if success {
            counters.completed += 1;
        } else {
            counters.failed += 1;
        }
        counters.last_updated = Utc::now();
    }

    pub fn record_response_time(&self, elapsed: Duration) {
        let mut counters = self.counters();
        counters.response_time_total += elapsed;
        counters.response_samples += 1;
    }

    pub async fn set_global_variable(&self, key: impl Into<String>, value: serde_json::Value) {
        self.global_variables.write().await.insert(key.into(), value);
        self.counters().last_updated = Utc::now();
    }

    pub async fn get_global_variable(&self, key: &str) -> Option<serde_json::Value> {
        self.global_variables.read().await.get(key).cloned()
    }

    /// Current counters only, without touching the queue or registry.
    pub fn metrics(&self) -> SystemMetrics {
        let counters = self.counters();
        let finished = counters.completed + counters.failed;
        SystemMetrics {
            completed_tasks: counters.completed,
            failed_tasks: counters.failed,
            success_rate: ratio(counters.completed, finished),
            average_response_time_ms: if counters.response_samples == 0 {
                0.0
            } else {
                counters.response_time_total.as_secs_f64() * 1000.0
                    / counters.response_samples as f64
            },
            task_completion_rate: 0.0,
        }
    }

    pub async fn get_system_state(&self) -> SystemState {
        let mut active_agents: BTreeMap<AgentType, bool> =
            self.known_agents.iter().map(|t| (*t, false)).collect();
        active_agents.extend(self.registry.liveness().await);

        let task_queue = self.queue.pending_snapshot().await;
        let completed_tasks = self.queue.completed_snapshot().await;
        let failed_tasks = self.queue.failed_snapshot().await;
        let current_load = task_queue.len() + self.queue.in_flight().await;
        let global_variables = self.global_variables.read().await.clone();

        let mut metrics = self.metrics();
        let finished = metrics.completed_tasks + metrics.failed_tasks;
        metrics.task_completion_rate = ratio(finished, finished + current_load as u64);
        let last_updated = self.counters().last_updated;

        debug!(current_load, "system state snapshot taken");
        SystemState {
            active_agents,
            task_queue,
            completed_tasks,
            failed_tasks,
            metrics,
            global_variables,
            last_updated,
            current_load,
            load: self.config.classify_load(current_load),
        }
    }

    fn counters(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

impl TaskLifecycleObserver for SystemStateManager {
    fn on_task_finished(&self, record: &TaskRecord) {
        self.update_metrics(record.is_success());
        if let Some(elapsed) = record.task.task.response_time() {
            self.record_response_time(elapsed);
        }
    }
}

#[async_trait]
impl GlobalVariableSink for SystemStateManager {
    async fn set_global_variable(&self, key: String, value: serde_json::Value) {
        SystemStateManager::set_global_variable(self, key, value).await;
    }
}
