use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::agent::{
    core::base_agent::{AgentBehavior, BaseAgent},
    task::AgentTask,
    types::{AgentType, TaskType},
};
use crate::error::{Error, Result, agent_error::AgentError};
use crate::multi_agent::communication::{AgentMessage, MessageType};

/// Learning channels a profile weighs.
pub const LEARNING_CHANNELS: [&str; 4] = ["visual", "auditory", "reading", "kinesthetic"];

/// Per-user profile owned by [`CognitiveProfileAgent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CognitiveProfile {
    pub user_id: String,
    /// Channel weight, summing to 1 when any responses were seen
    pub learning_style: BTreeMap<String, f64>,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub recommended_topics: Vec<String>,
    pub retention_patterns: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How a profile is computed from a profiling task.
#[async_trait]
pub trait ProfilingStrategy: Send + Sync {
    async fn build_profile(
        &self,
        task: &AgentTask,
        previous: Option<&CognitiveProfile>,
    ) -> Result<CognitiveProfile>;
}

/// Builds profiles from quiz responses in the task payload:
///
/// ```json
/// { "channel_responses": { "visual": 6, "reading": 2 },
///   "topic_scores": { "algebra": 0.9, "geometry": 0.3 } }
/// ```
#[derive(Debug, Clone)]
pub struct ResponseProfilingStrategy {
    pub strength_threshold: f64,
    pub weakness_threshold: f64,
}

impl Default for ResponseProfilingStrategy {
    fn default() -> Self {
        Self {
            strength_threshold: 0.7,
            weakness_threshold: 0.5,
        }
    }
}

/// Fields of a profiling payload. Anything else in the payload is ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProfilingInput {
    channel_responses: HashMap<String, f64>,
    topic_scores: BTreeMap<String, f64>,
}

impl ProfilingInput {
    fn parse(payload: &serde_json::Value) -> Result<Self> {
        if payload.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(payload.clone())?)
    }
}

#[async_trait]
impl ProfilingStrategy for ResponseProfilingStrategy {
    async fn build_profile(
        &self,
        task: &AgentTask,
        previous: Option<&CognitiveProfile>,
    ) -> Result<CognitiveProfile> {
        let input = ProfilingInput::parse(task.payload())?;

        let counts: Vec<(&str, f64)> = LEARNING_CHANNELS
            .iter()
            .map(|c| {
                let n = input.channel_responses.get(*c).copied().unwrap_or(0.0);
                (*c, n.max(0.0))
            })
            .collect();
        let total: f64 = counts.iter().map(|(_, n)| n).sum();
        let learning_style: BTreeMap<String, f64> = counts
            .into_iter()
            .map(|(channel, n)| {
                let weight = if total > 0.0 { n / total } else { 0.0 };
                (channel.to_string(), weight)
            })
            .collect();

        let mut scores: Vec<(String, f64)> = input.topic_scores.into_iter().collect();
        scores.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let strengths = scores
            .iter()
            .rev()
            .filter(|(_, s)| *s >= self.strength_threshold)
            .map(|(t, _)| t.clone())
            .collect();
        let weaknesses: Vec<String> = scores
            .iter()
            .filter(|(_, s)| *s < self.weakness_threshold)
            .map(|(t, _)| t.clone())
            .collect();

        let now = Utc::now();
        Ok(CognitiveProfile {
            user_id: task.user_id.clone(),
            learning_style,
            strengths,
            recommended_topics: weaknesses.clone(),
            weaknesses,
            retention_patterns: scores.into_iter().collect(),
            created_at: previous.map_or(now, |p| p.created_at),
            updated_at: now,
        })
    }
}

/// Keeps one cognitive profile per user up to date.
pub struct CognitiveProfileAgent {
    base: BaseAgent,
    strategy: Arc<dyn ProfilingStrategy>,
    profiles: RwLock<HashMap<String, CognitiveProfile>>,
    test_runs: RwLock<Vec<String>>,
    active_users: RwLock<HashSet<String>>,
    messages_seen: AtomicU64,
}

impl CognitiveProfileAgent {
    pub fn new(id: Option<String>) -> Self {
        Self::with_strategy(id, Arc::new(ResponseProfilingStrategy::default()))
    }

    pub fn with_strategy(id: Option<String>, strategy: Arc<dyn ProfilingStrategy>) -> Self {
        let id = id.unwrap_or_else(|| BaseAgent::generate_id(&AgentType::CognitiveProfile));
        Self {
            base: BaseAgent::new(id, AgentType::CognitiveProfile),
            strategy,
            profiles: RwLock::new(HashMap::new()),
            test_runs: RwLock::new(Vec::new()),
            active_users: RwLock::new(HashSet::new()),
            messages_seen: AtomicU64::new(0),
        }
    }

    pub async fn profile(&self, user_id: &str) -> Option<CognitiveProfile> {
        self.profiles.read().await.get(user_id).cloned()
    }

    /// Ids of test tasks that reached this worker.
    pub async fn test_runs(&self) -> Vec<String> {
        self.test_runs.read().await.clone()
    }

    pub async fn has_active_session(&self, user_id: &str) -> bool {
        self.active_users.read().await.contains(user_id)
    }

    pub fn messages_seen(&self) -> u64 {
        self.messages_seen.load(Ordering::Relaxed)
    }

    /// Test path: proves dispatch reached this worker, computes nothing.
    async fn process_test_task(&self, task: &AgentTask) -> Result<serde_json::Value> {
        self.base
            .log_task_event(task, "processing test task for distribution check");
        self.test_runs.write().await.push(task.id().to_string());
        Ok(serde_json::json!({
            "agent_type": self.base.agent_type,
            "task_id": task.id(),
            "simulated": true,
        }))
    }

    async fn update_profile(&self, task: &AgentTask) -> Result<serde_json::Value> {
        let previous = self.profile(&task.user_id).await;
        let profile = self
            .strategy
            .build_profile(task, previous.as_ref())
            .await
            .inspect_err(|e| self.base.log_error("profiling failed", e))?;

        let summary = serde_json::json!({
            "user_id": profile.user_id,
            "updated_at": profile.updated_at,
            "is_new": previous.is_none(),
        });
        self.profiles
            .write()
            .await
            .insert(task.user_id.clone(), profile);
        Ok(summary)
    }
}

#[async_trait]
impl AgentBehavior for CognitiveProfileAgent {
    fn get_id(&self) -> &str {
        &self.base.id
    }

    fn agent_type(&self) -> AgentType {
        self.base.agent_type
    }

    async fn process_task(&self, task: &AgentTask) -> Result<serde_json::Value> {
        self.base.log_task_event(task, "started processing task");

        if task.task.is_test_task() {
            return self.process_test_task(task).await;
        }

        let result = match task.task_type() {
            TaskType::CognitiveProfiling | TaskType::Analysis => self.update_profile(task).await,
            other => Err(Error::AgentError(AgentError::ProcessingError {
                agent_type: self.base.agent_type,
                reason: format!("unsupported task type {other:?}"),
            })),
        };

        if result.is_ok() {
            self.base
                .log_task_event(task, "completed processing task successfully");
        }
        result
    }

    async fn receive_message(&self, message: &AgentMessage) -> Result<()> {
        self.base.log_message_event(message, "received message");
        self.messages_seen.fetch_add(1, Ordering::Relaxed);

        if message.message_type == MessageType::UserSessionStarted
            && let Some(user_id) = message.payload.get("user_id").and_then(|v| v.as_str())
        {
            self.active_users.write().await.insert(user_id.to_string());
            debug!("CognitiveProfileAgent {} tracking session of {}", self.base.id, user_id);
        }
        Ok(())
    }

    fn get_status(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.base.id,
            "type": self.base.agent_type,
            "strategy": "pluggable",
        })
    }
}
