use std::{path::PathBuf, sync::Arc};

use learnagent::{
    agent::{
        core::base_agent::AgentBehavior,
        task::AgentTask,
        types::{AgentType, Priority, TaskType},
    },
    agents::CognitiveProfileAgent,
    multi_agent::{
        communication::{AgentMessage, MessageType},
        manager::MasterControlProgram,
    },
    shared::{config::OrchestratorConfig, telemetry},
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // optional config file path
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = OrchestratorConfig::load(config_path.as_deref())?;
    telemetry::init_tracing(&config.logging)?;

    info!("Starting learning session demo...");

    let profiler = Arc::new(CognitiveProfileAgent::new(Some("profiler-001".to_string())));
    let agents: Vec<Arc<dyn AgentBehavior>> = vec![profiler.clone()];
    let mcp = MasterControlProgram::start(config, agents).await?;

    let mut sessions = mcp.subscribe_sessions();
    tokio::spawn(async move {
        while let Ok(msg) = sessions.recv().await {
            info!("session feed: {:?} {}", msg.message_type, msg.payload);
        }
    });

    // new user session
    if let Some(bootstrap) = mcp.initialize_for_user("learner-42").await? {
        let record = bootstrap.wait().await;
        info!("bootstrap task {} ended as {:?}", record.id(), record.status());
    }

    let quiz = AgentTask::new(
        "learner-42",
        TaskType::CognitiveProfiling,
        vec![AgentType::CognitiveProfile],
    )
    .with_priority(Priority::Medium)
    .with_payload(serde_json::json!({
        "channel_responses": { "visual": 5, "reading": 3, "kinesthetic": 2 },
        "topic_scores": { "fractions": 0.92, "ratios": 0.41, "decimals": 0.66 }
    }));
    let record = mcp.submit_task(quiz).await?.wait().await;
    if let Some(reason) = &record.failure {
        warn!("profiling failed: {}", reason);
    }

    if let Some(profile) = profiler.profile("learner-42").await {
        info!("profile: {}", serde_json::to_string_pretty(&profile)?);
    }

    // nobody serves Tutoring, so this fails routing
    let orphan = AgentTask::new("learner-42", TaskType::Tutoring, vec![AgentType::Tutoring]);
    let record = mcp.submit_task(orphan).await?.wait().await;
    info!("orphan task: {:?}", record.failure);

    mcp.broadcast_message(
        AgentMessage::broadcast("demo", MessageType::StatusUpdate, serde_json::json!({ "phase": "done" })),
        None,
    )
    .await?;

    let state = mcp.get_system_state().await;
    info!("system state: {}", serde_json::to_string_pretty(&state)?);

    mcp.stop().await;
    Ok(())
}
