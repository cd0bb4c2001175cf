use std::{path::Path, time::Duration};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::{
    agent::types::LoadStatus,
    error::{Error, Result, agent_error::AgentError},
};

/// Prefix of environment overrides, e.g. `LEARNAGENT_MAX_CONCURRENT_TASKS=4`.
pub const ENV_PREFIX: &str = "LEARNAGENT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Tasks allowed in PROCESSING at once across all workers
    pub max_concurrent_tasks: usize,
    /// Deadline applied to tasks that carry none of their own
    pub task_timeout_secs: u64,
    /// Finished task records kept for queries and snapshots
    pub completed_task_retention: usize,
    /// Messages kept in the communication history
    pub message_history_size: usize,
    /// Outstanding tasks at which the system stops being idle
    pub processing_threshold: usize,
    /// Outstanding tasks at which the system counts as overloaded
    pub overloaded_threshold: usize,
    pub logging: LoggingConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 10,
            task_timeout_secs: 300,
            completed_task_retention: 1000,
            message_history_size: 1000,
            processing_threshold: 1,
            overloaded_threshold: 20,
            logging: LoggingConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Layers defaults, an optional TOML file, then `LEARNAGENT_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: OrchestratorConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let problem = if self.max_concurrent_tasks == 0 {
            Some("max_concurrent_tasks must be at least 1")
        } else if self.task_timeout_secs == 0 {
            Some("task_timeout_secs must be at least 1")
        } else if self.completed_task_retention == 0 {
            Some("completed_task_retention must be at least 1")
        } else if self.processing_threshold == 0 {
            Some("processing_threshold must be at least 1")
        } else if self.processing_threshold > self.overloaded_threshold {
            Some("processing_threshold must not exceed overloaded_threshold")
        } else {
            None
        };

        match problem {
            Some(msg) => Err(Error::AgentError(AgentError::InitializationError(
                msg.to_string(),
            ))),
            None => Ok(()),
        }
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn classify_load(&self, outstanding: usize) -> LoadStatus {
        if outstanding >= self.overloaded_threshold {
            LoadStatus::Overloaded
        } else if outstanding >= self.processing_threshold {
            LoadStatus::Processing
        } else {
            LoadStatus::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_valid() {
        OrchestratorConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let config = OrchestratorConfig {
            processing_threshold: 30,
            overloaded_threshold: 5,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            Error::AgentError(AgentError::InitializationError(_))
        ));
    }

    #[test]
    fn test_classify_load() {
        let config = OrchestratorConfig {
            processing_threshold: 1,
            overloaded_threshold: 3,
            ..Default::default()
        };
        assert_eq!(config.classify_load(0), LoadStatus::Idle);
        assert_eq!(config.classify_load(2), LoadStatus::Processing);
        assert_eq!(config.classify_load(3), LoadStatus::Overloaded);
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "max_concurrent_tasks = 2\noverloaded_threshold = 8\n[logging]\njson = true"
        )
        .unwrap();

        let config = OrchestratorConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.max_concurrent_tasks, 2);
        assert_eq!(config.overloaded_threshold, 8);
        assert!(config.logging.json);
        assert_eq!(config.task_timeout_secs, 300);
    }
}
