pub mod agent_error;

use thiserror::Error as ThisError;

use crate::error::agent_error::AgentError;

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("serde_json error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    #[error("config error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("agent error: {0}")]
    AgentError(#[from] AgentError),
}

pub type Result<T> = core::result::Result<T, Error>;
