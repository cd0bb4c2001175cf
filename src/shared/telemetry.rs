use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    error::{Error, Result, agent_error::AgentError},
    shared::config::LoggingConfig,
};

/// `RUST_LOG` wins over the configured level when it is set.
fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            Error::AgentError(AgentError::InitializationError(format!(
                "invalid log level {:?}: {e}",
                config.level
            )))
        }),
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    installed.map_err(|e| {
        Error::AgentError(AgentError::InitializationError(format!(
            "tracing subscriber: {e}"
        )))
    })?;

    tracing::debug!(level = %config.level, json = config.json, "tracing initialized");
    Ok(())
}
