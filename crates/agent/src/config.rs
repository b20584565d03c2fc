//! Agent configuration

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;
use workload_lib::config::ControlConfig;

/// Prefix for environment overrides, e.g. `WORKLOAD__API_PORT` or
/// `WORKLOAD__CONTROL__EXECUTOR__MAX_CONCURRENT_TASKS`
pub const ENV_PREFIX: &str = "WORKLOAD";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Node name reported in structured logs
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics/status
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Executor, monitor and optimizer settings
    #[serde(default)]
    pub control: ControlConfig,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

impl AgentConfig {
    /// Load configuration from an optional file layered under the environment
    ///
    /// Invalid control loop settings are rejected here.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AgentConfig = settings.try_deserialize()?;
        config.control.validate()?;
        Ok(config)
    }
}
