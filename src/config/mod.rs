//! # AS4 Core Configuration
//!
//! YAML based configuration with per-environment overrides. A single
//! `as4-config.yaml` holds the base values plus optional `development`,
//! `test` and `production` sections that are merged over them.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use as4_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let retry_interval = manager.config().reception_awareness.polling_interval();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::models::Operation;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct As4Config {
    /// Set by the loader from the detected environment
    #[serde(default)]
    pub environment: String,
    /// Domain part of generated ebMS message ids
    #[serde(default = "default_message_id_suffix")]
    pub message_id_suffix: String,
    #[serde(default)]
    pub pmodes: PModeDirectoryConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub reception_awareness: ReceptionAwarenessConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub pull_requests: PullRequestConfig,
    #[serde(default)]
    pub pipelines: HashMap<String, PipelineConfiguration>,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

fn default_message_id_suffix() -> String {
    "as4.core".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PModeDirectoryConfig {
    pub directory: PathBuf,
}

impl Default for PModeDirectoryConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("config/pmodes"),
        }
    }
}

/// Only read when the `postgres` feature is enabled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceptionAwarenessConfig {
    pub enabled: bool,
    pub polling_interval_ms: u64,
    pub batch_size: usize,
    /// Unbounded when absent
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

impl Default for ReceptionAwarenessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            polling_interval_ms: 5_000,
            batch_size: 50,
            max_concurrency: None,
        }
    }
}

impl ReceptionAwarenessConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }
}

/// Defaults for datastore receivers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingConfig {
    pub polling_interval_ms: u64,
    pub batch_size: usize,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: 1_000,
            batch_size: 20,
            max_concurrency: None,
        }
    }
}

impl PollingConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestConfig {
    pub tick_ms: u64,
    #[serde(default)]
    pub mpcs: Vec<PullMpcConfig>,
}

impl Default for PullRequestConfig {
    fn default() -> Self {
        Self {
            tick_ms: 500,
            mpcs: Vec::new(),
        }
    }
}

impl PullRequestConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullMpcConfig {
    pub mpc: String,
    #[serde(default)]
    pub pmode_id: Option<String>,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
}

/// Ordered step names of one agent's pipelines
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfiguration {
    pub normal_pipeline: Vec<String>,
    #[serde(default)]
    pub error_pipeline: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiverKind {
    Datastore,
    PullRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformerKind {
    /// Decode messages pushed by a remote MSH
    Receive,
    /// Decode stored out messages and pull requests
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionHandlerKind {
    Inbound,
    Outbound,
    Log,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    pub receiver: ReceiverKind,
    /// Operation polled by a datastore receiver
    #[serde(default)]
    pub operation: Option<Operation>,
    pub transformer: TransformerKind,
    /// Key into [`As4Config::pipelines`]
    pub pipeline: String,
    pub exception_handler: ExceptionHandlerKind,
}

impl Default for As4Config {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            message_id_suffix: default_message_id_suffix(),
            pmodes: PModeDirectoryConfig::default(),
            database: DatabaseConfig::default(),
            reception_awareness: ReceptionAwarenessConfig::default(),
            polling: PollingConfig::default(),
            pull_requests: PullRequestConfig::default(),
            pipelines: HashMap::new(),
            agents: Vec::new(),
        }
    }
}

impl As4Config {
    /// Validate configuration for consistency and required fields
    pub fn validate(&self) -> ConfigResult<()> {
        if self.message_id_suffix.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "message_id_suffix",
                "root configuration",
            ));
        }

        if self.reception_awareness.batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "reception_awareness.batch_size",
                "0",
                "batch size must be greater than 0",
            ));
        }

        if self.polling.batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "polling.batch_size",
                "0",
                "batch size must be greater than 0",
            ));
        }

        for (field, cap) in [
            ("reception_awareness.max_concurrency", self.reception_awareness.max_concurrency),
            ("polling.max_concurrency", self.polling.max_concurrency),
        ] {
            if cap == Some(0) {
                return Err(ConfigurationError::invalid_value(
                    field,
                    "0",
                    "leave unset for unbounded concurrency",
                ));
            }
        }

        for mpc in &self.pull_requests.mpcs {
            if mpc.min_interval_ms == 0 {
                return Err(ConfigurationError::invalid_value(
                    format!("pull_requests.mpcs[{}].min_interval_ms", mpc.mpc),
                    "0",
                    "pull interval must be greater than 0",
                ));
            }
        }

        for (name, pipeline) in &self.pipelines {
            if pipeline.normal_pipeline.is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    format!("pipelines.{name}.normal_pipeline"),
                    "at least one step must be configured",
                ));
            }
        }

        self.validate_agents()
    }

    fn validate_agents(&self) -> ConfigResult<()> {
        let mut seen = std::collections::HashSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.name.as_str()) {
                return Err(ConfigurationError::validation_error(format!(
                    "agent name '{}' is used more than once",
                    agent.name
                )));
            }

            if !self.pipelines.contains_key(&agent.pipeline) {
                return Err(ConfigurationError::invalid_value(
                    format!("agents.{}.pipeline", agent.name),
                    agent.pipeline.clone(),
                    "no pipeline with this name is configured",
                ));
            }

            match (agent.receiver, agent.operation) {
                (ReceiverKind::Datastore, None) => {
                    return Err(ConfigurationError::missing_required_field(
                        format!("agents.{}.operation", agent.name),
                        "datastore receivers poll one operation",
                    ));
                }
                (ReceiverKind::Datastore, Some(operation)) if operation.in_progress().is_none() => {
                    return Err(ConfigurationError::invalid_value(
                        format!("agents.{}.operation", agent.name),
                        operation.to_string(),
                        "operation cannot be polled",
                    ));
                }
                (ReceiverKind::PullRequest, _) if self.pull_requests.mpcs.is_empty() => {
                    return Err(ConfigurationError::missing_required_field(
                        "pull_requests.mpcs",
                        format!("agent '{}' pulls but no MPC is configured", agent.name),
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn is_test_environment(&self) -> bool {
        self.environment == "test"
    }

    pub fn is_production_environment(&self) -> bool {
        self.environment == "production"
    }
}
