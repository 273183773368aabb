use std::{collections::HashSet, fs, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod agent;
pub mod cluster;
pub mod constants;
pub mod sink;
pub mod tuning;

pub use agent::{AgentConfig, AgentConfigError};
pub use cluster::{ClusterConfig, ClusterConfigError, TriageToggle};
pub use sink::SinkConfig;
pub use tuning::{OverflowPolicy, Tuning};

use crate::constants::DEFAULT_HEALTH_PORT;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("no clusters configured")]
    NoClusters,
    #[error("duplicate cluster name '{name}'")]
    DuplicateCluster { name: String },
    #[error(transparent)]
    Cluster(#[from] ClusterConfigError),
    #[error(transparent)]
    Agent(#[from] AgentConfigError),
    #[error("workspace root is not set")]
    MissingWorkspaceRoot,
    #[error("webhook URL '{url}' is invalid: {source}")]
    InvalidWebhook {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Chat webhook destination. Absent URL means notifications are disabled.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Health endpoint settings. Port zero disables the endpoint.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    pub port: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_HEALTH_PORT,
        }
    }
}

/// The full configuration bag handed to the orchestrator core.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    pub clusters: Vec<ClusterConfig>,
    pub agent: AgentConfig,
    pub workspace_root: PathBuf,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub upload_on_agent_failure: bool,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub tuning: Tuning,
}

impl OrchestratorConfig {
    /// Load and parse the YAML config file. Validation is a separate step so
    /// overrides can be layered in between.
    pub fn load(path: &PathBuf) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), clusters = config.clusters.len(), "loaded config file");
        Ok(config)
    }

    /// Overlay `FAULTLINE_*` environment variables. Called after `load`,
    /// before CLI flags are applied by the binary.
    pub fn apply_env(&mut self) {
        if let Some(root) = faultline_env::faultline_workspace_root() {
            self.workspace_root = root;
        }
        if let Some(script) = faultline_env::faultline_agent_script() {
            self.agent.script = script;
        }
        if let Some(model) = faultline_env::faultline_agent_model() {
            self.agent.model = model;
        }
        if let Some(cli) = faultline_env::faultline_agent_cli() {
            self.agent.cli = cli;
        }
        if let Some(secs) = faultline_env::faultline_agent_timeout_secs() {
            self.agent.timeout_secs = secs;
        }
        if let Some(url) = faultline_env::faultline_webhook_url() {
            self.notifier.webhook_url = Some(url);
        }
        if let Some(port) = faultline_env::faultline_health_port() {
            self.health.port = port;
        }
    }

    /// Startup validation. Any error here is fatal (exit non-zero).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clusters.is_empty() {
            return Err(ConfigError::NoClusters);
        }

        let mut seen = HashSet::new();
        for cluster in &self.clusters {
            if !seen.insert(cluster.name.as_str()) {
                return Err(ConfigError::DuplicateCluster {
                    name: cluster.name.clone(),
                });
            }
            cluster.validate()?;
        }

        self.agent.validate()?;

        if self.workspace_root.as_os_str().is_empty() {
            return Err(ConfigError::MissingWorkspaceRoot);
        }

        if let Some(url) = &self.notifier.webhook_url {
            url::Url::parse(url).map_err(|source| ConfigError::InvalidWebhook {
                url: url.clone(),
                source,
            })?;
        }

        Ok(())
    }
}
