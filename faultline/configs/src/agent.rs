use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{DEFAULT_AGENT_TIMEOUT, DEFAULT_REPORT_EXT};

#[derive(Debug, Error)]
pub enum AgentConfigError {
    #[error("agent script '{}' does not exist", path.display())]
    MissingScript { path: PathBuf },
    #[error("agent CLI identifier is empty")]
    EmptyCli,
    #[error("agent model identifier is empty")]
    EmptyModel,
}

/// Sandbox configuration bag for the investigation worker subprocess.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AgentConfig {
    /// Launcher script invoked once per incident.
    pub script: PathBuf,
    /// Agent CLI the script should drive.
    pub cli: String,
    /// Model identifier handed to the agent CLI.
    pub model: String,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Optional static system prompt file; inline default used when absent.
    #[serde(default)]
    pub system_prompt: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_report_ext")]
    pub report_ext: String,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub debug: bool,
}

impl AgentConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), AgentConfigError> {
        if !self.script.exists() {
            return Err(AgentConfigError::MissingScript {
                path: self.script.clone(),
            });
        }
        if self.cli.trim().is_empty() {
            return Err(AgentConfigError::EmptyCli);
        }
        if self.model.trim().is_empty() {
            return Err(AgentConfigError::EmptyModel);
        }
        Ok(())
    }
}

fn default_timeout_secs() -> u64 {
    DEFAULT_AGENT_TIMEOUT.as_secs()
}

fn default_report_ext() -> String {
    DEFAULT_REPORT_EXT.to_owned()
}
