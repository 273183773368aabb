use std::{collections::HashMap, fs::File, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Validation failures for a single cluster entry.
#[derive(Debug, Error)]
pub enum ClusterConfigError {
    #[error("cluster name '{name}' contains invalid characters")]
    InvalidName { name: String },
    #[error("cluster '{name}' endpoint '{endpoint}' is not a valid URL: {source}")]
    InvalidEndpoint {
        name: String,
        endpoint: String,
        #[source]
        source: url::ParseError,
    },
    #[error("cluster '{name}' endpoint '{endpoint}' must use http or https")]
    UnsupportedScheme { name: String, endpoint: String },
    #[error("cluster '{name}' label '{key}={value}' is not a valid Kubernetes label")]
    InvalidLabel {
        name: String,
        key: String,
        value: String,
    },
    #[error("cluster '{name}' has triage enabled but no kubeconfig path")]
    MissingKubeconfig { name: String },
    #[error("cluster '{name}' kubeconfig '{}' is not readable: {source}", path.display())]
    UnreadableKubeconfig {
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Whether triage (agent execution) is enabled for a cluster.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct TriageToggle {
    #[serde(default)]
    pub enabled: bool,
}

/// One observed cluster: its notification endpoint, credentials and labels.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ClusterConfig {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub triage: TriageToggle,
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,
    #[serde(default)]
    pub secrets_access: bool,
}

impl ClusterConfig {
    /// Validate name, endpoint, labels and credential reachability.
    pub fn validate(&self) -> Result<(), ClusterConfigError> {
        if self.name.is_empty() || !self.name.chars().all(valid_name_char) {
            return Err(ClusterConfigError::InvalidName {
                name: self.name.clone(),
            });
        }

        let url = Url::parse(&self.endpoint).map_err(|source| {
            ClusterConfigError::InvalidEndpoint {
                name: self.name.clone(),
                endpoint: self.endpoint.clone(),
                source,
            }
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ClusterConfigError::UnsupportedScheme {
                name: self.name.clone(),
                endpoint: self.endpoint.clone(),
            });
        }

        for (key, value) in &self.labels {
            if !valid_label_key(key) || !valid_label_value(value) {
                return Err(ClusterConfigError::InvalidLabel {
                    name: self.name.clone(),
                    key: key.clone(),
                    value: value.clone(),
                });
            }
        }

        if self.triage.enabled {
            let Some(path) = &self.kubeconfig else {
                return Err(ClusterConfigError::MissingKubeconfig {
                    name: self.name.clone(),
                });
            };
            File::open(path).map_err(|source| ClusterConfigError::UnreadableKubeconfig {
                name: self.name.clone(),
                path: path.clone(),
                source,
            })?;
        }

        Ok(())
    }
}

fn valid_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Label keys may carry a DNS-style prefix separated by a slash; each part
/// follows the Kubernetes label-name rules.
fn valid_label_key(key: &str) -> bool {
    let mut parts = key.splitn(2, '/');
    let first = parts.next().unwrap_or_default();
    match parts.next() {
        Some(name) => valid_label_segment(first, 253) && valid_label_segment(name, 63),
        None => valid_label_segment(first, 63),
    }
}

fn valid_label_value(value: &str) -> bool {
    value.is_empty() || valid_label_segment(value, 63)
}

fn valid_label_segment(segment: &str, max_len: usize) -> bool {
    if segment.is_empty() || segment.len() > max_len {
        return false;
    }
    let valid_inner =
        |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.';
    let first = segment.chars().next().unwrap_or(' ');
    let last = segment.chars().last().unwrap_or(' ');
    first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric() && segment.chars().all(valid_inner)
}
