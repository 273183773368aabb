use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    event::ClusterEvent,
    fault::{ResourceRef, Severity},
};

/// Filename of the incident document inside a workspace.
pub const INCIDENT_FILENAME: &str = "incident.json";

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Investigating,
    Resolved,
    Failed,
    AgentFailed,
}

impl IncidentStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Investigating)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Investigating => "investigating",
            Self::Resolved => "resolved",
            Self::Failed => "failed",
            Self::AgentFailed => "agent_failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum IncidentError {
    #[error("incident {id} is already terminal ({status:?})")]
    AlreadyTerminal { id: String, status: IncidentStatus },
    #[error("invalid transition to investigating for incident {id}")]
    NotATransition { id: String },
    #[error("failed to write incident document {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read incident document {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("incident document {} is malformed: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize incident {id}: {source}")]
    Serialize {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The orchestrator's record of one triage attempt. Owned exclusively by
/// the pipeline task processing it; persisted as JSON before and after
/// execution.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Incident {
    pub id: String,
    pub cluster: String,
    pub resource: ResourceRef,
    pub fault_id: String,
    pub fault_type: String,
    pub severity: Severity,
    #[serde(default)]
    pub context: String,
    pub status: IncidentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub log_paths: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub log_urls: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_url: Option<String>,
}

impl Incident {
    /// Build a fresh `investigating` incident from an accepted event. The
    /// configured cluster name on the event overrides whatever the fault
    /// payload carried.
    #[must_use]
    pub fn from_event(id: String, event: &ClusterEvent) -> Self {
        Self {
            id,
            cluster: event.cluster.clone(),
            resource: event.fault.resource.clone(),
            fault_id: event.fault.id.clone(),
            fault_type: event.fault.fault_type.clone(),
            severity: event.fault.severity,
            context: event.fault.context.clone(),
            status: IncidentStatus::Investigating,
            started_at: None,
            completed_at: None,
            exit_code: None,
            failure_reason: None,
            log_paths: BTreeMap::new(),
            log_urls: BTreeMap::new(),
            report_url: None,
        }
    }

    /// Move to a terminal status. Transitions out of a terminal status are
    /// rejected; the record is immutable once completed.
    pub fn complete(&mut self, next: IncidentStatus) -> Result<(), IncidentError> {
        if self.status.is_terminal() {
            return Err(IncidentError::AlreadyTerminal {
                id: self.id.clone(),
                status: self.status,
            });
        }
        if !next.is_terminal() {
            return Err(IncidentError::NotATransition {
                id: self.id.clone(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Wall-clock duration of the execution, when both stamps are present.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<(), IncidentError> {
        let body = serde_json::to_vec_pretty(self).map_err(|source| IncidentError::Serialize {
            id: self.id.clone(),
            source,
        })?;
        fs::write(path, body).map_err(|source| IncidentError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn read_json(path: &Path) -> Result<Self, IncidentError> {
        let raw = fs::read(path).map_err(|source| IncidentError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&raw).map_err(|source| IncidentError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }
}
