use std::{collections::BTreeMap, io, path::PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{executor, incident::INCIDENT_FILENAME, workspace::Workspace};

/// Name of the permission snapshot file inside a workspace.
pub const PERMISSIONS_FILENAME: &str = "permissions.json";
/// Optional worker-session archive produced by some agent CLIs.
pub const SESSION_ARCHIVE_FILENAME: &str = "session.tar.gz";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to read artifact {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to persist artifact {name}: {detail}")]
    Persist { name: String, detail: String },
    #[error("failed to sign URL for {name}: {detail}")]
    Sign { name: String, detail: String },
    #[error("artifact persistence cancelled")]
    Cancelled,
}

/// The per-incident artifact set read off a workspace. Only the incident
/// document and the report are core; everything else is optional.
#[derive(Clone, Debug, Default)]
pub struct ArtifactBundle {
    pub incident_json: Option<PathBuf>,
    pub report: Option<PathBuf>,
    pub report_html: Option<PathBuf>,
    pub permissions_json: Option<PathBuf>,
    pub agent_logs: BTreeMap<String, PathBuf>,
    pub session_archive: Option<PathBuf>,
    pub prompt_replay: Option<PathBuf>,
}

impl ArtifactBundle {
    /// Gather whatever artifacts exist in the workspace after execution.
    #[must_use]
    pub fn collect(workspace: &Workspace, report_ext: &str) -> Self {
        let existing = |path: PathBuf| path.exists().then_some(path);

        let output = workspace.output_dir();
        let mut agent_logs = BTreeMap::new();
        for (name, file) in [
            ("stdout", "agent.stdout.log"),
            ("stderr", "agent.stderr.log"),
            ("combined", "agent.combined.log"),
        ] {
            if let Some(path) = existing(workspace.path().join(file)) {
                agent_logs.insert(name.to_owned(), path);
            }
        }

        Self {
            incident_json: existing(workspace.path().join(INCIDENT_FILENAME)),
            report: existing(output.join(format!("investigation.{report_ext}"))),
            report_html: existing(output.join("investigation.html")),
            permissions_json: existing(workspace.path().join(PERMISSIONS_FILENAME)),
            agent_logs,
            session_archive: existing(workspace.path().join(SESSION_ARCHIVE_FILENAME)),
            prompt_replay: existing(workspace.path().join(executor::PROMPT_FILENAME)),
        }
    }

    /// Named (artifact, path) pairs in a stable order, logs excluded.
    #[must_use]
    pub fn named_artifacts(&self) -> Vec<(String, PathBuf)> {
        let mut artifacts = Vec::new();
        let mut push = |name: &str, path: &Option<PathBuf>| {
            if let Some(path) = path {
                artifacts.push((name.to_owned(), path.clone()));
            }
        };
        push("incident.json", &self.incident_json);
        push("investigation", &self.report);
        push("investigation.html", &self.report_html);
        push(PERMISSIONS_FILENAME, &self.permissions_json);
        push(SESSION_ARCHIVE_FILENAME, &self.session_archive);
        push("prompt.md", &self.prompt_replay);
        artifacts
    }
}

/// References to the persisted artifact set, usable by humans. Paths for
/// the filesystem sink, signed URLs with an expiry for remote sinks.
#[derive(Clone, Debug, Default)]
pub struct SavedArtifacts {
    pub report_ref: Option<String>,
    pub artifact_refs: BTreeMap<String, String>,
    pub log_refs: BTreeMap<String, String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Persistence capability for one incident's artifact set. Saves are
/// idempotent per incident: re-invocation overwrites.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn save(
        &self,
        cancel: &CancellationToken,
        incident_id: &str,
        bundle: &ArtifactBundle,
    ) -> Result<SavedArtifacts, SinkError>;
}
