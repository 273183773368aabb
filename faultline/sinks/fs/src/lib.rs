use std::{
    fs::{self, DirBuilder},
    io,
    os::unix::fs::DirBuilderExt as _,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use faultline_core::{ArtifactBundle, ArtifactSink, SavedArtifacts, SinkError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const DIR_MODE: u32 = 0o700;

/// Persists incident artifacts under a local root. References are absolute
/// paths and never expire. Saves are idempotent: re-saving an incident
/// overwrites its previous copies.
#[derive(Clone, Debug)]
pub struct FilesystemSink {
    root: PathBuf,
}

impl FilesystemSink {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn copy_into(
        &self,
        target_dir: &Path,
        name: &str,
        source: &Path,
    ) -> Result<PathBuf, SinkError> {
        let file_name = source
            .file_name()
            .map_or_else(|| name.to_owned(), |n| n.to_string_lossy().into_owned());
        let target = target_dir.join(file_name);
        fs::copy(source, &target).map_err(|source_err| SinkError::Persist {
            name: name.to_owned(),
            detail: source_err.to_string(),
        })?;
        Ok(target)
    }
}

#[async_trait]
impl ArtifactSink for FilesystemSink {
    async fn save(
        &self,
        cancel: &CancellationToken,
        incident_id: &str,
        bundle: &ArtifactBundle,
    ) -> Result<SavedArtifacts, SinkError> {
        if cancel.is_cancelled() {
            return Err(SinkError::Cancelled);
        }

        let target_dir = self.root.join(incident_id);
        fs::create_dir_all(&self.root).map_err(|source| SinkError::Persist {
            name: incident_id.to_owned(),
            detail: source.to_string(),
        })?;
        match DirBuilder::new().mode(DIR_MODE).create(&target_dir) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {}
            Err(source) => {
                return Err(SinkError::Persist {
                    name: incident_id.to_owned(),
                    detail: source.to_string(),
                });
            }
        }

        let mut saved = SavedArtifacts::default();

        for (name, path) in bundle.named_artifacts() {
            let target = self.copy_into(&target_dir, &name, &path)?;
            let reference = target.to_string_lossy().into_owned();
            if name == "investigation" {
                saved.report_ref = Some(reference.clone());
            }
            saved.artifact_refs.insert(name, reference);
            debug!(incident_id, target = %target.display(), "artifact copied");
        }

        for (name, path) in &bundle.agent_logs {
            let target = self.copy_into(&target_dir, name, path)?;
            saved
                .log_refs
                .insert(name.clone(), target.to_string_lossy().into_owned());
        }

        info!(
            incident_id,
            artifacts = saved.artifact_refs.len(),
            logs = saved.log_refs.len(),
            dir = %target_dir.display(),
            "incident artifacts persisted"
        );
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use faultline_core::{Workspace, WorkspaceManager};

    use super::*;

    fn staged_workspace(root: &Path) -> Workspace {
        let manager = WorkspaceManager::new(root.join("work"));
        let workspace = manager.create("i-1").expect("workspace");
        workspace.write("incident.json", b"{}").expect("incident");
        workspace
            .write("output/investigation.md", vec![b'x'; 200].as_slice())
            .expect("report");
        workspace
    }

    #[tokio::test]
    async fn saves_core_artifacts_with_path_refs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let workspace = staged_workspace(dir.path());
        let bundle = ArtifactBundle::collect(&workspace, "md");

        let sink = FilesystemSink::new(dir.path().join("artifacts"));
        let saved = sink
            .save(&CancellationToken::new(), "i-1", &bundle)
            .await
            .expect("save");

        let report_ref = saved.report_ref.expect("report ref");
        assert!(report_ref.starts_with('/'));
        assert!(Path::new(&report_ref).exists());
        assert!(saved.expires_at.is_none());
        assert!(saved.artifact_refs.contains_key("incident.json"));
    }

    #[tokio::test]
    async fn resave_overwrites_in_place() {
        let dir = tempfile::tempdir().expect("tempdir");
        let workspace = staged_workspace(dir.path());
        let bundle = ArtifactBundle::collect(&workspace, "md");

        let sink = FilesystemSink::new(dir.path().join("artifacts"));
        sink.save(&CancellationToken::new(), "i-1", &bundle)
            .await
            .expect("first save");
        let saved = sink
            .save(&CancellationToken::new(), "i-1", &bundle)
            .await
            .expect("second save");
        assert!(saved.report_ref.is_some());
    }

    #[tokio::test]
    async fn cancelled_save_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let workspace = staged_workspace(dir.path());
        let bundle = ArtifactBundle::collect(&workspace, "md");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let sink = FilesystemSink::new(dir.path().join("artifacts"));
        let err = sink
            .save(&cancel, "i-1", &bundle)
            .await
            .err()
            .expect("must fail");
        assert!(matches!(err, SinkError::Cancelled));
    }
}
