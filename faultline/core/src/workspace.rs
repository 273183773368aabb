use std::{
    fs::{self, DirBuilder},
    io,
    os::unix::fs::{DirBuilderExt as _, OpenOptionsExt as _},
    path::{Component, Path, PathBuf},
};

use thiserror::Error;
use tracing::debug;

/// Directory inside a workspace where the agent writes its outputs.
pub const OUTPUT_DIR: &str = "output";

const DIR_MODE: u32 = 0o700;
const FILE_MODE: u32 = 0o600;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("workspace for incident {incident_id} already exists at {}", path.display())]
    PathClash { incident_id: String, path: PathBuf },
    #[error("workspace I/O failure at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("artifact name '{name}' is not a plain file name")]
    InvalidName { name: String },
}

/// Creates and owns per-incident scratch directories under a configured
/// root. Workspaces are retained after the incident completes; deletion is
/// a retention concern outside the orchestrator core.
#[derive(Clone, Debug)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the owner-only directory tree for one incident, including its
    /// output subdirectory.
    pub fn create(&self, incident_id: &str) -> Result<Workspace, WorkspaceError> {
        let path = self.root.join(incident_id);
        if path.exists() {
            return Err(WorkspaceError::PathClash {
                incident_id: incident_id.to_owned(),
                path,
            });
        }

        fs::create_dir_all(&self.root).map_err(|source| WorkspaceError::Io {
            path: self.root.clone(),
            source,
        })?;

        let mut builder = DirBuilder::new();
        builder.mode(DIR_MODE);
        builder.create(&path).map_err(|source| match source.kind() {
            io::ErrorKind::AlreadyExists => WorkspaceError::PathClash {
                incident_id: incident_id.to_owned(),
                path: path.clone(),
            },
            _ => WorkspaceError::Io {
                path: path.clone(),
                source,
            },
        })?;

        let output = path.join(OUTPUT_DIR);
        builder.create(&output).map_err(|source| WorkspaceError::Io {
            path: output,
            source,
        })?;

        debug!(incident_id, path = %path.display(), "created workspace");
        Ok(Workspace { path })
    }
}

/// One incident's scratch tree. Reads and writes are restricted to plain
/// file names inside the tree; traversal attempts are rejected.
#[derive(Clone, Debug)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    /// Reopen an existing workspace directory, for sinks reading artifacts
    /// after the pipeline has finished with it.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.path.join(OUTPUT_DIR)
    }

    /// Resolve an artifact name, allowing an optional `output/` prefix but
    /// nothing that would escape the workspace.
    pub fn file_path(&self, name: &str) -> Result<PathBuf, WorkspaceError> {
        let relative = Path::new(name);
        let mut components = relative.components();
        let valid = match (components.next(), components.next(), components.next()) {
            (Some(Component::Normal(_)), None, _) => true,
            (Some(Component::Normal(first)), Some(Component::Normal(_)), None) => {
                first == OUTPUT_DIR
            }
            _ => false,
        };
        if !valid {
            return Err(WorkspaceError::InvalidName {
                name: name.to_owned(),
            });
        }
        Ok(self.path.join(relative))
    }

    pub fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, WorkspaceError> {
        use std::io::Write as _;

        let path = self.file_path(name)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .mode(FILE_MODE)
            .open(&path)
            .map_err(|source| WorkspaceError::Io {
                path: path.clone(),
                source,
            })?;
        file.write_all(bytes).map_err(|source| WorkspaceError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    pub fn read(&self, name: &str) -> Result<Vec<u8>, WorkspaceError> {
        let path = self.file_path(name)?;
        fs::read(&path).map_err(|source| WorkspaceError::Io { path, source })
    }
}
