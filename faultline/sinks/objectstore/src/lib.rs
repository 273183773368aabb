use std::{fs, path::Path as FsPath, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use faultline_core::{ArtifactBundle, ArtifactSink, SavedArtifacts, SinkError};
use http::Method;
use object_store::{ObjectStore, PutPayload, aws::AmazonS3, path::Path, signer::Signer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Persists incident artifacts in an S3-compatible bucket and hands back
/// time-limited signed GET URLs. Uploads are idempotent per incident: the
/// same keys are overwritten on re-save.
pub struct ObjectStoreSink<S> {
    store: Arc<S>,
    prefix: String,
    url_ttl: Duration,
}

impl ObjectStoreSink<AmazonS3> {
    /// Build a sink from the ambient provider credentials (environment) and
    /// the configured bucket.
    pub fn from_env(
        bucket: &str,
        prefix: impl Into<String>,
        url_ttl: Duration,
    ) -> Result<Self, object_store::Error> {
        let store = object_store::aws::AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .build()?;
        Ok(Self::new(store, prefix, url_ttl))
    }
}

impl<S> ObjectStoreSink<S> {
    #[must_use]
    pub fn new(store: S, prefix: impl Into<String>, url_ttl: Duration) -> Self {
        let prefix = prefix.into();
        Self {
            store: Arc::new(store),
            prefix: prefix.trim_matches('/').to_owned(),
            url_ttl,
        }
    }

    fn object_key(&self, incident_id: &str, name: &str) -> Path {
        if self.prefix.is_empty() {
            Path::from(format!("{incident_id}/{name}"))
        } else {
            Path::from(format!("{}/{incident_id}/{name}", self.prefix))
        }
    }
}

impl<S> ObjectStoreSink<S>
where
    S: ObjectStore + Signer,
{
    async fn upload_and_sign(
        &self,
        cancel: &CancellationToken,
        key: Path,
        name: &str,
        source: &FsPath,
    ) -> Result<String, SinkError> {
        if cancel.is_cancelled() {
            return Err(SinkError::Cancelled);
        }

        let bytes = fs::read(source).map_err(|io_err| SinkError::Read {
            path: source.to_path_buf(),
            source: io_err,
        })?;

        self.store
            .put(&key, PutPayload::from(bytes))
            .await
            .map_err(|error| SinkError::Persist {
                name: name.to_owned(),
                detail: error.to_string(),
            })?;

        let url = self
            .store
            .signed_url(Method::GET, &key, self.url_ttl)
            .await
            .map_err(|error| SinkError::Sign {
                name: name.to_owned(),
                detail: error.to_string(),
            })?;

        debug!(name, key = %key, "artifact uploaded and signed");
        Ok(url.to_string())
    }
}

#[async_trait]
impl<S> ArtifactSink for ObjectStoreSink<S>
where
    S: ObjectStore + Signer,
{
    async fn save(
        &self,
        cancel: &CancellationToken,
        incident_id: &str,
        bundle: &ArtifactBundle,
    ) -> Result<SavedArtifacts, SinkError> {
        let mut saved = SavedArtifacts {
            expires_at: Some(Utc::now() + self.url_ttl),
            ..SavedArtifacts::default()
        };

        for (name, path) in bundle.named_artifacts() {
            let file_name = path
                .file_name()
                .map_or_else(|| name.clone(), |n| n.to_string_lossy().into_owned());
            let key = self.object_key(incident_id, &file_name);
            let url = self.upload_and_sign(cancel, key, &name, &path).await?;
            if name == "investigation" {
                saved.report_ref = Some(url.clone());
            }
            saved.artifact_refs.insert(name, url);
        }

        for (name, path) in &bundle.agent_logs {
            let file_name = path
                .file_name()
                .map_or_else(|| name.clone(), |n| n.to_string_lossy().into_owned());
            let key = self.object_key(incident_id, &file_name);
            let url = self.upload_and_sign(cancel, key, name, path).await?;
            saved.log_refs.insert(name.clone(), url);
        }

        info!(
            incident_id,
            artifacts = saved.artifact_refs.len(),
            logs = saved.log_refs.len(),
            expires_at = ?saved.expires_at,
            "incident artifacts uploaded"
        );
        Ok(saved)
    }
}
