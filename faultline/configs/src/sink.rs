use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_SIGNED_URL_TTL;

/// Where incident artifacts are persisted after execution.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SinkConfig {
    /// No persistence beyond the workspace itself.
    Disabled,
    /// Copy artifacts under a local root; references are absolute paths.
    Filesystem { root: PathBuf },
    /// Upload to an S3-compatible bucket; references are signed URLs.
    ObjectStore {
        bucket: String,
        #[serde(default)]
        prefix: String,
        #[serde(default = "default_url_ttl_secs")]
        url_ttl_secs: u64,
    },
}

impl SinkConfig {
    #[must_use]
    pub const fn url_ttl(&self) -> Duration {
        match self {
            Self::ObjectStore { url_ttl_secs, .. } => Duration::from_secs(*url_ttl_secs),
            Self::Disabled | Self::Filesystem { .. } => Duration::ZERO,
        }
    }

    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self::Disabled
    }
}

fn default_url_ttl_secs() -> u64 {
    DEFAULT_SIGNED_URL_TTL.as_secs()
}
