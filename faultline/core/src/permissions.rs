use std::{io, path::Path, process::Stdio};

use faultline_config::ClusterConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capability matrix probed for every triage-enabled cluster.
const PROBE_MATRIX: &[(&str, &str)] = &[
    ("get", "pods"),
    ("get", "pods/log"),
    ("get", "events"),
    ("get", "deployments"),
    ("get", "services"),
    ("get", "nodes"),
];

/// What the triage agent will be allowed to do on a cluster. Probed once at
/// startup; read-only afterwards.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ClusterPermissions {
    pub get_pods: bool,
    pub get_pod_logs: bool,
    pub get_events: bool,
    pub get_deployments: bool,
    pub get_services: bool,
    pub get_nodes: bool,
    /// `None` when secrets access is disabled in the cluster config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get_secrets: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get_configmaps: Option<bool>,
    /// Verbatim output of the broad capability listing query.
    #[serde(default)]
    pub raw_capability_listing: String,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ClusterPermissions {
    /// The investigation baseline: pods, pod logs and events.
    #[must_use]
    pub const fn minimum_met(&self) -> bool {
        self.get_pods && self.get_pod_logs && self.get_events
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run {command} for cluster '{cluster}': {source}")]
    Spawn {
        cluster: String,
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("capability listing for cluster '{cluster}' failed with status {status:?}: {stderr}")]
    ListingFailed {
        cluster: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("permission probe for cluster '{cluster}' was cancelled")]
    Cancelled { cluster: String },
}

/// Probes cluster capabilities by shelling out to the native capability
/// query tool with the cluster's credentials file.
#[derive(Clone, Debug)]
pub struct PermissionProber {
    kubectl: String,
}

impl Default for PermissionProber {
    fn default() -> Self {
        Self {
            kubectl: "kubectl".to_owned(),
        }
    }
}

impl PermissionProber {
    /// Use a non-default query binary. Tests point this at a stub.
    #[must_use]
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            kubectl: binary.into(),
        }
    }

    /// Run the full probe matrix against one cluster. A failure of the broad
    /// listing query fails the probe; individual per-resource probe failures
    /// are recorded as missing capabilities, not errors.
    pub async fn probe(
        &self,
        cancel: &CancellationToken,
        cluster: &ClusterConfig,
    ) -> Result<ClusterPermissions, ProbeError> {
        let kubeconfig = cluster.kubeconfig.as_deref();
        info!(cluster = %cluster.name, secrets_access = cluster.secrets_access, "probing cluster permissions");

        let raw_capability_listing = self.capability_listing(cancel, cluster, kubeconfig).await?;

        let mut matrix = [false; PROBE_MATRIX.len()];
        for (slot, (verb, resource)) in matrix.iter_mut().zip(PROBE_MATRIX) {
            *slot = self
                .can_i(cancel, &cluster.name, kubeconfig, verb, resource)
                .await?;
        }
        let [get_pods, get_pod_logs, get_events, get_deployments, get_services, get_nodes] = matrix;

        let (get_secrets, get_configmaps) = if cluster.secrets_access {
            (
                Some(
                    self.can_i(cancel, &cluster.name, kubeconfig, "get", "secrets")
                        .await?,
                ),
                Some(
                    self.can_i(cancel, &cluster.name, kubeconfig, "get", "configmaps")
                        .await?,
                ),
            )
        } else {
            (None, None)
        };

        let mut permissions = ClusterPermissions {
            get_pods,
            get_pod_logs,
            get_events,
            get_deployments,
            get_services,
            get_nodes,
            get_secrets,
            get_configmaps,
            raw_capability_listing,
            warnings: Vec::new(),
        };
        permissions.warnings = collect_warnings(&cluster.name, &permissions, cluster.secrets_access);

        for warning in &permissions.warnings {
            warn!(cluster = %cluster.name, "{warning}");
        }

        Ok(permissions)
    }

    /// The broad listing query; its output is kept verbatim on the record.
    async fn capability_listing(
        &self,
        cancel: &CancellationToken,
        cluster: &ClusterConfig,
        kubeconfig: Option<&Path>,
    ) -> Result<String, ProbeError> {
        let mut cmd = self.base_command(kubeconfig);
        cmd.arg("auth").arg("can-i").arg("--list");

        let command = format!("{} auth can-i --list", self.kubectl);
        let output = tokio::select! {
            () = cancel.cancelled() => {
                return Err(ProbeError::Cancelled {
                    cluster: cluster.name.clone(),
                });
            }
            output = cmd.output() => output.map_err(|source| ProbeError::Spawn {
                cluster: cluster.name.clone(),
                command: command.clone(),
                source,
            })?,
        };

        if !output.status.success() {
            return Err(ProbeError::ListingFailed {
                cluster: cluster.name.clone(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// One yes/no probe. Exit 0 means allowed, exit 1 means denied; any
    /// execution failure is treated as denied.
    async fn can_i(
        &self,
        cancel: &CancellationToken,
        cluster: &str,
        kubeconfig: Option<&Path>,
        verb: &str,
        resource: &str,
    ) -> Result<bool, ProbeError> {
        let mut cmd = self.base_command(kubeconfig);
        cmd.arg("auth").arg("can-i").arg(verb).arg(resource);

        let outcome = tokio::select! {
            () = cancel.cancelled() => {
                return Err(ProbeError::Cancelled {
                    cluster: cluster.to_owned(),
                });
            }
            output = cmd.output() => output,
        };

        match outcome {
            Ok(output) => {
                let allowed = output.status.success();
                debug!(cluster, verb, resource, allowed, "capability probe");
                Ok(allowed)
            }
            Err(error) => {
                warn!(cluster, verb, resource, %error, "capability probe failed to run");
                Ok(false)
            }
        }
    }

    fn base_command(&self, kubeconfig: Option<&Path>) -> Command {
        let mut cmd = Command::new(&self.kubectl);
        if let Some(path) = kubeconfig {
            cmd.arg("--kubeconfig").arg(path);
        }
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        cmd
    }
}

fn collect_warnings(
    cluster: &str,
    permissions: &ClusterPermissions,
    secrets_access: bool,
) -> Vec<String> {
    let mut warnings = Vec::new();
    let mut missing = |capability: &str, allowed: bool| {
        if !allowed {
            warnings.push(format!(
                "cluster '{cluster}' is missing capability: {capability}"
            ));
        }
    };

    missing("get pods", permissions.get_pods);
    missing("get pods/log", permissions.get_pod_logs);
    missing("get events", permissions.get_events);
    missing("get deployments", permissions.get_deployments);
    missing("get services", permissions.get_services);
    missing("get nodes", permissions.get_nodes);
    if let Some(allowed) = permissions.get_secrets {
        missing("get secrets", allowed);
    }
    if let Some(allowed) = permissions.get_configmaps {
        missing("get configmaps", allowed);
    }

    if !secrets_access {
        warnings.push(format!(
            "cluster '{cluster}' has secrets access disabled; secrets and configmaps were not probed"
        ));
    }

    warnings
}
