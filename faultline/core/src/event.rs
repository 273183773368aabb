use std::{collections::HashMap, path::PathBuf, sync::Arc};

use crate::{fault::Fault, permissions::ClusterPermissions};

/// A fault wrapped with the cluster context it arrived from. This is the
/// unit placed on the global channel between the connection manager and the
/// incident pipeline; every field is concrete and typed.
#[derive(Clone, Debug)]
pub struct ClusterEvent {
    /// Configured cluster name; authoritative over any name embedded in the
    /// fault payload.
    pub cluster: String,
    pub kubeconfig: Option<PathBuf>,
    /// Permission snapshot taken at startup; `None` when triage is disabled
    /// for the cluster.
    pub permissions: Option<Arc<ClusterPermissions>>,
    pub labels: HashMap<String, String>,
    pub fault: Fault,
}
