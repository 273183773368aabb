use serde::{Deserialize, Serialize};

/// Reference to the Kubernetes resource a fault was observed on.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct ResourceRef {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl ResourceRef {
    /// `namespace/kind/name` display form used in logs and chat messages.
    #[must_use]
    pub fn qualified(&self) -> String {
        format!("{}/{}/{}", self.namespace, self.kind, self.name)
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
    #[default]
    #[serde(other)]
    Unknown,
}

/// A normalized fault notification as received from an observation server.
///
/// The `id` is the upstream fault identifier and is carried verbatim; the
/// orchestrator never synthesizes fault identifiers of its own. Instances
/// are immutable once constructed.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct Fault {
    pub id: String,
    pub cluster: String,
    pub resource: ResourceRef,
    pub fault_type: String,
    pub severity: Severity,
    #[serde(default)]
    pub context: String,
    /// Upstream emission timestamp, preserved as sent.
    #[serde(default)]
    pub observed_at: String,
}
