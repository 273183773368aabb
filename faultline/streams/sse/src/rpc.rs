use serde::{Deserialize, Serialize};
use serde_json::Value;

use faultline_core::{Fault, ResourceRef, Severity};

/// Stream name faults are delivered on; notifications for other streams
/// are ignored.
pub const FAULT_STREAM: &str = "resource-faults";
/// Notification method carrying stream messages.
pub const MESSAGE_METHOD: &str = "notifications/message";
/// Subscription mode argument.
pub const SUBSCRIBE_MODE: &str = "resource-faults";

#[derive(Debug, Serialize)]
pub struct SubscribeRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    pub params: SubscribeParams,
}

#[derive(Debug, Serialize)]
pub struct SubscribeParams {
    pub mode: &'static str,
}

impl SubscribeRequest {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: "subscribe",
            params: SubscribeParams {
                mode: SUBSCRIBE_MODE,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SubscribeResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// A JSON-RPC notification frame as carried in SSE data.
#[derive(Debug, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub params: NotificationParams,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationParams {
    #[serde(default)]
    pub stream: String,
    #[serde(default)]
    pub payload: Value,
}

/// Fault record as sent on the wire.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFault {
    #[serde(default)]
    pub fault_id: String,
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub resource: WireResource,
    #[serde(default)]
    pub fault_type: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireResource {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub uid: Option<String>,
}

impl WireFault {
    /// Map onto the normalized fault record. The upstream identifier is
    /// carried verbatim; an empty identifier makes the record unusable.
    #[must_use]
    pub fn into_fault(self) -> Option<Fault> {
        if self.fault_id.is_empty() {
            return None;
        }
        Some(Fault {
            id: self.fault_id,
            cluster: self.cluster,
            resource: ResourceRef {
                kind: self.resource.kind,
                name: self.resource.name,
                namespace: self.resource.namespace,
                uid: self.resource.uid,
            },
            fault_type: self.fault_type,
            severity: self.severity,
            context: self.context,
            observed_at: self.timestamp,
        })
    }
}
