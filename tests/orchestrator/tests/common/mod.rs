#![allow(dead_code)]

use std::{
    collections::HashMap,
    fs,
    os::unix::fs::PermissionsExt as _,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use faultline_config::AgentConfig;
use faultline_core::{
    AgentExecutor, ChatMessage, ClusterEvent, ClusterPermissions, FailureBreaker, Fault,
    IncidentPipeline, Notify, NotifyError, PipelineTuning, ResourceRef, Severity,
    WorkspaceManager,
};
use tokio_util::sync::CancellationToken;

/// Agent stub that produces a healthy report well above the size floor.
pub const HEALTHY_AGENT: &str = r#"#!/bin/sh
cat > output/investigation.md <<'EOF'
# Investigation

## Summary

The workload is crash looping because its image tag was deleted from the
registry after a retention sweep. Kubelet cannot pull the image, so the
container restarts on an exponential backoff and never becomes ready.

## Root Cause

The pod references an image tag that no longer exists.

## Confidence

High

## Suggested Remediation

Repin the deployment to a tag that still exists and add registry retention
exclusions for production tags.
EOF
"#;

/// Agent stub that sleeps far past any configured deadline.
pub const SLEEPY_AGENT: &str = "#!/bin/sh\nsleep 30\n";

/// Agent stub that exits cleanly but leaves an empty report behind.
pub const EMPTY_REPORT_AGENT: &str = "#!/bin/sh\n: > output/investigation.md\n";

/// Agent stub that fails on its own terms.
pub const FAILING_AGENT: &str = "#!/bin/sh\nexit 3\n";

/// Capability-query stub that grants everything.
pub const KUBECTL_ALLOW_ALL: &str = "#!/bin/sh\necho yes\nexit 0\n";

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).expect("write script");
    let mut permissions = fs::metadata(&path).expect("metadata").permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(&path, permissions).expect("chmod script");
    path
}

pub fn agent_config(script: PathBuf, timeout_secs: u64) -> AgentConfig {
    AgentConfig {
        script,
        cli: "claude".into(),
        model: "test-model".into(),
        allowed_tools: vec!["kubectl".into()],
        system_prompt: None,
        timeout_secs,
        report_ext: "md".into(),
        verbose: false,
        debug: false,
    }
}

pub fn full_permissions() -> ClusterPermissions {
    ClusterPermissions {
        get_pods: true,
        get_pod_logs: true,
        get_events: true,
        get_deployments: true,
        get_services: true,
        get_nodes: true,
        get_secrets: None,
        get_configmaps: None,
        raw_capability_listing: String::new(),
        warnings: Vec::new(),
    }
}

pub fn fault(id: &str, cluster: &str) -> Fault {
    Fault {
        id: id.into(),
        cluster: cluster.into(),
        resource: ResourceRef {
            kind: "Pod".into(),
            name: "p".into(),
            namespace: "ns".into(),
            uid: None,
        },
        fault_type: "CrashLoop".into(),
        severity: Severity::Critical,
        context: "x".into(),
        observed_at: "t".into(),
    }
}

pub fn event(
    cluster: &str,
    fault_id: &str,
    permissions: Option<Arc<ClusterPermissions>>,
) -> ClusterEvent {
    ClusterEvent {
        cluster: cluster.into(),
        kubeconfig: None,
        permissions,
        labels: HashMap::new(),
        fault: fault(fault_id, cluster),
    }
}

/// Records every chat message instead of POSTing it.
#[derive(Default)]
pub struct CapturingNotifier {
    messages: Mutex<Vec<ChatMessage>>,
}

impl CapturingNotifier {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn incident_statuses(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter_map(|message| match message {
                ChatMessage::Incident(incident) => Some(incident.status),
                _ => None,
            })
            .collect()
    }

    pub fn degraded_count(&self) -> usize {
        self.messages()
            .iter()
            .filter(|message| matches!(message, ChatMessage::Degraded(_)))
            .count()
    }

    pub fn recovered_count(&self) -> usize {
        self.messages()
            .iter()
            .filter(|message| matches!(message, ChatMessage::Recovered(_)))
            .count()
    }
}

#[async_trait]
impl Notify for CapturingNotifier {
    async fn send(
        &self,
        _cancel: &CancellationToken,
        message: &ChatMessage,
    ) -> Result<(), NotifyError> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message.clone());
        Ok(())
    }
}

pub struct PipelineHarness {
    pub pipeline: IncidentPipeline,
    pub notifier: Arc<CapturingNotifier>,
    pub workspace_root: PathBuf,
}

/// Assemble a pipeline around a stub agent with the given breaker
/// threshold. Timeout and buffer are kept tight so timeout scenarios run in
/// test time.
pub fn pipeline_with(
    dir: &Path,
    agent_body: &str,
    timeout_secs: u64,
    breaker_threshold: usize,
) -> PipelineHarness {
    let script = write_script(dir, "agent.sh", agent_body);
    let workspace_root = dir.join("incidents");
    let notifier = CapturingNotifier::new();

    let pipeline = IncidentPipeline::new(
        WorkspaceManager::new(&workspace_root),
        AgentExecutor::new(agent_config(script, timeout_secs), std::time::Duration::ZERO),
        FailureBreaker::new(breaker_threshold, 5),
        notifier.clone(),
        PipelineTuning {
            min_report_bytes: 100,
            report_ext: "md".into(),
            upload_on_agent_failure: false,
        },
    );

    PipelineHarness {
        pipeline,
        notifier,
        workspace_root,
    }
}

/// Read every persisted incident document under the workspace root.
pub fn persisted_incidents(root: &Path) -> Vec<serde_json::Value> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };
    let mut incidents = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path().join("incident.json");
        if let Ok(raw) = fs::read(&path) {
            incidents.push(serde_json::from_slice(&raw).expect("incident document parses"));
        }
    }
    incidents
}
