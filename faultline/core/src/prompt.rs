use std::fmt::Write as _;

use crate::{incident::Incident, permissions::ClusterPermissions};

/// Built-in system prompt used when the config names no prompt file.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are an on-call Kubernetes incident investigator. Investigate the fault \
described below using only read access to the cluster. Work from evidence: \
pod status, logs, events and related workloads. Write your findings to \
output/investigation.md with sections for Summary, Root Cause, Evidence, \
Confidence and Suggested Remediation. Do not modify cluster state.";

/// Compose the prompt handed to the investigation worker: the system prompt
/// followed by a preloaded context block describing the incident and what
/// the worker is allowed to query.
#[must_use]
pub fn compose(
    system_prompt: &str,
    incident: &Incident,
    permissions: Option<&ClusterPermissions>,
) -> String {
    let mut prompt = String::with_capacity(system_prompt.len() + 512);
    prompt.push_str(system_prompt);
    prompt.push_str("\n\n## Incident\n\n");

    let _ = writeln!(prompt, "- Incident ID: {}", incident.id);
    let _ = writeln!(prompt, "- Cluster: {}", incident.cluster);
    let _ = writeln!(prompt, "- Resource: {}", incident.resource.qualified());
    if let Some(uid) = &incident.resource.uid {
        let _ = writeln!(prompt, "- Resource UID: {uid}");
    }
    let _ = writeln!(prompt, "- Fault type: {}", incident.fault_type);
    let _ = writeln!(prompt, "- Severity: {:?}", incident.severity);

    if !incident.context.is_empty() {
        prompt.push_str("\n## Reported context\n\n");
        prompt.push_str(&incident.context);
        prompt.push('\n');
    }

    if let Some(permissions) = permissions {
        prompt.push_str("\n## Granted read access\n\n");
        for (capability, allowed) in [
            ("pods", permissions.get_pods),
            ("pod logs", permissions.get_pod_logs),
            ("events", permissions.get_events),
            ("deployments", permissions.get_deployments),
            ("services", permissions.get_services),
            ("nodes", permissions.get_nodes),
            ("secrets", permissions.get_secrets.unwrap_or(false)),
            ("configmaps", permissions.get_configmaps.unwrap_or(false)),
        ] {
            let marker = if allowed { "yes" } else { "no" };
            let _ = writeln!(prompt, "- {capability}: {marker}");
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fault::{ResourceRef, Severity},
        incident::IncidentStatus,
    };

    fn incident() -> Incident {
        Incident {
            id: "i-1".into(),
            cluster: "kind-a".into(),
            resource: ResourceRef {
                kind: "Pod".into(),
                name: "p".into(),
                namespace: "ns".into(),
                uid: None,
            },
            fault_id: "abc".into(),
            fault_type: "CrashLoop".into(),
            severity: Severity::Critical,
            context: "restarted 14 times".into(),
            status: IncidentStatus::Investigating,
            started_at: None,
            completed_at: None,
            exit_code: None,
            failure_reason: None,
            log_paths: std::collections::BTreeMap::new(),
            log_urls: std::collections::BTreeMap::new(),
            report_url: None,
        }
    }

    #[test]
    fn prompt_carries_incident_and_context() {
        let prompt = compose(DEFAULT_SYSTEM_PROMPT, &incident(), None);
        assert!(prompt.starts_with(DEFAULT_SYSTEM_PROMPT));
        assert!(prompt.contains("- Cluster: kind-a"));
        assert!(prompt.contains("ns/Pod/p"));
        assert!(prompt.contains("restarted 14 times"));
        assert!(!prompt.contains("Granted read access"));
    }
}
