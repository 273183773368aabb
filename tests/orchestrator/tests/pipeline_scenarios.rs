use std::sync::Arc;

use faultline_core::ChatMessage;
use tokio_util::sync::CancellationToken;

mod common;

use common::{
    EMPTY_REPORT_AGENT, FAILING_AGENT, HEALTHY_AGENT, SLEEPY_AGENT, event, full_permissions,
    persisted_incidents, pipeline_with,
};

#[tokio::test]
async fn healthy_incident_resolves_and_notifies_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut harness = pipeline_with(dir.path(), HEALTHY_AGENT, 60, 3);
    let cancel = CancellationToken::new();

    harness
        .pipeline
        .process(&cancel, event("kind-a", "abc", Some(Arc::new(full_permissions()))))
        .await;

    let incidents = persisted_incidents(&harness.workspace_root);
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0]["status"], "resolved");
    assert_eq!(incidents[0]["fault_id"], "abc");
    assert_eq!(incidents[0]["exit_code"], 0);

    let messages = harness.notifier.messages();
    assert_eq!(messages.len(), 1);
    let ChatMessage::Incident(message) = &messages[0] else {
        panic!("expected a per-incident message");
    };
    assert_eq!(message.status, "resolved");
    assert_eq!(message.cluster, "kind-a");
    assert_eq!(message.resource, "ns/Pod/p");
    assert_eq!(
        message.root_cause,
        "The pod references an image tag that no longer exists."
    );
    assert_eq!(message.confidence, "High");

    assert_eq!(harness.pipeline.breaker_stats().consecutive_failures, 0);
}

#[tokio::test]
async fn timed_out_agent_fails_the_incident() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut harness = pipeline_with(dir.path(), SLEEPY_AGENT, 0, 10);
    let cancel = CancellationToken::new();

    harness
        .pipeline
        .process(&cancel, event("kind-a", "abc", Some(Arc::new(full_permissions()))))
        .await;

    let incidents = persisted_incidents(&harness.workspace_root);
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0]["status"], "failed");
    let reason = incidents[0]["failure_reason"]
        .as_str()
        .expect("failure reason");
    assert!(reason.starts_with("agent execution error:"), "{reason}");

    assert_eq!(harness.notifier.incident_statuses(), vec!["failed"]);
    assert_eq!(harness.pipeline.breaker_stats().consecutive_failures, 1);
}

#[tokio::test]
async fn nonzero_exit_fails_the_incident() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut harness = pipeline_with(dir.path(), FAILING_AGENT, 60, 10);
    let cancel = CancellationToken::new();

    harness
        .pipeline
        .process(&cancel, event("kind-a", "abc", Some(Arc::new(full_permissions()))))
        .await;

    let incidents = persisted_incidents(&harness.workspace_root);
    assert_eq!(incidents[0]["status"], "failed");
    assert_eq!(incidents[0]["exit_code"], 3);
    assert_eq!(
        incidents[0]["failure_reason"],
        "agent exited with status 3"
    );
    assert_eq!(harness.notifier.incident_statuses(), vec!["failed"]);
}

#[tokio::test]
async fn failure_streak_degrades_once_and_recovers_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut harness = pipeline_with(dir.path(), EMPTY_REPORT_AGENT, 60, 3);
    let cancel = CancellationToken::new();
    let permissions = Arc::new(full_permissions());

    for fault_id in ["f1", "f2", "f3"] {
        harness
            .pipeline
            .process(&cancel, event("kind-a", fault_id, Some(permissions.clone())))
            .await;
    }

    let incidents = persisted_incidents(&harness.workspace_root);
    assert_eq!(incidents.len(), 3);
    for incident in &incidents {
        assert_eq!(incident["status"], "agent_failed");
        assert_eq!(incident["failure_reason"], "report_undersized");
    }

    // Suppression: no per-incident messages, exactly one degraded alert
    // after the third failure.
    assert!(harness.notifier.incident_statuses().is_empty());
    assert_eq!(harness.notifier.degraded_count(), 1);
    assert_eq!(harness.notifier.recovered_count(), 0);

    // Swap in a healthy agent in place; the next incident recovers the
    // breaker exactly once.
    common::write_script(dir.path(), "agent.sh", HEALTHY_AGENT);
    for fault_id in ["f4", "f5"] {
        harness
            .pipeline
            .process(&cancel, event("kind-a", fault_id, Some(permissions.clone())))
            .await;
    }

    assert_eq!(harness.notifier.recovered_count(), 1);
    assert_eq!(harness.notifier.degraded_count(), 1);
    assert_eq!(
        harness.notifier.incident_statuses(),
        vec!["resolved", "resolved"]
    );
}

#[tokio::test]
async fn triage_disabled_event_is_dropped_without_a_workspace() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut harness = pipeline_with(dir.path(), HEALTHY_AGENT, 60, 3);
    let cancel = CancellationToken::new();

    harness
        .pipeline
        .process(&cancel, event("kind-b", "abc", None))
        .await;

    assert!(
        !harness.workspace_root.exists(),
        "no incident directory may be created for triage-disabled clusters"
    );
    assert!(harness.notifier.messages().is_empty());
}

#[tokio::test]
async fn degraded_permissions_warn_but_proceed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut harness = pipeline_with(dir.path(), HEALTHY_AGENT, 60, 3);
    let cancel = CancellationToken::new();

    let mut permissions = full_permissions();
    permissions.get_events = false;
    harness
        .pipeline
        .process(&cancel, event("kind-a", "abc", Some(Arc::new(permissions))))
        .await;

    let incidents = persisted_incidents(&harness.workspace_root);
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0]["status"], "resolved");
}
