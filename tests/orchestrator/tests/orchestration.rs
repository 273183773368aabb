use std::{net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    Json, Router,
    http::header,
    routing::{get, post},
};
use faultline_config::{ClusterConfig, OverflowPolicy, TriageToggle, Tuning};
use faultline_core::{
    ConnectionManager, FaultReceiver, FaultSubscription, ManagerError, PermissionProber,
    StreamError, fault_channel,
};
use faultline_sink_fs::FilesystemSink;
use faultline_stream_sse::SseFaultStream;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

mod common;

use common::{HEALTHY_AGENT, KUBECTL_ALLOW_ALL, full_permissions, persisted_incidents, pipeline_with};

fn cluster(name: &str, endpoint: &str, triage: bool, kubeconfig: Option<std::path::PathBuf>) -> ClusterConfig {
    ClusterConfig {
        name: name.into(),
        endpoint: endpoint.into(),
        labels: std::collections::HashMap::new(),
        triage: TriageToggle { enabled: triage },
        kubeconfig,
        secrets_access: false,
    }
}

fn tuning(capacity: usize, overflow: OverflowPolicy) -> Tuning {
    Tuning {
        channel_capacity: capacity,
        overflow,
        reconnect_backoff_secs: 3600,
        ..Tuning::default()
    }
}

/// Yields a scripted batch of faults on the first subscribe, then reports
/// the stream as unreachable.
struct ScriptedStream {
    cluster: String,
    batch: Vec<String>,
    subscribed: std::sync::atomic::AtomicBool,
}

impl ScriptedStream {
    fn new(cluster: &str, batch: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            cluster: cluster.into(),
            batch: batch.iter().map(|id| (*id).to_owned()).collect(),
            subscribed: std::sync::atomic::AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl FaultSubscription for ScriptedStream {
    async fn subscribe(&self, _cancel: CancellationToken) -> Result<FaultReceiver, StreamError> {
        if self.subscribed.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return Err(StreamError::Unreachable {
                endpoint: "scripted".into(),
                detail: "stream exhausted".into(),
            });
        }
        let (tx, rx) = fault_channel(self.batch.len().max(1));
        for id in &self.batch {
            let _ = tx.deliver(common::fault(id, &self.cluster));
        }
        let reader = tokio::spawn(async move {
            let _hold = tx;
        });
        Ok(FaultReceiver::new(rx, reader))
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached within timeout");
}

#[tokio::test]
async fn overflow_with_drop_discards_newest_and_preserves_order() {
    let config = cluster("kind-a", "http://127.0.0.1:9000", false, None);
    let manager = ConnectionManager::new(
        std::slice::from_ref(&config),
        &tuning(2, OverflowPolicy::Drop),
        PermissionProber::default(),
    );
    manager
        .attach(
            "kind-a",
            ScriptedStream::new("kind-a", &["f1", "f2", "f3", "f4", "f5"]),
        )
        .expect("attach");

    let cancel = CancellationToken::new();
    // The receiver is not consumed yet, standing in for a pipeline blocked
    // on an in-flight executor.
    let mut events = manager.start(&cancel).await.expect("start");

    wait_until(|| {
        manager
            .connection("kind-a")
            .map(|record| record.status().overflow_dropped == 3)
            .unwrap_or(false)
    })
    .await;

    // The two queued events drain in arrival order.
    assert_eq!(events.recv().await.expect("first").fault.id, "f1");
    assert_eq!(events.recv().await.expect("second").fault.id, "f2");

    let snapshot = manager.health();
    assert_eq!(snapshot.totals.overflow_dropped, 3);
    assert_eq!(
        snapshot.clusters.get("kind-a").expect("health").events_received,
        2
    );

    cancel.cancel();
    manager.stop().await;
}

#[tokio::test]
async fn overflow_with_reject_records_rejects() {
    let config = cluster("kind-a", "http://127.0.0.1:9000", false, None);
    let manager = ConnectionManager::new(
        std::slice::from_ref(&config),
        &tuning(1, OverflowPolicy::Reject),
        PermissionProber::default(),
    );
    manager
        .attach("kind-a", ScriptedStream::new("kind-a", &["f1", "f2", "f3"]))
        .expect("attach");

    let cancel = CancellationToken::new();
    let mut events = manager.start(&cancel).await.expect("start");

    wait_until(|| {
        manager
            .connection("kind-a")
            .map(|record| record.status().overflow_rejected == 2)
            .unwrap_or(false)
    })
    .await;

    assert_eq!(events.recv().await.expect("queued").fault.id, "f1");

    cancel.cancel();
    manager.stop().await;
}

#[tokio::test]
async fn permission_probe_failure_fails_initialization() {
    let dir = tempfile::tempdir().expect("tempdir");
    let kubeconfig = dir.path().join("kubeconfig");
    std::fs::write(&kubeconfig, "apiVersion: v1\n").expect("kubeconfig");

    let config = cluster("kind-c", "http://127.0.0.1:9000", true, Some(kubeconfig));
    let manager = ConnectionManager::new(
        std::slice::from_ref(&config),
        &Tuning::default(),
        PermissionProber::with_binary("/nonexistent/capability-query"),
    );

    let err = manager
        .initialize(&CancellationToken::new())
        .await
        .err()
        .expect("initialize must fail");
    assert!(matches!(err, ManagerError::Probe(_)));
}

#[tokio::test]
async fn permission_probe_stores_snapshot_on_success() {
    let dir = tempfile::tempdir().expect("tempdir");
    let kubeconfig = dir.path().join("kubeconfig");
    std::fs::write(&kubeconfig, "apiVersion: v1\n").expect("kubeconfig");
    let kubectl = common::write_script(dir.path(), "kubectl-stub", KUBECTL_ALLOW_ALL);

    let config = cluster("kind-a", "http://127.0.0.1:9000", true, Some(kubeconfig));
    let manager = ConnectionManager::new(
        std::slice::from_ref(&config),
        &Tuning::default(),
        PermissionProber::with_binary(kubectl.to_string_lossy().into_owned()),
    );

    manager
        .initialize(&CancellationToken::new())
        .await
        .expect("initialize");

    let record = manager.connection("kind-a").expect("record");
    let permissions = record.permissions().expect("permissions stored");
    assert!(permissions.minimum_met());
    // Secrets access is disabled, so the informational warning is present.
    assert!(
        permissions
            .warnings
            .iter()
            .any(|warning| warning.contains("secrets access disabled"))
    );
}

#[tokio::test]
async fn health_endpoint_serves_cluster_snapshot() {
    let config = cluster("kind-a", "http://127.0.0.1:9000", false, None);
    let manager = Arc::new(ConnectionManager::new(
        std::slice::from_ref(&config),
        &Tuning::default(),
        PermissionProber::default(),
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    let router = faultline_daemon::health::health_router(Arc::clone(&manager));
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    let body: serde_json::Value = reqwest::get(format!("http://{addr}/health/clusters"))
        .await
        .expect("request")
        .json()
        .await
        .expect("json body");

    assert_eq!(body["totals"]["clusters"], 1);
    assert_eq!(body["clusters"]["kind-a"]["state"], "disconnected");
    assert_eq!(body["clusters"]["kind-a"]["triage_enabled"], false);
}

fn fault_notification(fault_id: &str) -> String {
    format!(
        "event: message\ndata: {}\n\n",
        serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/message",
            "params": {
                "stream": "resource-faults",
                "payload": {
                    "faultId": fault_id,
                    "cluster": "kind-a",
                    "resource": {"kind": "Pod", "name": "p", "namespace": "ns"},
                    "faultType": "CrashLoop",
                    "severity": "critical",
                    "context": "x",
                    "timestamp": "t"
                }
            }
        })
    )
}

async fn serve_stream_stub(body: String) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new()
        .route(
            "/events",
            get(move || {
                let body = body.clone();
                async move { ([(header::CONTENT_TYPE, "text/event-stream")], body) }
            }),
        )
        .route(
            "/rpc",
            post(|| async { Json(serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {}})) }),
        );
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Full path: SSE stub server → stream client → connection manager →
/// pipeline → filesystem sink → notifier.
#[tokio::test]
async fn end_to_end_fault_becomes_resolved_incident() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let addr = serve_stream_stub(fault_notification("flt-e2e")).await;

    let config = cluster("kind-a", &format!("http://{addr}"), false, None);
    let manager = Arc::new(ConnectionManager::new(
        std::slice::from_ref(&config),
        &tuning(10, OverflowPolicy::Drop),
        PermissionProber::default(),
    ));
    let stream = SseFaultStream::new("kind-a", format!("http://{addr}"), 10)?;
    manager.attach("kind-a", Arc::new(stream))?;

    // Triage is force-enabled by injecting the permission snapshot the
    // prober would have produced.
    manager
        .connection("kind-a")
        .expect("record")
        .set_permissions(full_permissions());

    let cancel = CancellationToken::new();
    let events = manager.start(&cancel).await?;

    let harness = pipeline_with(dir.path(), HEALTHY_AGENT, 60, 3);
    let notifier = harness.notifier.clone();
    let workspace_root = harness.workspace_root.clone();
    let sink = Arc::new(FilesystemSink::new(dir.path().join("artifacts")));
    let pipeline = harness.pipeline.with_sink(sink);

    let pipeline_cancel = cancel.clone();
    let pipeline_task = tokio::spawn(pipeline.run(pipeline_cancel, events));

    wait_until(|| !notifier.incident_statuses().is_empty()).await;

    cancel.cancel();
    manager.stop().await;
    let _ = pipeline_task.await;

    assert_eq!(notifier.incident_statuses(), vec!["resolved"]);

    let incidents = persisted_incidents(&workspace_root);
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0]["status"], "resolved");
    assert_eq!(incidents[0]["fault_id"], "flt-e2e");
    // Sink references were merged back into the persisted document.
    let report_url = incidents[0]["report_url"].as_str().expect("report url");
    assert!(report_url.ends_with("investigation.md"));
    assert!(std::path::Path::new(report_url).exists());
    Ok(())
}
