use std::net::SocketAddr;

use axum::{
    Json, Router,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use faultline_core::{FaultSubscription as _, StreamError};
use faultline_stream_sse::SseFaultStream;
use tokio_util::sync::CancellationToken;

fn frame(payload: &str) -> String {
    format!("event: message\ndata: {payload}\n\n")
}

fn fault_notification(fault_id: &str) -> String {
    frame(&format!(
        r#"{{"jsonrpc":"2.0","method":"notifications/message","params":{{"stream":"resource-faults","payload":{{"faultId":"{fault_id}","cluster":"kind-a","resource":{{"kind":"Pod","name":"p","namespace":"ns"}},"faultType":"CrashLoop","severity":"critical","context":"x","timestamp":"t"}}}}}}"#
    ))
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

async fn sse_body(body: String) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/event-stream")], body)
}

async fn rpc_ok() -> Json<serde_json::Value> {
    Json(serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {}}))
}

#[tokio::test]
async fn delivers_faults_in_stream_order() {
    let mut body = String::new();
    body.push_str(": keepalive\n\n");
    body.push_str(&fault_notification("flt-1"));
    // Frames for other streams and methods are ignored.
    body.push_str(&frame(
        r#"{"jsonrpc":"2.0","method":"notifications/message","params":{"stream":"audit","payload":{}}}"#,
    ));
    body.push_str(&frame(
        r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{}}"#,
    ));
    // A fault without its upstream identifier is dropped with a warning.
    body.push_str(&frame(
        r#"{"jsonrpc":"2.0","method":"notifications/message","params":{"stream":"resource-faults","payload":{"cluster":"kind-a"}}}"#,
    ));
    body.push_str(&fault_notification("flt-2"));

    let app = Router::new()
        .route("/events", get(move || sse_body(body.clone())))
        .route("/rpc", post(rpc_ok));
    let addr = serve(app).await;

    let client = SseFaultStream::new("kind-a", format!("http://{addr}"), 10).expect("client");
    let mut receiver = client
        .subscribe(CancellationToken::new())
        .await
        .expect("subscribe");

    let first = receiver.recv().await.expect("first fault");
    assert_eq!(first.id, "flt-1");
    assert_eq!(first.resource.namespace, "ns");

    let second = receiver.recv().await.expect("second fault");
    assert_eq!(second.id, "flt-2");

    // Server closed the stream after the scripted frames.
    assert!(receiver.recv().await.is_none());
}

#[tokio::test]
async fn forbidden_session_is_an_auth_rejection() {
    let app = Router::new()
        .route("/events", get(|| async { StatusCode::FORBIDDEN }))
        .route("/rpc", post(rpc_ok));
    let addr = serve(app).await;

    let client = SseFaultStream::new("kind-a", format!("http://{addr}"), 10).expect("client");
    let err = client
        .subscribe(CancellationToken::new())
        .await
        .err()
        .expect("must fail");
    assert!(matches!(err, StreamError::AuthRejected { .. }));
}

#[tokio::test]
async fn rpc_error_fails_the_subscribe_call() {
    let app = Router::new()
        .route("/events", get(|| async { sse_body(String::new()).await }))
        .route(
            "/rpc",
            post(|| async {
                Json(serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "error": {"code": -32601, "message": "unknown capability"}
                }))
            }),
        );
    let addr = serve(app).await;

    let client = SseFaultStream::new("kind-a", format!("http://{addr}"), 10).expect("client");
    let err = client
        .subscribe(CancellationToken::new())
        .await
        .err()
        .expect("must fail");
    assert!(matches!(err, StreamError::SubscribeFailed { .. }));
}

#[tokio::test]
async fn unreachable_endpoint_is_reported() {
    let client = SseFaultStream::new("kind-a", "http://127.0.0.1:1", 10).expect("client");
    let err = client
        .subscribe(CancellationToken::new())
        .await
        .err()
        .expect("must fail");
    assert!(matches!(err, StreamError::Unreachable { .. }));
}
