use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use faultline_core::{
    FaultReceiver, FaultSender, FaultSubscription, StreamError, fault_channel,
};
use futures::StreamExt as _;
use reqwest::{StatusCode, header};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod rpc;
mod sse;

pub use rpc::{FAULT_STREAM, MESSAGE_METHOD, SUBSCRIBE_MODE};
pub use sse::{SseEvent, SseParser};

use rpc::{Notification, SubscribeRequest, SubscribeResponse, WireFault};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Long-lived subscription to one cluster's observation server.
///
/// The server exposes an SSE endpoint carrying JSON-RPC notifications and
/// an RPC endpoint for the subscribe call. The client holds the session
/// open and feeds faults into a bounded buffer. It never reconnects on its
/// own; the connection manager owns retry.
pub struct SseFaultStream {
    cluster: String,
    endpoint: String,
    client: reqwest::Client,
    buffer: usize,
    request_id: AtomicU64,
}

impl SseFaultStream {
    /// Build a stream client for one cluster endpoint. `buffer` bounds the
    /// number of undelivered faults held for the connection manager.
    pub fn new(
        cluster: impl Into<String>,
        endpoint: impl Into<String>,
        buffer: usize,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        let endpoint = endpoint.into();
        Ok(Self {
            cluster: cluster.into(),
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            client,
            buffer,
            request_id: AtomicU64::new(1),
        })
    }

    fn events_url(&self) -> String {
        format!("{}/events", self.endpoint)
    }

    fn rpc_url(&self) -> String {
        format!("{}/rpc", self.endpoint)
    }

    /// Open the SSE session. Authentication rejections are distinguished so
    /// the manager can report them; everything else is unreachability.
    async fn open_session(&self) -> Result<reqwest::Response, StreamError> {
        let response = self
            .client
            .get(self.events_url())
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|error| StreamError::Unreachable {
                endpoint: self.endpoint.clone(),
                detail: error.to_string(),
            })?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(StreamError::AuthRejected {
                endpoint: self.endpoint.clone(),
            }),
            status => Err(StreamError::Unreachable {
                endpoint: self.endpoint.clone(),
                detail: format!("HTTP {status}"),
            }),
        }
    }

    /// Issue the JSON-RPC subscribe call for the fault stream.
    async fn send_subscribe(&self) -> Result<(), StreamError> {
        let request = SubscribeRequest::new(self.request_id.fetch_add(1, Ordering::Relaxed));
        let response = self
            .client
            .post(self.rpc_url())
            .json(&request)
            .send()
            .await
            .map_err(|error| StreamError::SubscribeFailed {
                detail: error.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::SubscribeFailed {
                detail: format!("HTTP {status}"),
            });
        }

        let body: SubscribeResponse =
            response
                .json()
                .await
                .map_err(|error| StreamError::Protocol {
                    detail: format!("malformed subscribe response: {error}"),
                })?;
        if let Some(error) = body.error {
            return Err(StreamError::SubscribeFailed {
                detail: format!("rpc error {}: {}", error.code, error.message),
            });
        }
        if body.result.is_none() {
            return Err(StreamError::Protocol {
                detail: "subscribe response carries neither result nor error".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl FaultSubscription for SseFaultStream {
    async fn subscribe(&self, cancel: CancellationToken) -> Result<FaultReceiver, StreamError> {
        let session = self.open_session().await?;
        self.send_subscribe().await?;
        info!(cluster = %self.cluster, endpoint = %self.endpoint, "fault subscription established");

        let (sender, rx) = fault_channel(self.buffer);
        let cluster = self.cluster.clone();
        let reader = tokio::spawn(read_session(session, sender, cancel, cluster));

        Ok(FaultReceiver::new(rx, reader))
    }
}

/// Drain the SSE byte stream until EOF, transport failure or cancellation,
/// delivering each fault notification into the buffer.
async fn read_session(
    session: reqwest::Response,
    sender: FaultSender,
    cancel: CancellationToken,
    cluster: String,
) {
    let mut stream = session.bytes_stream();
    let mut parser = SseParser::new();

    loop {
        let chunk = tokio::select! {
            () = cancel.cancelled() => {
                debug!(%cluster, "subscription cancelled, closing session");
                return;
            }
            chunk = stream.next() => chunk,
        };

        let chunk = match chunk {
            Some(Ok(chunk)) => chunk,
            Some(Err(error)) => {
                warn!(%cluster, %error, "fault stream transport failed");
                return;
            }
            None => {
                debug!(%cluster, "fault stream closed by server");
                return;
            }
        };

        for event in parser.push(&chunk) {
            if !handle_event(&event, &sender, &cluster) {
                return;
            }
        }
    }
}

/// Returns `false` when the receiving side is gone and reading should stop.
fn handle_event(event: &SseEvent, sender: &FaultSender, cluster: &str) -> bool {
    let notification: Notification = match serde_json::from_str(&event.data) {
        Ok(notification) => notification,
        Err(error) => {
            warn!(%cluster, %error, "skipping malformed stream frame");
            return true;
        }
    };

    if notification.method != MESSAGE_METHOD || notification.params.stream != FAULT_STREAM {
        debug!(
            %cluster,
            method = %notification.method,
            stream = %notification.params.stream,
            "ignoring notification for other stream"
        );
        return true;
    }

    let wire: WireFault = match serde_json::from_value(notification.params.payload) {
        Ok(wire) => wire,
        Err(error) => {
            warn!(%cluster, %error, "skipping malformed fault payload");
            return true;
        }
    };

    let Some(fault) = wire.into_fault() else {
        warn!(%cluster, "fault notification is missing its upstream faultId, dropping");
        return true;
    };

    sender.deliver(fault)
}
