use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::fault::Fault;

/// Failures surfaced by a stream client while establishing or holding a
/// subscription.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("endpoint {endpoint} unreachable: {detail}")]
    Unreachable { endpoint: String, detail: String },
    #[error("authentication rejected by {endpoint}")]
    AuthRejected { endpoint: String },
    #[error("subscribe call failed: {detail}")]
    SubscribeFailed { detail: String },
    #[error("protocol violation: {detail}")]
    Protocol { detail: String },
    #[error("stream terminated: {detail}")]
    Terminated { detail: String },
}

/// Capability the connection manager holds for one cluster's fault stream.
///
/// Implementations connect and subscribe, then feed faults into the
/// receiver until the stream ends or the token is cancelled. They do not
/// reconnect on their own; that is the connection manager's concern.
#[async_trait]
pub trait FaultSubscription: Send + Sync {
    async fn subscribe(&self, cancel: CancellationToken) -> Result<FaultReceiver, StreamError>;
}

/// Create the bounded buffer pair between a transport reader and the
/// connection manager. The sender never blocks the reader: when the buffer
/// is full, new faults are dropped with a warning.
#[must_use]
pub fn fault_channel(capacity: usize) -> (FaultSender, mpsc::Receiver<Fault>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        FaultSender {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

/// Sending half of the per-cluster fault buffer.
#[derive(Clone)]
pub struct FaultSender {
    tx: mpsc::Sender<Fault>,
    dropped: Arc<AtomicU64>,
}

impl FaultSender {
    /// Deliver a fault without blocking. Returns `false` once the receiving
    /// side is gone and the transport reader should stop.
    pub fn deliver(&self, fault: Fault) -> bool {
        match self.tx.try_send(fault) {
            Ok(()) => true,
            Err(TrySendError::Full(fault)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    fault_id = %fault.id,
                    cluster = %fault.cluster,
                    total_dropped = dropped,
                    "stream buffer full, dropping fault"
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Number of faults dropped because the buffer was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Receiving half handed back from `FaultSubscription::subscribe`. Yields
/// faults in stream order; the sequence ends when the stream terminates or
/// cancellation fires.
pub struct FaultReceiver {
    rx: mpsc::Receiver<Fault>,
    reader: Option<JoinHandle<()>>,
}

impl FaultReceiver {
    #[must_use]
    pub fn new(rx: mpsc::Receiver<Fault>, reader: JoinHandle<()>) -> Self {
        Self {
            rx,
            reader: Some(reader),
        }
    }

    pub async fn recv(&mut self) -> Option<Fault> {
        self.rx.recv().await
    }

    /// Manual teardown: stop the transport reader and close the buffer.
    pub fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.rx.close();
    }
}

impl Drop for FaultReceiver {
    fn drop(&mut self) {
        self.close();
    }
}
