use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use faultline_config::{ClusterConfig, OverflowPolicy, Tuning};
use thiserror::Error;
use tokio::{
    sync::{
        Mutex,
        mpsc::{self, error::TrySendError},
    },
    task::JoinSet,
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

mod record;

pub use record::{
    ClusterConnection, ClusterHealth, ConnectionState, ConnectionStatus, HealthSnapshot,
    HealthTotals,
};

use crate::{
    event::ClusterEvent,
    permissions::{PermissionProber, ProbeError},
    stream::FaultSubscription,
};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("unknown cluster '{name}'")]
    UnknownCluster { name: String },
    #[error("cluster '{name}' has no stream client attached")]
    MissingSubscription { name: String },
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error("connection manager already started")]
    AlreadyStarted,
}

/// Read side of the global cluster-event channel. The sequence ends when
/// the manager stops and every per-cluster task has drained.
pub struct EventReceiver {
    rx: mpsc::Receiver<ClusterEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<ClusterEvent> {
        self.rx.recv().await
    }
}

/// Owns the full set of per-cluster stream clients, multiplexes their
/// faults into one bounded channel and exposes health.
///
/// One task per cluster keeps per-cluster ordering; events from different
/// clusters interleave by arrival. Delivery is at-most-once: overflow is
/// resolved by the configured policy, never by blocking a cluster task.
pub struct ConnectionManager {
    clusters: RwLock<HashMap<String, Arc<ClusterConnection>>>,
    prober: PermissionProber,
    channel_capacity: usize,
    overflow: OverflowPolicy,
    reconnect_backoff: Duration,
    tasks: Mutex<JoinSet<()>>,
    shutdown: std::sync::Mutex<Option<CancellationToken>>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(clusters: &[ClusterConfig], tuning: &Tuning, prober: PermissionProber) -> Self {
        let records = clusters
            .iter()
            .map(|config| {
                (
                    config.name.clone(),
                    Arc::new(ClusterConnection::new(config.clone())),
                )
            })
            .collect();

        Self {
            clusters: RwLock::new(records),
            prober,
            channel_capacity: tuning.channel_capacity,
            overflow: tuning.overflow,
            reconnect_backoff: tuning.reconnect_backoff(),
            tasks: Mutex::new(JoinSet::new()),
            shutdown: std::sync::Mutex::new(None),
        }
    }

    /// Associate a stream client with a configured cluster. Required for
    /// every cluster before `start`.
    pub fn attach(
        &self,
        name: &str,
        subscription: Arc<dyn FaultSubscription>,
    ) -> Result<(), ManagerError> {
        let clusters = self
            .clusters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let record = clusters.get(name).ok_or_else(|| ManagerError::UnknownCluster {
            name: name.to_owned(),
        })?;
        record.attach_subscription(subscription);
        debug!(cluster = name, "stream client attached");
        Ok(())
    }

    /// Probe permissions for every triage-enabled cluster. Any probe
    /// failure fails initialization; the caller treats that as fatal.
    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<(), ManagerError> {
        let records: Vec<Arc<ClusterConnection>> = {
            let clusters = self
                .clusters
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            clusters.values().cloned().collect()
        };

        for record in records {
            if !record.config().triage.enabled {
                info!(cluster = %record.config().name, "triage disabled, skipping permission probe");
                continue;
            }
            let permissions = self.prober.probe(cancel, record.config()).await?;
            info!(
                cluster = %record.config().name,
                minimum_met = permissions.minimum_met(),
                warnings = permissions.warnings.len(),
                "cluster permissions probed"
            );
            record.set_permissions(permissions);
        }
        Ok(())
    }

    /// Spawn one task per cluster and hand back the read side of the global
    /// channel.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<EventReceiver, ManagerError> {
        let task_cancel = {
            let mut shutdown = self
                .shutdown
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if shutdown.is_some() {
                return Err(ManagerError::AlreadyStarted);
            }
            let token = cancel.child_token();
            *shutdown = Some(token.clone());
            token
        };

        let records: Vec<Arc<ClusterConnection>> = {
            let clusters = self
                .clusters
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            clusters.values().cloned().collect()
        };

        for record in &records {
            if record.subscription().is_none() {
                return Err(ManagerError::MissingSubscription {
                    name: record.config().name.clone(),
                });
            }
        }

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let mut tasks = self.tasks.lock().await;
        for record in records {
            tasks.spawn(run_cluster(
                record,
                tx.clone(),
                task_cancel.clone(),
                self.reconnect_backoff,
                self.overflow,
            ));
        }
        info!(clusters = tasks.len(), "connection manager started");

        Ok(EventReceiver { rx })
    }

    /// Cancel every cluster task, await their completion and close the
    /// global channel.
    pub async fn stop(&self) {
        let token = {
            let mut shutdown = self
                .shutdown
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            shutdown.take()
        };
        if let Some(token) = token {
            token.cancel();
        }

        let mut tasks = self.tasks.lock().await;
        while tasks.join_next().await.is_some() {}
        info!("connection manager stopped");
    }

    /// Current per-cluster health with aggregate counts.
    #[must_use]
    pub fn health(&self) -> HealthSnapshot {
        let clusters = self
            .clusters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        HealthSnapshot::from_records(clusters.values())
    }

    /// Look up one cluster record, mainly for tests and the daemon wiring.
    #[must_use]
    pub fn connection(&self, name: &str) -> Option<Arc<ClusterConnection>> {
        let clusters = self
            .clusters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        clusters.get(name).cloned()
    }
}

/// Per-cluster loop: subscribe, forward faults, reconnect after the
/// configured backoff, until cancellation.
async fn run_cluster(
    record: Arc<ClusterConnection>,
    tx: mpsc::Sender<ClusterEvent>,
    cancel: CancellationToken,
    backoff: Duration,
    overflow: OverflowPolicy,
) {
    let cluster = record.config().name.clone();

    loop {
        if cancel.is_cancelled() {
            break;
        }

        record.set_state(ConnectionState::Connecting);
        let Some(subscription) = record.subscription() else {
            // attach() is required before start(); losing the capability
            // mid-run is unrecoverable for this cluster.
            error!(%cluster, "stream client detached, stopping cluster task");
            return;
        };

        record.set_state(ConnectionState::Subscribing);
        let mut receiver = match subscription.subscribe(cancel.child_token()).await {
            Ok(receiver) => receiver,
            Err(stream_error) => {
                warn!(%cluster, error = %stream_error, "subscription failed");
                record.record_error(&stream_error.to_string());
                if !backoff_or_cancelled(&cancel, backoff).await {
                    break;
                }
                continue;
            }
        };

        record.mark_subscribed();
        info!(%cluster, "subscribed to fault stream");

        loop {
            let fault = tokio::select! {
                () = cancel.cancelled() => {
                    receiver.close();
                    record.set_state(ConnectionState::Disconnected);
                    return;
                }
                fault = receiver.recv() => fault,
            };
            let Some(fault) = fault else {
                break;
            };

            let event = ClusterEvent {
                cluster: cluster.clone(),
                kubeconfig: record.config().kubeconfig.clone(),
                permissions: record.permissions(),
                labels: record.config().labels.clone(),
                fault,
            };

            match tx.try_send(event) {
                Ok(()) => record.mark_event(),
                Err(TrySendError::Full(event)) => match overflow {
                    OverflowPolicy::Drop => {
                        record.record_overflow_drop();
                        warn!(
                            %cluster,
                            fault_id = %event.fault.id,
                            "global channel full, dropping event"
                        );
                    }
                    OverflowPolicy::Reject => {
                        record.record_overflow_reject();
                        error!(
                            %cluster,
                            fault_id = %event.fault.id,
                            "global channel full, rejecting event"
                        );
                    }
                },
                Err(TrySendError::Closed(_)) => {
                    debug!(%cluster, "global channel closed, stopping cluster task");
                    return;
                }
            }
        }

        // Stream ended: server closed or transport failed.
        record.record_disconnect();
        warn!(%cluster, "fault stream ended");
        if !backoff_or_cancelled(&cancel, backoff).await {
            break;
        }
    }
}

/// Cancellation-aware reconnect delay. Returns `false` when cancellation
/// fired during the wait.
async fn backoff_or_cancelled(cancel: &CancellationToken, backoff: Duration) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = sleep(backoff) => true,
    }
}
