use std::{
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock},
};

use chrono::{DateTime, Utc};
use faultline_config::ClusterConfig;
use serde::Serialize;

use crate::{permissions::ClusterPermissions, stream::FaultSubscription};

/// Lifecycle of one cluster's subscription as tracked by the manager.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Subscribing,
    Active,
    Failed,
}

/// Mutable status fields of one connection record, guarded by the record's
/// own lock.
#[derive(Clone, Debug, Default)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub last_event: Option<DateTime<Utc>>,
    pub events_received: u64,
    pub last_error: Option<String>,
    pub consecutive_retries: u32,
    pub overflow_dropped: u64,
    pub overflow_rejected: u64,
}

/// One cluster's connection record: static config, the attached stream
/// capability, the startup permission snapshot and live status.
pub struct ClusterConnection {
    config: ClusterConfig,
    subscription: Mutex<Option<Arc<dyn FaultSubscription>>>,
    permissions: OnceLock<Arc<ClusterPermissions>>,
    status: Mutex<ConnectionStatus>,
}

impl ClusterConnection {
    #[must_use]
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            subscription: Mutex::new(None),
            permissions: OnceLock::new(),
            status: Mutex::new(ConnectionStatus::default()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn attach_subscription(&self, subscription: Arc<dyn FaultSubscription>) {
        let mut slot = self
            .subscription
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(subscription);
    }

    #[must_use]
    pub fn subscription(&self) -> Option<Arc<dyn FaultSubscription>> {
        self.subscription
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Store the startup permission snapshot. Set once; later calls are
    /// ignored.
    pub fn set_permissions(&self, permissions: ClusterPermissions) {
        let _ = self.permissions.set(Arc::new(permissions));
    }

    #[must_use]
    pub fn permissions(&self) -> Option<Arc<ClusterPermissions>> {
        self.permissions.get().cloned()
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.with_status(|status| status.state = state);
    }

    pub fn record_error(&self, error: &str) {
        self.with_status(|status| {
            status.state = ConnectionState::Failed;
            status.last_error = Some(error.to_owned());
            status.consecutive_retries += 1;
        });
    }

    pub fn record_disconnect(&self) {
        self.with_status(|status| {
            status.state = ConnectionState::Disconnected;
            status.consecutive_retries += 1;
        });
    }

    pub fn mark_subscribed(&self) {
        self.with_status(|status| {
            status.state = ConnectionState::Connected;
            status.last_error = None;
            status.consecutive_retries = 0;
        });
    }

    pub fn mark_event(&self) {
        self.with_status(|status| {
            status.state = ConnectionState::Active;
            status.last_event = Some(Utc::now());
            status.events_received += 1;
        });
    }

    pub fn record_overflow_drop(&self) {
        self.with_status(|status| status.overflow_dropped += 1);
    }

    pub fn record_overflow_reject(&self) {
        self.with_status(|status| status.overflow_rejected += 1);
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn with_status(&self, apply: impl FnOnce(&mut ConnectionStatus)) {
        let mut status = self
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        apply(&mut status);
    }
}

/// Health view of one cluster, served by the health endpoint.
#[derive(Clone, Debug, Serialize)]
pub struct ClusterHealth {
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event: Option<DateTime<Utc>>,
    pub events_received: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub consecutive_retries: u32,
    pub overflow_dropped: u64,
    pub overflow_rejected: u64,
    pub labels: HashMap<String, String>,
    pub triage_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<ClusterPermissions>,
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct HealthTotals {
    pub clusters: usize,
    pub active: usize,
    pub failed: usize,
    pub events_received: u64,
    pub overflow_dropped: u64,
}

/// Aggregate health snapshot across all configured clusters.
#[derive(Clone, Debug, Serialize)]
pub struct HealthSnapshot {
    pub clusters: std::collections::BTreeMap<String, ClusterHealth>,
    pub totals: HealthTotals,
}

impl HealthSnapshot {
    #[must_use]
    pub fn from_records<'a>(records: impl Iterator<Item = &'a Arc<ClusterConnection>>) -> Self {
        let mut clusters = std::collections::BTreeMap::new();
        let mut totals = HealthTotals::default();

        for record in records {
            let status = record.status();
            totals.clusters += 1;
            totals.events_received += status.events_received;
            totals.overflow_dropped += status.overflow_dropped;
            match status.state {
                ConnectionState::Active => totals.active += 1,
                ConnectionState::Failed => totals.failed += 1,
                _ => {}
            }

            clusters.insert(
                record.config().name.clone(),
                ClusterHealth {
                    state: status.state,
                    last_event: status.last_event,
                    events_received: status.events_received,
                    last_error: status.last_error,
                    consecutive_retries: status.consecutive_retries,
                    overflow_dropped: status.overflow_dropped,
                    overflow_rejected: status.overflow_rejected,
                    labels: record.config().labels.clone(),
                    triage_enabled: record.config().triage.enabled,
                    permissions: record.permissions().map(|p| (*p).clone()),
                },
            );
        }

        Self { clusters, totals }
    }
}
