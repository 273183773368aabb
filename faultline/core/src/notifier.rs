use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Webhook attempts per message: one initial try plus fixed-backoff retries
/// on 5xx and transport errors. 4xx is fatal for the message.
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook rejected message with status {status}")]
    Rejected { status: u16 },
    #[error("webhook request failed: {source}")]
    Request {
        #[source]
        source: reqwest::Error,
    },
    #[error("webhook unavailable after {attempts} attempts")]
    Exhausted { attempts: u32 },
    #[error("notification cancelled")]
    Cancelled,
}

/// Per-incident completion message.
#[derive(Clone, Debug, Serialize)]
pub struct IncidentMessage {
    pub incident_id: String,
    pub cluster: String,
    pub resource: String,
    pub fault_type: String,
    pub status: String,
    pub root_cause: String,
    pub confidence: String,
    pub duration_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_url: Option<String>,
}

/// Edge alert raised when the failure breaker opens.
#[derive(Clone, Debug, Serialize)]
pub struct DegradedAlert {
    pub consecutive_failures: usize,
    pub window_secs: u64,
    pub recent_reasons: Vec<String>,
}

/// Edge alert raised when the breaker closes again.
#[derive(Clone, Debug, Serialize)]
pub struct RecoveredAlert {
    pub failures_overcome: usize,
    pub window_secs: u64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ChatMessage {
    Incident(IncidentMessage),
    Degraded(DegradedAlert),
    Recovered(RecoveredAlert),
}

/// Outbound chat capability.
#[async_trait]
pub trait Notify: Send + Sync {
    async fn send(
        &self,
        cancel: &CancellationToken,
        message: &ChatMessage,
    ) -> Result<(), NotifyError>;
}

/// POSTs messages to a configured webhook with bounded fixed-backoff retry.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// Build a notifier with the given request timeout.
    pub fn new(url: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    async fn post_once(&self, message: &ChatMessage) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(message)
            .send()
            .await
            .map_err(|source| NotifyError::Request { source })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(NotifyError::Rejected {
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl Notify for WebhookNotifier {
    async fn send(
        &self,
        cancel: &CancellationToken,
        message: &ChatMessage,
    ) -> Result<(), NotifyError> {
        for attempt in 1..=MAX_ATTEMPTS {
            let outcome = tokio::select! {
                () = cancel.cancelled() => return Err(NotifyError::Cancelled),
                outcome = self.post_once(message) => outcome,
            };

            match outcome {
                Ok(()) => {
                    debug!(attempt, "webhook message delivered");
                    return Ok(());
                }
                // Client errors will not improve on retry.
                Err(NotifyError::Rejected { status }) if (400..500).contains(&u32::from(status)) => {
                    return Err(NotifyError::Rejected { status });
                }
                Err(error) => {
                    warn!(attempt, %error, "webhook delivery failed");
                    if attempt < MAX_ATTEMPTS {
                        tokio::select! {
                            () = cancel.cancelled() => return Err(NotifyError::Cancelled),
                            () = sleep(RETRY_BACKOFF) => {}
                        }
                    }
                }
            }
        }
        Err(NotifyError::Exhausted {
            attempts: MAX_ATTEMPTS,
        })
    }
}

/// Stand-in when no webhook is configured; messages are logged and dropped.
pub struct NoopNotifier;

#[async_trait]
impl Notify for NoopNotifier {
    async fn send(
        &self,
        _cancel: &CancellationToken,
        message: &ChatMessage,
    ) -> Result<(), NotifyError> {
        debug!(?message, "no webhook configured, dropping notification");
        Ok(())
    }
}
