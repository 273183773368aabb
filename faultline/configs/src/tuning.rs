use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BREAKER_THRESHOLD, DEFAULT_CHANNEL_CAPACITY, DEFAULT_HTTP_TIMEOUT,
    DEFAULT_MIN_REPORT_BYTES, DEFAULT_RECENT_REASONS_CAPACITY, DEFAULT_RECONNECT_BACKOFF,
    DEFAULT_STREAM_BUFFER, DEFAULT_TIMEOUT_BUFFER,
};

/// What happens when the global channel is full and a new event arrives.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the newly arrived event with a warning.
    #[default]
    Drop,
    /// Treat the failed send as an error on the sending side and move on.
    Reject,
}

/// Tuning knobs with compiled defaults. All optional in the config file.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Tuning {
    pub channel_capacity: usize,
    pub stream_buffer: usize,
    pub overflow: OverflowPolicy,
    pub reconnect_backoff_secs: u64,
    pub timeout_buffer_secs: u64,
    pub min_report_bytes: u64,
    pub http_timeout_secs: u64,
    pub recent_reasons_capacity: usize,
    pub breaker_threshold: usize,
}

impl Tuning {
    #[must_use]
    pub const fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    #[must_use]
    pub const fn timeout_buffer(&self) -> Duration {
        Duration::from_secs(self.timeout_buffer_secs)
    }

    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            stream_buffer: DEFAULT_STREAM_BUFFER,
            overflow: OverflowPolicy::Drop,
            reconnect_backoff_secs: DEFAULT_RECONNECT_BACKOFF.as_secs(),
            timeout_buffer_secs: DEFAULT_TIMEOUT_BUFFER.as_secs(),
            min_report_bytes: DEFAULT_MIN_REPORT_BYTES,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT.as_secs(),
            recent_reasons_capacity: DEFAULT_RECENT_REASONS_CAPACITY,
            breaker_threshold: DEFAULT_BREAKER_THRESHOLD,
        }
    }
}
