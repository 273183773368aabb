use std::time::Duration;

/// Default capacity of the global cluster-event channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Default capacity of each per-cluster stream buffer.
pub const DEFAULT_STREAM_BUFFER: usize = 100;

/// Default delay before a cluster task retries a failed subscription.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Default wall-clock limit for one agent invocation.
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(900);

/// Extra headroom added on top of the agent timeout before the process
/// group is terminated.
pub const DEFAULT_TIMEOUT_BUFFER: Duration = Duration::from_secs(5);

/// Reports smaller than this are classified as undersized.
pub const DEFAULT_MIN_REPORT_BYTES: u64 = 100;

/// Default timeout applied to webhook and sink HTTP calls.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default capacity of the circuit breaker's recent-reasons ring.
pub const DEFAULT_RECENT_REASONS_CAPACITY: usize = 5;

/// Default consecutive-failure threshold before the breaker opens.
pub const DEFAULT_BREAKER_THRESHOLD: usize = 3;

/// Default lifetime of signed artifact URLs.
pub const DEFAULT_SIGNED_URL_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default health endpoint port. Zero disables the endpoint.
pub const DEFAULT_HEALTH_PORT: u16 = 8080;

/// Default extension of the canonical agent report.
pub const DEFAULT_REPORT_EXT: &str = "md";
