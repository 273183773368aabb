use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
}

/// Point-in-time view of the failure streak, attached to degraded and
/// recovered alerts.
#[derive(Clone, Debug)]
pub struct BreakerStats {
    pub consecutive_failures: usize,
    pub window: Duration,
    pub recent_reasons: Vec<String>,
}

/// Counts consecutive agent failures and raises edge-triggered degraded /
/// recovered signals. All calls come from the serialized pipeline receiver,
/// one per incident.
#[derive(Debug)]
pub struct FailureBreaker {
    threshold: usize,
    count: usize,
    window_start: Option<Instant>,
    recent_reasons: VecDeque<String>,
    reasons_capacity: usize,
    state: BreakerState,
}

impl FailureBreaker {
    #[must_use]
    pub fn new(threshold: usize, reasons_capacity: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            count: 0,
            window_start: None,
            recent_reasons: VecDeque::with_capacity(reasons_capacity),
            reasons_capacity: reasons_capacity.max(1),
            state: BreakerState::Closed,
        }
    }

    /// Record one failed incident. Returns `true` exactly when this failure
    /// crosses the threshold and the breaker transitions closed → open.
    pub fn record_failure(&mut self, reason: &str) -> bool {
        self.count += 1;
        if self.window_start.is_none() {
            self.window_start = Some(Instant::now());
        }
        if self.recent_reasons.len() == self.reasons_capacity {
            self.recent_reasons.pop_front();
        }
        self.recent_reasons.push_back(reason.to_owned());

        if self.state == BreakerState::Closed && self.count == self.threshold {
            self.state = BreakerState::Open;
            warn!(
                consecutive_failures = self.count,
                threshold = self.threshold,
                "failure threshold reached, suppressing per-incident alerts"
            );
            return true;
        }
        false
    }

    /// Record one successful incident. Returns `true` exactly when the
    /// breaker was open and transitions back to closed.
    pub fn record_success(&mut self) -> bool {
        let was_open = self.state == BreakerState::Open;
        if was_open {
            info!(
                consecutive_failures = self.count,
                "agent recovered, resuming per-incident alerts"
            );
        }
        self.count = 0;
        self.window_start = None;
        self.recent_reasons.clear();
        self.state = BreakerState::Closed;
        was_open
    }

    #[must_use]
    pub fn stats(&self) -> BreakerStats {
        BreakerStats {
            consecutive_failures: self.count,
            window: self
                .window_start
                .map_or(Duration::ZERO, |start| start.elapsed()),
            recent_reasons: self.recent_reasons.iter().cloned().collect(),
        }
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.state, BreakerState::Open)
    }
}
