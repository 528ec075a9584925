//! Consecutive-failure circuit breaker.
//!
//! After `threshold` consecutive failed iterations the breaker opens and the
//! scheduler stops dispatching content tasks. Review tasks are never gated.
//! Any successful dispatch closes it again.

use serde::{Deserialize, Serialize};

/// Default number of consecutive failures before the breaker opens.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Persisted breaker state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerState {
    pub consecutive_failures: u32,
    pub threshold: u32,
    pub open: bool,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

impl CircuitBreakerState {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive_failures: 0,
            threshold,
            open: false,
        }
    }

    /// Record the result of one iteration's dispatch.
    ///
    /// Returns `true` when this call moved the breaker from closed to open.
    /// A threshold of 0 opens on the first failure.
    pub fn record_outcome(&mut self, success: bool) -> bool {
        if success {
            self.reset();
            return false;
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let was_open = self.open;
        if self.consecutive_failures >= self.threshold.max(1) {
            self.open = true;
        }
        !was_open && self.open
    }

    /// Whether content tasks may be dispatched.
    pub fn can_dispatch_content_task(&self) -> bool {
        !self.open
    }

    /// Close the breaker and clear the failure count.
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.open = false;
    }

    /// Adopt a new threshold, re-evaluating the open flag against it.
    pub fn set_threshold(&mut self, threshold: u32) {
        self.threshold = threshold;
        if self.consecutive_failures > 0 && self.consecutive_failures >= threshold.max(1) {
            self.open = true;
        }
    }
}
