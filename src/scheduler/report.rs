use std::fmt;

use serde::Serialize;

use crate::store::StoreError;

/// Why an iteration dispatched nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleReason {
    /// Nothing is pending with all dependencies complete.
    NoEligibleWork,
    /// Only content work is eligible and the circuit breaker is open.
    CircuitOpen,
}

impl IdleReason {
    pub fn as_label(self) -> &'static str {
        match self {
            IdleReason::NoEligibleWork => "no_eligible_work",
            IdleReason::CircuitOpen => "circuit_open",
        }
    }
}

impl fmt::Display for IdleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdleReason::NoEligibleWork => f.write_str("no eligible work"),
            IdleReason::CircuitOpen => f.write_str("blocked by circuit breaker"),
        }
    }
}

/// One task handed to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchRecord {
    pub task_id: String,
    pub kind: &'static str,
    pub score: i64,
    pub success: bool,
    pub error: Option<String>,
}

/// A worker-requested task or finding that could not be added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedTask {
    pub task_id: String,
    pub reason: String,
}

/// What a single scheduler iteration did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IterationReport {
    pub iteration: u64,
    /// Whether this was a review sweep iteration.
    pub sweep: bool,
    pub dispatched: Vec<DispatchRecord>,
    pub idle: Option<IdleReason>,
    /// Ids of tasks created as a result of this iteration's outcomes.
    pub created: Vec<String>,
    pub rejected: Vec<RejectedTask>,
    #[serde(skip)]
    pub dangling: Vec<StoreError>,
    pub breaker_opened: bool,
}

impl IterationReport {
    pub fn new(iteration: u64) -> Self {
        Self {
            iteration,
            sweep: false,
            dispatched: Vec::new(),
            idle: None,
            created: Vec::new(),
            rejected: Vec::new(),
            dangling: Vec::new(),
            breaker_opened: false,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.idle.is_some()
    }

    pub fn dispatched_ids(&self) -> Vec<&str> {
        self.dispatched.iter().map(|d| d.task_id.as_str()).collect()
    }
}
