//! Review sweep cadence.

use crate::task::{ReviewAgent, Task, TaskKind};
use chrono::{DateTime, Utc};

/// Default number of iterations between review sweeps.
pub const DEFAULT_REVIEW_PERIOD: u64 = 6;

/// Whether `iteration` is a review sweep iteration.
///
/// Iterations are counted from 1. A period of 0 disables sweeps.
pub fn should_run_review_sweep(iteration: u64, period: u64) -> bool {
    period > 0 && iteration > 0 && iteration % period == 0
}

/// Id of the review task an agent runs in a given sweep.
pub fn review_task_id(iteration: u64, agent: ReviewAgent) -> String {
    format!("review-{iteration:04}-{agent}")
}

/// Build the review task for one agent in the sweep at `iteration`.
pub fn review_task(iteration: u64, agent: ReviewAgent, now: DateTime<Utc>) -> Task {
    Task::new(review_task_id(iteration, agent), TaskKind::Review { agent }, now)
        .with_title(format!("review sweep {iteration}: {agent}"))
}
