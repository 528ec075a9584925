//! Shared fixtures: a scripted worker and seeded in-memory state.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use compound::breaker::CircuitBreakerState;
use compound::scheduler::seed_chapters;
use compound::store::{MemoryState, StateDocument, TaskStore};
use compound::task::Task;
use compound::worker::{Outcome, Worker, WorkerError};

pub fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-03-01T09:00:00Z")
        .expect("timestamp")
        .with_timezone(&Utc)
}

/// Replays queued outcomes in order and records every task it was given.
/// Once the queue is empty every task succeeds.
#[derive(Clone, Default)]
pub struct ScriptedWorker {
    outcomes: Arc<Mutex<VecDeque<Outcome>>>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl ScriptedWorker {
    pub fn new(outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(outcomes.into_iter().collect())),
            seen: Arc::default(),
        }
    }

    pub fn failing(count: usize) -> Self {
        Self::new((0..count).map(|i| Outcome::failure(format!("failure {}", i + 1))))
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().expect("seen lock").clone()
    }
}

impl Worker for ScriptedWorker {
    fn execute(&mut self, task: &Task) -> Result<Outcome, WorkerError> {
        self.seen.lock().expect("seen lock").push(task.id.clone());
        let next = self.outcomes.lock().expect("outcome lock").pop_front();
        Ok(next.unwrap_or_else(Outcome::success))
    }
}

/// In-memory state holding one draft task per chapter.
pub fn seeded_state(chapters: &[&str]) -> MemoryState {
    let mut store = TaskStore::new();
    seed_chapters(&mut store, chapters.iter().copied(), t0()).expect("seed chapters");
    MemoryState::with_document(StateDocument::capture(
        &store,
        0,
        &CircuitBreakerState::default(),
    ))
}
