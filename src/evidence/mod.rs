//! Run evidence: an append-only JSON-lines trail of what each scheduler
//! run did, kept next to the state document.
//!
//! ```text
//! .compound/evidence/runs/<run_id>/events.jsonl
//! .compound/evidence/runs/<run_id>/run.json
//! ```

mod event;
mod log;
mod recorder;

use std::env;

pub use event::{EvidenceEvent, EvidenceRecord, RunManifest, EVIDENCE_SCHEMA_VERSION};
pub use log::{EvidenceError, EvidenceLog, EvidenceResult};
pub use recorder::{generate_run_id, RunRecorder};

/// Environment variable for evidence retention period (days).
pub const RETENTION_ENV_VAR: &str = "COMPOUND_EVIDENCE_RETENTION_DAYS";

/// Default retention period in days.
pub const DEFAULT_RETENTION_DAYS: u64 = 30;

/// Retention period from the environment; 0 disables pruning.
pub fn retention_days_from_env() -> u64 {
    env::var(RETENTION_ENV_VAR)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETENTION_DAYS)
}
