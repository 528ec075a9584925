use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current evidence schema version.
pub const EVIDENCE_SCHEMA_VERSION: u32 = 1;

/// Something the scheduler did that is worth keeping after the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EvidenceEvent {
    RunStart {
        iteration: u64,
    },
    Dispatch {
        iteration: u64,
        task_id: String,
        kind: String,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ReviewSweep {
        iteration: u64,
        tasks: Vec<String>,
    },
    Idle {
        iteration: u64,
        reason: String,
    },
    BreakerOpened {
        iteration: u64,
        consecutive_failures: u32,
    },
    RunComplete {
        iterations: u64,
        status: String,
    },
}

impl EvidenceEvent {
    pub fn as_label(&self) -> &'static str {
        match self {
            EvidenceEvent::RunStart { .. } => "run_start",
            EvidenceEvent::Dispatch { .. } => "dispatch",
            EvidenceEvent::ReviewSweep { .. } => "review_sweep",
            EvidenceEvent::Idle { .. } => "idle",
            EvidenceEvent::BreakerOpened { .. } => "breaker_opened",
            EvidenceEvent::RunComplete { .. } => "run_complete",
        }
    }
}

/// One line of `events.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub schema_version: u32,
    pub run_id: String,
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: EvidenceEvent,
}

impl EvidenceRecord {
    pub fn new(
        run_id: impl Into<String>,
        event: EvidenceEvent,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            schema_version: EVIDENCE_SCHEMA_VERSION,
            run_id: run_id.into(),
            recorded_at,
            event,
        }
    }
}

/// `run.json`: per-run summary rewritten after every append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    pub schema_version: u32,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub record_count: u64,
}

impl RunManifest {
    pub fn new(run_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            schema_version: EVIDENCE_SCHEMA_VERSION,
            run_id: run_id.into(),
            created_at: timestamp,
            updated_at: timestamp,
            record_count: 0,
        }
    }

    pub fn record(&mut self, timestamp: DateTime<Utc>) {
        self.updated_at = timestamp;
        self.record_count = self.record_count.saturating_add(1);
    }
}
