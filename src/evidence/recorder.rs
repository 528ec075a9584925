use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::evidence::event::{EvidenceEvent, EvidenceRecord};
use crate::evidence::log::{EvidenceLog, EvidenceResult};

/// Records one run's events. Write failures are logged and swallowed so
/// evidence can never stop the scheduler.
#[derive(Debug)]
pub struct RunRecorder {
    run_id: String,
    log: EvidenceLog,
}

impl RunRecorder {
    pub fn open(
        state_dir: &Path,
        run_id: impl Into<String>,
        retention_days: u64,
    ) -> EvidenceResult<Self> {
        Ok(Self {
            run_id: run_id.into(),
            log: EvidenceLog::open(state_dir, retention_days)?,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn log(&self) -> &EvidenceLog {
        &self.log
    }

    pub fn record(&mut self, event: EvidenceEvent, at: DateTime<Utc>) {
        let label = event.as_label();
        let record = EvidenceRecord::new(self.run_id.clone(), event, at);
        if let Err(err) = self.log.append(&record) {
            warn!(
                run_id = %self.run_id,
                event = label,
                dir = %self.log.root_dir().display(),
                "failed to write evidence: {err}"
            );
        }
    }

    /// Apply retention, logging instead of failing.
    pub fn prune(&self, now: DateTime<Utc>) {
        match self.log.prune_expired(now) {
            Ok(0) => {}
            Ok(n) => tracing::debug!(pruned = n, "pruned expired evidence runs"),
            Err(err) => warn!("evidence retention failed: {err}"),
        }
    }
}

/// `run-<unix millis>-<pid>`.
pub fn generate_run_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("run-{}-{}", millis, std::process::id())
}
