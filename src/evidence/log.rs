use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::evidence::event::{EvidenceRecord, RunManifest};

const EVIDENCE_DIR_NAME: &str = "evidence";
const RUNS_DIR_NAME: &str = "runs";
const MANIFEST_FILE_NAME: &str = "run.json";
const EVENTS_FILE_NAME: &str = "events.jsonl";

#[derive(Error, Debug)]
pub enum EvidenceError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid run id {0:?}")]
    InvalidRunId(String),
}

pub type EvidenceResult<T> = Result<T, EvidenceError>;

/// Filesystem-backed evidence log rooted at `<state_dir>/evidence`.
#[derive(Debug, Clone)]
pub struct EvidenceLog {
    root_dir: PathBuf,
    retention_days: u64,
}

impl EvidenceLog {
    /// Open (creating if needed) the evidence log under `state_dir`.
    pub fn open(state_dir: impl AsRef<Path>, retention_days: u64) -> EvidenceResult<Self> {
        let root_dir = state_dir.as_ref().join(EVIDENCE_DIR_NAME);
        fs::create_dir_all(root_dir.join(RUNS_DIR_NAME))?;
        Ok(Self {
            root_dir,
            retention_days,
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root_dir.join(RUNS_DIR_NAME).join(run_id)
    }

    /// Append one record and refresh the run manifest.
    pub fn append(&self, record: &EvidenceRecord) -> EvidenceResult<()> {
        validate_run_id(&record.run_id)?;

        let run_dir = self.run_dir(&record.run_id);
        fs::create_dir_all(&run_dir)?;

        let mut events = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(run_dir.join(EVENTS_FILE_NAME))?;
        writeln!(events, "{}", serde_json::to_string(record)?)?;
        events.sync_all()?;

        let mut manifest = self
            .manifest(&record.run_id)?
            .unwrap_or_else(|| RunManifest::new(record.run_id.clone(), record.recorded_at));
        manifest.record(record.recorded_at);
        self.write_manifest(&run_dir, &manifest)
    }

    /// Read back every record of a run, in append order.
    pub fn records(&self, run_id: &str) -> EvidenceResult<Vec<EvidenceRecord>> {
        validate_run_id(run_id)?;
        let content = match fs::read_to_string(self.run_dir(run_id).join(EVENTS_FILE_NAME)) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(EvidenceError::from))
            .collect()
    }

    pub fn manifest(&self, run_id: &str) -> EvidenceResult<Option<RunManifest>> {
        validate_run_id(run_id)?;
        match fs::read_to_string(self.run_dir(run_id).join(MANIFEST_FILE_NAME)) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete runs created more than the retention period before `now`.
    /// Returns how many runs were removed.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> EvidenceResult<usize> {
        if self.retention_days == 0 {
            return Ok(0);
        }

        let runs_dir = self.root_dir.join(RUNS_DIR_NAME);
        if !runs_dir.exists() {
            return Ok(0);
        }

        let cutoff = now - Duration::days(self.retention_days as i64);
        let mut pruned = 0;
        for entry in fs::read_dir(&runs_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(run_id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            // Skip directories without a readable manifest.
            let Ok(Some(manifest)) = self.manifest(&run_id) else {
                continue;
            };
            if manifest.created_at < cutoff {
                fs::remove_dir_all(entry.path())?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    fn write_manifest(&self, run_dir: &Path, manifest: &RunManifest) -> EvidenceResult<()> {
        let json = serde_json::to_string_pretty(manifest)?;
        let temp_path = run_dir.join(format!("{MANIFEST_FILE_NAME}.tmp"));

        let mut file = fs::File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, run_dir.join(MANIFEST_FILE_NAME))?;
        Ok(())
    }
}

fn validate_run_id(run_id: &str) -> EvidenceResult<()> {
    let bad = run_id.trim().is_empty() || run_id.contains(['/', '\\']) || run_id.starts_with('.');
    if bad {
        Err(EvidenceError::InvalidRunId(run_id.to_string()))
    } else {
        Ok(())
    }
}
