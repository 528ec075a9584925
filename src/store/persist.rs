//! Durable storage for the task store and scheduler counters.
//!
//! The state document is a single JSON file written atomically: the new
//! contents go to a sibling temp file which is synced and then renamed over
//! the old one, so a crash leaves either the previous or the next state.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::breaker::CircuitBreakerState;
use crate::store::{StoreError, TaskStore};
use crate::task::Task;

/// Current state document format version.
pub const STATE_VERSION: u32 = 1;

/// Errors raised while loading or saving the state document.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported state version {found} (expected {STATE_VERSION})")]
    UnsupportedVersion { found: u32 },

    /// The document parsed but its tasks do not form a valid store.
    #[error("corrupt state: {0}")]
    Corrupt(#[from] StoreError),

    /// Injected by in-memory test persistence.
    #[error("simulated persistence failure")]
    Simulated,
}

/// Result type for persistence operations.
pub type PersistResult<T> = Result<T, PersistError>;

/// Everything the scheduler needs to resume after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDocument {
    pub version: u32,
    #[serde(default)]
    pub iteration_count: u64,
    #[serde(default)]
    pub breaker: CircuitBreakerState,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            iteration_count: 0,
            breaker: CircuitBreakerState::default(),
            tasks: Vec::new(),
        }
    }
}

impl StateDocument {
    /// Capture the given store and counters.
    pub fn capture(store: &TaskStore, iteration_count: u64, breaker: &CircuitBreakerState) -> Self {
        Self {
            version: STATE_VERSION,
            iteration_count,
            breaker: breaker.clone(),
            tasks: store.snapshot(),
        }
    }

    /// Validate and rebuild the task store.
    pub fn into_parts(self) -> PersistResult<(TaskStore, u64, CircuitBreakerState)> {
        if self.version != STATE_VERSION {
            return Err(PersistError::UnsupportedVersion {
                found: self.version,
            });
        }
        let store = TaskStore::restore(self.tasks)?;
        Ok((store, self.iteration_count, self.breaker))
    }
}

/// Where the scheduler keeps its state between iterations.
pub trait StatePersistence {
    /// Load the last committed document, or `None` if nothing was saved yet.
    fn load(&self) -> PersistResult<Option<StateDocument>>;

    /// Commit a document. Must not return before the write is durable.
    fn save(&mut self, document: &StateDocument) -> PersistResult<()>;
}

/// JSON state file on local disk.
#[derive(Debug, Clone)]
pub struct JsonStateFile {
    path: PathBuf,
}

impl JsonStateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: io::Error) -> PersistError {
        PersistError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StatePersistence for JsonStateFile {
    fn load(&self) -> PersistResult<Option<StateDocument>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.io_err(err)),
        };
        let document: StateDocument = serde_json::from_str(&content)?;
        Ok(Some(document))
    }

    fn save(&mut self, document: &StateDocument) -> PersistResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }

        let json = serde_json::to_string_pretty(document)?;
        let temp_path = self.temp_path();
        let mut file = fs::File::create(&temp_path).map_err(|e| self.io_err(e))?;
        file.write_all(json.as_bytes()).map_err(|e| self.io_err(e))?;
        file.write_all(b"\n").map_err(|e| self.io_err(e))?;
        file.sync_all().map_err(|e| self.io_err(e))?;
        fs::rename(&temp_path, &self.path).map_err(|e| self.io_err(e))?;
        Ok(())
    }
}

/// In-memory persistence for tests and dry runs.
///
/// Clones share the same storage, so a test can keep a handle while the
/// scheduler owns another. `fail_after` makes every save after the given
/// number of successful saves return [`PersistError::Simulated`].
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    document: Option<StateDocument>,
    saves: usize,
    fail_after: Option<usize>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(document: StateDocument) -> Self {
        let state = Self::default();
        state.lock().document = Some(document);
        state
    }

    /// Fail every save once `saves` more saves have succeeded.
    pub fn fail_after(self, saves: usize) -> Self {
        {
            let mut inner = self.lock();
            inner.fail_after = Some(inner.saves + saves);
        }
        self
    }

    /// Last successfully saved (or seeded) document.
    pub fn document(&self) -> Option<StateDocument> {
        self.lock().document.clone()
    }

    pub fn save_count(&self) -> usize {
        self.lock().saves
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StatePersistence for MemoryState {
    fn load(&self) -> PersistResult<Option<StateDocument>> {
        Ok(self.document())
    }

    fn save(&mut self, document: &StateDocument) -> PersistResult<()> {
        let mut inner = self.lock();
        if inner.fail_after.is_some_and(|limit| inner.saves >= limit) {
            return Err(PersistError::Simulated);
        }
        inner.saves += 1;
        inner.document = Some(document.clone());
        Ok(())
    }
}
