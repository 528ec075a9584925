//! Layered configuration.
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults
//! 2. `compound.toml` in the working directory, or the file given with `--config`
//! 3. `COMPOUND__*` environment variables, `__` separating nested keys
//!    (`COMPOUND__BREAKER__THRESHOLD=3`, `COMPOUND__WORKER__PROGRAM=./agent.sh`)

use std::path::{Path, PathBuf};

use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::breaker::DEFAULT_FAILURE_THRESHOLD;
use crate::cadence::DEFAULT_REVIEW_PERIOD;
use crate::scheduler::SchedulerConfig;
use crate::score::ScoreWeights;
use crate::task::ReviewAgent;
use crate::worker::WorkerConfig;

/// Config file read from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "compound.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "COMPOUND";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Default: 5
    pub threshold: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewSettings {
    /// Iterations between sweeps; 0 disables them.
    /// Default: 6
    pub period: u64,
    pub agents: Vec<ReviewAgent>,
}

impl Default for ReviewSettings {
    fn default() -> Self {
        Self {
            period: DEFAULT_REVIEW_PERIOD,
            agents: ReviewAgent::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceSettings {
    pub enabled: bool,
}

impl Default for EvidenceSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Effective configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// State document location.
    /// Default: ".compound/tasks.json"
    pub state_path: PathBuf,
    pub breaker: BreakerSettings,
    pub review: ReviewSettings,
    pub score: ScoreWeights,
    pub worker: WorkerConfig,
    pub evidence: EvidenceSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from(".compound/tasks.json"),
            breaker: BreakerSettings::default(),
            review: ReviewSettings::default(),
            score: ScoreWeights::default(),
            worker: WorkerConfig::default(),
            evidence: EvidenceSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from all layers.
    ///
    /// An explicit `config_file` must exist; the implicit `compound.toml`
    /// is optional.
    pub fn load(config_file: Option<&Path>) -> Result<Self, SettingsError> {
        let file = match config_file {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("review.agents")
                    .with_list_parse_key("worker.args"),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Directory holding the state document and evidence.
    pub fn state_dir(&self) -> PathBuf {
        match self.state_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::default()
            .with_breaker_threshold(self.breaker.threshold)
            .with_review_period(self.review.period)
            .with_review_agents(self.review.agents.clone())
            .with_weights(self.score.clone())
    }

    pub fn to_toml(&self) -> Result<String, SettingsError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
