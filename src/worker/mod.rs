//! Worker boundary: the component that actually performs a task.
//!
//! The scheduler hands one task at a time to a [`Worker`] and applies the
//! returned [`Outcome`]. A [`WorkerError`] is never fatal to the loop; the
//! scheduler records it as a failed outcome.

mod command;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use command::{CommandWorker, WorkerConfig};

use crate::task::{Milestone, Severity, Task, TaskKind};

/// Errors raised while executing a task.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to spawn worker `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker timed out after {after:?}")]
    Timeout { after: std::time::Duration },

    #[error("worker produced invalid output: {0}")]
    InvalidOutput(String),
}

/// Executes tasks on behalf of the scheduler.
pub trait Worker {
    fn execute(&mut self, task: &Task) -> Result<Outcome, WorkerError>;
}

impl<W: Worker + ?Sized> Worker for Box<W> {
    fn execute(&mut self, task: &Task) -> Result<Outcome, WorkerError> {
        (**self).execute(task)
    }
}

/// A problem reported by a review agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewFinding {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
}

impl ReviewFinding {
    pub fn new(
        file: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            line: None,
            severity,
            description: description.into(),
            chapter: None,
        }
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_chapter(mut self, chapter: impl Into<String>) -> Self {
        self.chapter = Some(chapter.into());
        self
    }

    /// Build the remediation task for this finding.
    ///
    /// `source` is the task that reported it, `iteration` the iteration it
    /// was reported in and `ordinal` its position in that outcome's findings.
    /// A requeued source reporting again gets fresh ids.
    pub fn into_remediation(
        self,
        source: &str,
        iteration: u64,
        ordinal: usize,
        now: DateTime<Utc>,
    ) -> Task {
        let title = match self.line {
            Some(line) => format!("{}:{line}: {}", self.file, self.description),
            None => format!("{}: {}", self.file, self.description),
        };
        let kind = TaskKind::Remediation {
            severity: self.severity,
            source: Some(source.to_string()),
            file: Some(self.file),
            line: self.line,
        };
        let id = remediation_id(source, iteration, ordinal);
        let mut task = Task::new(id, kind, now).with_title(title);
        task.chapter = self.chapter;
        task
    }
}

/// Id of the `ordinal`-th remediation task `source` reported in `iteration`.
pub fn remediation_id(source: &str, iteration: u64, ordinal: usize) -> String {
    format!("fix-{source}-{iteration:04}-{ordinal:02}")
}

/// A follow-up task a worker asks the scheduler to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub id: String,
    #[serde(default)]
    pub chapter: Option<String>,
    #[serde(default)]
    pub milestone: Option<Milestone>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
}

impl NewTask {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            chapter: None,
            milestone: None,
            title: None,
            depends_on: BTreeSet::new(),
        }
    }

    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.depends_on.insert(id.into());
        self
    }

    pub fn into_task(self, now: DateTime<Utc>) -> Task {
        let mut task = Task::new(self.id, TaskKind::Content, now);
        task.chapter = self.chapter;
        task.milestone = self.milestone;
        task.depends_on = self.depends_on;
        if let Some(title) = self.title {
            task.title = title;
        }
        task
    }
}

/// Result of executing one task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub success: bool,
    #[serde(default)]
    pub new_tasks: Vec<NewTask>,
    #[serde(default)]
    pub findings: Vec<ReviewFinding>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_new_task(mut self, task: NewTask) -> Self {
        self.new_tasks.push(task);
        self
    }

    pub fn with_finding(mut self, finding: ReviewFinding) -> Self {
        self.findings.push(finding);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
