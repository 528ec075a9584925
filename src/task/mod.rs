//! Task model for the orchestration engine.
//!
//! A [`Task`] is one unit of work the scheduler hands to a worker: a chapter
//! milestone, a review agent run, or a remediation fix spawned from a review
//! finding. Tasks are persisted in the state document with camelCase field
//! names so progress tooling can read them directly.

mod kind;

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub use kind::{ReviewAgent, Severity, TaskKind};

/// Ordered stages of a chapter's completion pipeline.
///
/// The derive order is the pipeline order, so `Milestone::Draft <
/// Milestone::Final` holds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum Milestone {
    Draft,
    CodeWritten,
    CodeTested,
    Reviewed,
    DiagramsComplete,
    Final,
}

impl Milestone {
    /// All milestones in pipeline order.
    pub const ALL: [Milestone; 6] = [
        Milestone::Draft,
        Milestone::CodeWritten,
        Milestone::CodeTested,
        Milestone::Reviewed,
        Milestone::DiagramsComplete,
        Milestone::Final,
    ];

    /// Zero-based position in the pipeline.
    pub fn index(self) -> usize {
        self as usize
    }

    /// The milestone that follows this one, or `None` after `Final`.
    pub fn next(self) -> Option<Milestone> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// The milestone that precedes this one, or `None` for `Draft`.
    pub fn previous(self) -> Option<Milestone> {
        self.index().checked_sub(1).map(|i| Self::ALL[i])
    }

    /// Stable snake_case label, matching the serialized form.
    pub fn as_label(self) -> &'static str {
        match self {
            Milestone::Draft => "draft",
            Milestone::CodeWritten => "code_written",
            Milestone::CodeTested => "code_tested",
            Milestone::Reviewed => "reviewed",
            Milestone::DiagramsComplete => "diagrams_complete",
            Milestone::Final => "final",
        }
    }
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Lifecycle status of a task.
///
/// ```text
/// pending ──> eligible ──> in_progress ──> complete
///    ^                          │
///    └──────── failed <─────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Eligible,
    InProgress,
    Complete,
    Failed,
}

impl TaskStatus {
    /// Whether `self -> next` is a legal status change for a regular update.
    ///
    /// `in_progress -> pending` is deliberately absent; only crash
    /// reconciliation may perform it.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Eligible)
                | (TaskStatus::Eligible, TaskStatus::InProgress)
                | (TaskStatus::InProgress, TaskStatus::Complete)
                | (TaskStatus::InProgress, TaskStatus::Failed)
                | (TaskStatus::Failed, TaskStatus::Pending)
        )
    }

    /// Whether the status is terminal for this task instance.
    pub fn is_terminal(self) -> bool {
        self == TaskStatus::Complete
    }

    pub fn as_label(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Eligible => "eligible",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Complete => "complete",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// A single unit of schedulable work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique, stable identifier.
    pub id: String,
    /// Chapter this task belongs to; `None` for cross-cutting work.
    pub chapter: Option<String>,
    /// Pipeline stage for content tasks; `None` for review and remediation tasks.
    #[serde(default)]
    pub milestone: Option<Milestone>,
    /// What kind of work this is.
    #[serde(default)]
    pub kind: TaskKind,
    /// Human-readable label.
    #[serde(default)]
    pub title: String,
    /// Ids of tasks that must be complete before this one is eligible.
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    /// Last priority assigned by the score model.
    #[serde(default)]
    pub score: i64,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Number of times this task has been marked failed.
    #[serde(default)]
    pub failures: u32,
    /// Message from the most recent failure.
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Task {
    /// Create a pending task with no dependencies.
    pub fn new(id: impl Into<String>, kind: TaskKind, now: DateTime<Utc>) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            chapter: None,
            milestone: None,
            kind,
            depends_on: BTreeSet::new(),
            score: 0,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            failures: 0,
            last_error: None,
        }
    }

    /// Create the content task for a chapter milestone.
    ///
    /// Ids follow `<chapter>-<milestone>`, which keeps them stable across runs.
    pub fn milestone(chapter: &str, milestone: Milestone, now: DateTime<Utc>) -> Self {
        let mut task = Self::new(Self::milestone_id(chapter, milestone), TaskKind::Content, now);
        task.chapter = Some(chapter.to_string());
        task.milestone = Some(milestone);
        task.title = format!("{chapter}: {milestone}");
        task
    }

    /// Id used for a chapter's milestone task.
    pub fn milestone_id(chapter: &str, milestone: Milestone) -> String {
        format!("{chapter}-{milestone}")
    }

    pub fn with_chapter(mut self, chapter: impl Into<String>) -> Self {
        self.chapter = Some(chapter.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.depends_on.insert(id.into());
        self
    }

    /// Whether the circuit breaker gates this task.
    pub fn is_content(&self) -> bool {
        !matches!(self.kind, TaskKind::Review { .. })
    }
}

/// Partial update applied through `TaskStore::update`.
///
/// `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub milestone: Option<Milestone>,
    pub depends_on: Option<BTreeSet<String>>,
    pub score: Option<i64>,
    pub title: Option<String>,
    /// Failure message recorded when `status` becomes `failed`.
    pub error: Option<String>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Failed),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn score(score: i64) -> Self {
        Self {
            score: Some(score),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
