use thiserror::Error;

use crate::task::Milestone;

/// Validation errors raised by `TaskStore`.
///
/// A call that returns one of these leaves the store exactly as it was.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("task {0} already exists")]
    DuplicateId(String),

    #[error("task {0} not found")]
    NotFound(String),

    /// Adding `task -> dependency` would close a cycle in the dependency graph.
    #[error("task {task} cannot depend on {dependency}: dependency cycle")]
    CyclicDependency { task: String, dependency: String },

    /// `task` depends on an id that is not in the store.
    #[error("task {task} depends on missing task {missing}")]
    DanglingDependency { task: String, missing: String },

    #[error("task {id}: invalid transition {from} -> {to}")]
    InvalidTransition { id: String, from: String, to: String },

    /// A milestone task was created without depending on the chapter's previous milestone.
    #[error("chapter {chapter}: {milestone} must depend on the chapter's {previous} task")]
    OutOfOrderMilestone {
        chapter: String,
        milestone: Milestone,
        previous: Milestone,
    },

    #[error("chapter {chapter} already has a {milestone} task ({existing})")]
    DuplicateMilestone {
        chapter: String,
        milestone: Milestone,
        existing: String,
    },
}

/// Result type for task store operations.
pub type StoreResult<T> = Result<T, StoreError>;
