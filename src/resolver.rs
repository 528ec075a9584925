//! Dependency resolution: which tasks can run right now.

use std::collections::BTreeMap;

use crate::store::StoreError;
use crate::task::{Task, TaskStatus};

/// Result of one resolution pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Ids of runnable tasks, ordered by id.
    pub eligible: Vec<String>,
    /// One `DanglingDependency` per (task, missing id) pair.
    pub dangling: Vec<StoreError>,
}

impl Resolution {
    pub fn is_idle(&self) -> bool {
        self.eligible.is_empty()
    }
}

/// Compute the eligible set over `tasks`.
///
/// A task is eligible when it is `pending` (or was already promoted to
/// `eligible`) and every dependency is `complete`. A dependency that is not
/// among `tasks` keeps the dependent out of the set and is reported instead.
pub fn eligible<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Resolution {
    let by_id: BTreeMap<&str, &Task> = tasks.into_iter().map(|t| (t.id.as_str(), t)).collect();
    let mut resolution = Resolution::default();

    for task in by_id.values() {
        if !matches!(task.status, TaskStatus::Pending | TaskStatus::Eligible) {
            continue;
        }

        let mut ready = true;
        for dep in &task.depends_on {
            match by_id.get(dep.as_str()) {
                Some(dep_task) if dep_task.status == TaskStatus::Complete => {}
                Some(_) => ready = false,
                None => {
                    ready = false;
                    resolution.dangling.push(StoreError::DanglingDependency {
                        task: task.id.clone(),
                        missing: dep.clone(),
                    });
                }
            }
        }

        if ready {
            resolution.eligible.push(task.id.clone());
        }
    }

    resolution
}
