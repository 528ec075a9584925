//! Task store: the single source of truth for every task.
//!
//! All mutations validate first and apply second, so a rejected call never
//! leaves a partially updated store behind. Durable storage of the store's
//! snapshot lives in [`persist`].

mod error;
pub mod persist;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use petgraph::algo::{has_path_connecting, is_cyclic_directed};
use petgraph::graphmap::DiGraphMap;

pub use error::{StoreError, StoreResult};
pub use persist::{
    JsonStateFile, MemoryState, PersistError, PersistResult, StateDocument, StatePersistence,
    STATE_VERSION,
};

use crate::task::{Task, TaskPatch, TaskStatus};

/// In-memory task store keyed by task id.
///
/// Tasks are kept in a `BTreeMap` so every listing is ordered by id, which
/// keeps scheduler decisions reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskStore {
    tasks: BTreeMap<String, Task>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a persisted snapshot.
    ///
    /// Unlike `create`, this accepts tasks in any order, then rejects
    /// duplicate ids and any cycle in the combined graph.
    pub fn restore(tasks: Vec<Task>) -> StoreResult<Self> {
        let mut map = BTreeMap::new();
        for task in tasks {
            if map.contains_key(&task.id) {
                return Err(StoreError::DuplicateId(task.id));
            }
            map.insert(task.id.clone(), task);
        }

        let store = Self { tasks: map };
        if let Some(err) = store.find_cycle() {
            return Err(err);
        }
        Ok(store)
    }

    /// Name one edge that sits on a cycle, if the graph has any.
    fn find_cycle(&self) -> Option<StoreError> {
        let graph = self.dependency_graph(None);
        if !is_cyclic_directed(&graph) {
            return None;
        }
        self.tasks.values().find_map(|task| {
            task.depends_on
                .iter()
                .find(|dep| {
                    *dep == &task.id || has_path_connecting(&graph, dep.as_str(), &task.id, None)
                })
                .map(|dep| StoreError::CyclicDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                })
        })
    }

    /// Insert a new task.
    ///
    /// # Errors
    ///
    /// - `DuplicateId` if a task with the same id exists.
    /// - `CyclicDependency` if any dependency can already reach the new task.
    /// - `OutOfOrderMilestone` / `DuplicateMilestone` if a chapter milestone
    ///   task would break the chapter's pipeline order.
    pub fn create(&mut self, task: Task) -> StoreResult<&Task> {
        if self.tasks.contains_key(&task.id) {
            return Err(StoreError::DuplicateId(task.id));
        }
        self.check_acyclic(&task.id, &task.depends_on)?;
        self.check_milestone_order(&task)?;

        let id = task.id.clone();
        self.tasks.insert(id.clone(), task);
        self.get(&id)
    }

    pub fn get(&self, id: &str) -> StoreResult<&Task> {
        self.tasks
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    /// Apply a partial update.
    ///
    /// Entering `failed` increments the task's failure count and records the
    /// patch's error message. `updated_at` moves to `now` unless the patch
    /// only carries a new score.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown id.
    /// - `InvalidTransition` for an illegal status change or a milestone
    ///   moving backward.
    /// - `CyclicDependency` if new dependencies would close a cycle.
    /// - `OutOfOrderMilestone` / `DuplicateMilestone` if a new milestone or
    ///   dependency set would break the chapter's pipeline order.
    pub fn update(&mut self, id: &str, patch: TaskPatch, now: DateTime<Utc>) -> StoreResult<&Task> {
        let current = self.get(id)?;
        let mut next = current.clone();

        if let Some(status) = patch.status {
            if !current.status.can_transition_to(status) {
                return Err(StoreError::InvalidTransition {
                    id: id.to_string(),
                    from: current.status.to_string(),
                    to: status.to_string(),
                });
            }
            next.status = status;
            if status == TaskStatus::Failed {
                next.failures = next.failures.saturating_add(1);
                next.last_error = Some(patch.error.clone().unwrap_or_else(|| "failed".to_string()));
            }
        }

        if let Some(milestone) = patch.milestone {
            if let Some(existing) = current.milestone {
                if milestone < existing {
                    return Err(StoreError::InvalidTransition {
                        id: id.to_string(),
                        from: existing.to_string(),
                        to: milestone.to_string(),
                    });
                }
            }
            next.milestone = Some(milestone);
        }

        if let Some(depends_on) = &patch.depends_on {
            self.check_acyclic(id, depends_on)?;
            next.depends_on = depends_on.clone();
        }

        if patch.milestone.is_some() || patch.depends_on.is_some() {
            self.check_milestone_order(&next)?;
        }

        if let Some(title) = &patch.title {
            next.title = title.clone();
        }
        if let Some(score) = patch.score {
            next.score = score;
        }

        let score_only = patch.score.is_some()
            && TaskPatch {
                score: None,
                ..patch
            } == TaskPatch::default();
        if !score_only {
            next.updated_at = now;
        }

        self.tasks.insert(id.to_string(), next);
        self.get(id)
    }

    /// Move a failed task back to `pending` for another attempt.
    ///
    /// The failure count is kept; only the status changes.
    pub fn requeue(&mut self, id: &str, now: DateTime<Utc>) -> StoreResult<&Task> {
        self.update(id, TaskPatch::status(TaskStatus::Pending), now)
    }

    /// Delete a task. Tasks depending on it become dangling.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` if the task is currently in progress.
    pub fn remove(&mut self, id: &str) -> StoreResult<Task> {
        let task = self.get(id)?;
        if task.status == TaskStatus::InProgress {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: task.status.to_string(),
                to: "removed".to_string(),
            });
        }
        self.tasks
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Reset every `in_progress` task to `pending`.
    ///
    /// Only valid at scheduler start: with a single sequential scheduler, an
    /// `in_progress` task on startup means the previous dispatch was
    /// interrupted. Returns the ids that were reset.
    pub fn reset_interrupted(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut reset = Vec::new();
        for task in self.tasks.values_mut() {
            if task.status == TaskStatus::InProgress {
                task.status = TaskStatus::Pending;
                task.updated_at = now;
                reset.push(task.id.clone());
            }
        }
        reset
    }

    pub fn list_by_status(&self, status: TaskStatus) -> Vec<&Task> {
        self.tasks.values().filter(|t| t.status == status).collect()
    }

    pub fn list_by_chapter(&self, chapter: &str) -> Vec<&Task> {
        self.tasks
            .values()
            .filter(|t| t.chapter.as_deref() == Some(chapter))
            .collect()
    }

    /// Non-complete tasks that list `id` among their dependencies.
    pub fn dependents_of(&self, id: &str) -> Vec<&Task> {
        self.tasks
            .values()
            .filter(|t| t.status != TaskStatus::Complete && t.depends_on.contains(id))
            .collect()
    }

    /// Distinct chapters referenced by any task.
    pub fn chapters(&self) -> BTreeSet<&str> {
        self.tasks.values().filter_map(|t| t.chapter.as_deref()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Owned copy of every task, ordered by id.
    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks.values().cloned().collect()
    }

    /// Build the `task -> dependency` graph, leaving out the outgoing edges
    /// of `exclude` (the task whose dependencies are being replaced).
    fn dependency_graph(&self, exclude: Option<&str>) -> DiGraphMap<&str, ()> {
        let mut graph = DiGraphMap::new();
        for task in self.tasks.values() {
            graph.add_node(task.id.as_str());
            if Some(task.id.as_str()) == exclude {
                continue;
            }
            for dep in &task.depends_on {
                graph.add_edge(task.id.as_str(), dep.as_str(), ());
            }
        }
        graph
    }

    /// Reject `id -> deps` if any dependency already reaches `id`.
    fn check_acyclic(&self, id: &str, deps: &BTreeSet<String>) -> StoreResult<()> {
        let mut graph = self.dependency_graph(Some(id));
        graph.add_node(id);
        for dep in deps {
            if dep == id {
                return Err(StoreError::CyclicDependency {
                    task: id.to_string(),
                    dependency: dep.clone(),
                });
            }
            graph.add_node(dep.as_str());
            if has_path_connecting(&graph, dep.as_str(), id, None) {
                return Err(StoreError::CyclicDependency {
                    task: id.to_string(),
                    dependency: dep.clone(),
                });
            }
        }
        Ok(())
    }

    /// A chapter's milestone task must depend on the chapter's previous
    /// milestone task, and a chapter has at most one task per milestone.
    ///
    /// A stored task with the same id is ignored, so an updated copy is
    /// checked against its siblings only.
    fn check_milestone_order(&self, task: &Task) -> StoreResult<()> {
        let (Some(chapter), Some(milestone)) = (task.chapter.as_deref(), task.milestone) else {
            return Ok(());
        };

        let siblings: Vec<&Task> = self
            .list_by_chapter(chapter)
            .into_iter()
            .filter(|t| t.id != task.id)
            .collect();
        if let Some(existing) = siblings.iter().find(|t| t.milestone == Some(milestone)) {
            return Err(StoreError::DuplicateMilestone {
                chapter: chapter.to_string(),
                milestone,
                existing: existing.id.clone(),
            });
        }

        let Some(previous) = milestone.previous() else {
            return Ok(());
        };
        let linked = siblings
            .iter()
            .any(|t| t.milestone == Some(previous) && task.depends_on.contains(&t.id));
        if linked {
            Ok(())
        } else {
            Err(StoreError::OutOfOrderMilestone {
                chapter: chapter.to_string(),
                milestone,
                previous,
            })
        }
    }
}
