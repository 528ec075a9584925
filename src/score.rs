//! Priority scoring.
//!
//! The score model is a pure function of the task, the store around it and
//! a caller-supplied `now`. Ranking sorts review tasks first, then by score
//! descending, `created_at` ascending and id ascending, so two runs over
//! the same snapshot always pick the same task.

use std::cmp::{Ordering, Reverse};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::TaskStore;
use crate::task::{Milestone, Severity, Task, TaskKind};

/// Score weights per milestone. Earlier milestones score higher so chapters
/// advance breadth-first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MilestoneWeights {
    pub draft: i64,
    pub code_written: i64,
    pub code_tested: i64,
    pub reviewed: i64,
    pub diagrams_complete: i64,
    pub r#final: i64,
}

impl Default for MilestoneWeights {
    fn default() -> Self {
        Self {
            draft: 600,
            code_written: 500,
            code_tested: 400,
            reviewed: 300,
            diagrams_complete: 200,
            r#final: 100,
        }
    }
}

impl MilestoneWeights {
    pub fn weight(&self, milestone: Milestone) -> i64 {
        match milestone {
            Milestone::Draft => self.draft,
            Milestone::CodeWritten => self.code_written,
            Milestone::CodeTested => self.code_tested,
            Milestone::Reviewed => self.reviewed,
            Milestone::DiagramsComplete => self.diagrams_complete,
            Milestone::Final => self.r#final,
        }
    }
}

/// Base score for remediation tasks by finding severity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityWeights {
    pub critical: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            critical: 900,
            high: 700,
            medium: 450,
            low: 150,
        }
    }
}

impl SeverityWeights {
    pub fn weight(&self, severity: Severity) -> i64 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }
}

/// Tunable inputs of the score model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub milestones: MilestoneWeights,
    pub severities: SeverityWeights,
    /// Bonus per non-complete task directly depending on this one.
    pub blocking_weight: i64,
    /// Maximum number of dependents that count toward the bonus.
    pub blocking_cap: u32,
    /// Bonus per full hour since creation.
    pub staleness_per_hour: i64,
    /// Maximum number of hours that count toward staleness.
    pub staleness_cap: i64,
    /// Added to every review task's score so it outranks all content work.
    pub review_floor: i64,
    /// Base score for content tasks that carry no milestone.
    pub content_base: i64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            milestones: MilestoneWeights::default(),
            severities: SeverityWeights::default(),
            blocking_weight: 25,
            blocking_cap: 8,
            staleness_per_hour: 1,
            staleness_cap: 48,
            review_floor: 1_000_000,
            content_base: 250,
        }
    }
}

/// A task paired with the score it was ranked by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ranked {
    pub id: String,
    pub score: i64,
    pub review: bool,
    pub created_at: DateTime<Utc>,
}

/// Deterministic priority function over tasks.
#[derive(Debug, Clone, Default)]
pub struct ScoreModel {
    weights: ScoreWeights,
}

impl ScoreModel {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    /// Score one task.
    pub fn score(&self, task: &Task, store: &TaskStore, now: DateTime<Utc>) -> i64 {
        let w = &self.weights;

        let base = match &task.kind {
            TaskKind::Review { .. } => w.review_floor,
            TaskKind::Remediation { severity, .. } => w.severities.weight(*severity),
            TaskKind::Content => task
                .milestone
                .map(|m| w.milestones.weight(m))
                .unwrap_or(w.content_base),
        };

        let dependents = store.dependents_of(&task.id).len().min(w.blocking_cap as usize) as i64;
        let blocking = dependents.saturating_mul(w.blocking_weight);

        let hours = (now - task.created_at).num_hours().clamp(0, w.staleness_cap.max(0));
        let staleness = hours.saturating_mul(w.staleness_per_hour);

        base.saturating_add(blocking).saturating_add(staleness)
    }

    /// Score and order `ids`, highest priority first.
    ///
    /// Ids missing from the store are skipped.
    pub fn rank(&self, ids: &[String], store: &TaskStore, now: DateTime<Utc>) -> Vec<Ranked> {
        let mut ranked: Vec<Ranked> = ids
            .iter()
            .filter_map(|id| store.get(id).ok())
            .map(|task| Ranked {
                id: task.id.clone(),
                score: self.score(task, store, now),
                review: !task.is_content(),
                created_at: task.created_at,
            })
            .collect();
        ranked.sort_by(compare_ranked);
        ranked
    }
}

fn compare_ranked(a: &Ranked, b: &Ranked) -> Ordering {
    (Reverse(a.review), Reverse(a.score), a.created_at, &a.id).cmp(&(
        Reverse(b.review),
        Reverse(b.score),
        b.created_at,
        &b.id,
    ))
}
