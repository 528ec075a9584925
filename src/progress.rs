//! Progress summary computed from the state document.
//!
//! Everything here is a pure read of committed state, so `compound status`
//! can run while a scheduler is active in another process.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use owo_colors::OwoColorize;
use serde::Serialize;

use crate::breaker::CircuitBreakerState;
use crate::store::StateDocument;
use crate::task::{Milestone, Severity, Task, TaskKind, TaskStatus};

/// Completion of one milestone across all chapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MilestoneProgress {
    pub milestone: Milestone,
    pub completed: usize,
    pub chapters: usize,
    pub percent: u32,
}

/// Where one chapter stands in its pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChapterProgress {
    pub chapter: String,
    pub completed_milestones: usize,
    /// Furthest milestone with a task, and that task's status.
    pub current: Option<Milestone>,
    pub status: Option<TaskStatus>,
}

/// Breaker condition as shown to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BreakerHealth {
    Stable,
    Degraded { failures: u32, threshold: u32 },
    Open { failures: u32, threshold: u32 },
}

impl BreakerHealth {
    pub fn from_state(state: &CircuitBreakerState) -> Self {
        if state.open {
            BreakerHealth::Open {
                failures: state.consecutive_failures,
                threshold: state.threshold,
            }
        } else if state.consecutive_failures > 0 {
            BreakerHealth::Degraded {
                failures: state.consecutive_failures,
                threshold: state.threshold,
            }
        } else {
            BreakerHealth::Stable
        }
    }
}

impl fmt::Display for BreakerHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerHealth::Stable => write!(f, "Circuit Breaker: Stable (no consecutive failures)"),
            BreakerHealth::Degraded { failures, threshold } => {
                write!(f, "Circuit Breaker: Degraded ({failures}/{threshold})")
            }
            BreakerHealth::Open { failures, threshold } => {
                write!(f, "Circuit Breaker: Open ({failures}/{threshold}, content dispatch paused)")
            }
        }
    }
}

/// Snapshot of overall progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSummary {
    pub iteration_count: u64,
    pub milestones: Vec<MilestoneProgress>,
    pub chapters: Vec<ChapterProgress>,
    pub status_counts: BTreeMap<TaskStatus, usize>,
    pub open_remediation: BTreeMap<Severity, usize>,
    pub breaker: BreakerHealth,
    /// `None` when review sweeps are disabled.
    pub iterations_until_sweep: Option<u64>,
}

impl ProgressSummary {
    pub fn from_document(document: &StateDocument, review_period: u64) -> Self {
        let tasks = &document.tasks;

        let mut by_chapter: BTreeMap<&str, Vec<&Task>> = BTreeMap::new();
        for task in tasks.iter().filter(|t| t.kind == TaskKind::Content) {
            if let (Some(chapter), Some(_)) = (task.chapter.as_deref(), task.milestone) {
                by_chapter.entry(chapter).or_default().push(task);
            }
        }

        let chapter_count = by_chapter.len();
        let milestones = Milestone::ALL
            .into_iter()
            .map(|milestone| {
                let completed = by_chapter
                    .values()
                    .filter(|tasks| {
                        tasks
                            .iter()
                            .any(|t| {
                                t.milestone == Some(milestone) && t.status == TaskStatus::Complete
                            })
                    })
                    .count();
                MilestoneProgress {
                    milestone,
                    completed,
                    chapters: chapter_count,
                    percent: percent(completed, chapter_count),
                }
            })
            .collect();

        let chapters = by_chapter
            .iter()
            .map(|(chapter, tasks)| {
                let furthest = tasks.iter().max_by_key(|t| t.milestone);
                ChapterProgress {
                    chapter: chapter.to_string(),
                    completed_milestones: tasks
                        .iter()
                        .filter(|t| t.status == TaskStatus::Complete)
                        .count(),
                    current: furthest.and_then(|t| t.milestone),
                    status: furthest.map(|t| t.status),
                }
            })
            .collect();

        let mut status_counts = BTreeMap::new();
        for task in tasks {
            *status_counts.entry(task.status).or_insert(0) += 1;
        }

        let mut open_remediation = BTreeMap::new();
        for task in tasks.iter().filter(|t| t.status != TaskStatus::Complete) {
            if let TaskKind::Remediation { severity, .. } = task.kind {
                *open_remediation.entry(severity).or_insert(0) += 1;
            }
        }

        Self {
            iteration_count: document.iteration_count,
            milestones,
            chapters,
            status_counts,
            open_remediation,
            breaker: BreakerHealth::from_state(&document.breaker),
            iterations_until_sweep: iterations_until_sweep(document.iteration_count, review_period),
        }
    }

    /// Human-readable report; `color` enables ANSI styling.
    pub fn render(&self, color: bool) -> String {
        let mut out = String::new();
        let heading = |text: &str| {
            if color {
                text.bold().to_string()
            } else {
                text.to_string()
            }
        };

        let _ = writeln!(out, "{}", heading("Milestones"));
        for m in &self.milestones {
            let _ = writeln!(
                out,
                "  {:<18} {:>3}%  ({}/{})",
                m.milestone.as_label(),
                m.percent,
                m.completed,
                m.chapters
            );
        }

        let _ = writeln!(out, "{}", heading("Chapters"));
        for c in &self.chapters {
            let current = c.current.map_or("-", Milestone::as_label);
            let status = c.status.map_or("-", TaskStatus::as_label);
            let _ = writeln!(
                out,
                "  {:<10} {}/{}  {} ({})",
                c.chapter,
                c.completed_milestones,
                Milestone::ALL.len(),
                current,
                status
            );
        }

        let _ = writeln!(out, "{}", heading("Tasks"));
        let counts: Vec<String> = self
            .status_counts
            .iter()
            .map(|(status, n)| format!("{status}: {n}"))
            .collect();
        let counts = if counts.is_empty() {
            "none".to_string()
        } else {
            counts.join(", ")
        };
        let _ = writeln!(out, "  {counts}");

        if !self.open_remediation.is_empty() {
            let open: Vec<String> = self
                .open_remediation
                .iter()
                .rev()
                .map(|(severity, n)| format!("{severity}: {n}"))
                .collect();
            let _ = writeln!(out, "  open remediation: {}", open.join(", "));
        }

        let breaker = self.breaker.to_string();
        let breaker = match (color, self.breaker) {
            (false, _) => breaker,
            (true, BreakerHealth::Stable) => breaker.green().to_string(),
            (true, BreakerHealth::Degraded { .. }) => breaker.yellow().to_string(),
            (true, BreakerHealth::Open { .. }) => breaker.red().to_string(),
        };
        let _ = writeln!(out, "{breaker}");

        let _ = writeln!(out, "Iterations: {}", self.iteration_count);
        match self.iterations_until_sweep {
            Some(n) => {
                let _ = writeln!(out, "Next review sweep in {n} iteration(s)");
            }
            None => {
                let _ = writeln!(out, "Review sweeps disabled");
            }
        }
        out
    }
}

fn percent(part: usize, whole: usize) -> u32 {
    if whole == 0 {
        0
    } else {
        (part * 100 / whole) as u32
    }
}

/// Iterations remaining until the next sweep iteration.
pub fn iterations_until_sweep(iteration_count: u64, period: u64) -> Option<u64> {
    if period == 0 {
        return None;
    }
    Some(period - iteration_count % period)
}
