use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Category of work a task represents.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    /// Chapter milestone work (writing, example code, diagrams).
    #[default]
    Content,
    /// One review agent's pass over the current manuscript.
    Review { agent: ReviewAgent },
    /// Fix for a review finding.
    Remediation {
        severity: Severity,
        /// Id of the review task that reported the finding.
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        file: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        line: Option<u32>,
    },
}

impl TaskKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskKind::Content => "content",
            TaskKind::Review { .. } => "review",
            TaskKind::Remediation { .. } => "remediation",
        }
    }
}

/// The content-quality checks run during a review sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAgent {
    /// AI-slop phrasing detection.
    Slop,
    TechnicalAccuracy,
    CrossReference,
    DiagramOpportunity,
    /// House style linting.
    Style,
    TermIntroduction,
    ProgressSummary,
}

impl ReviewAgent {
    /// Every agent, in sweep order.
    pub const ALL: [ReviewAgent; 7] = [
        ReviewAgent::Slop,
        ReviewAgent::TechnicalAccuracy,
        ReviewAgent::CrossReference,
        ReviewAgent::DiagramOpportunity,
        ReviewAgent::Style,
        ReviewAgent::TermIntroduction,
        ReviewAgent::ProgressSummary,
    ];

    pub fn as_label(self) -> &'static str {
        match self {
            ReviewAgent::Slop => "slop",
            ReviewAgent::TechnicalAccuracy => "technical_accuracy",
            ReviewAgent::CrossReference => "cross_reference",
            ReviewAgent::DiagramOpportunity => "diagram_opportunity",
            ReviewAgent::Style => "style",
            ReviewAgent::TermIntroduction => "term_introduction",
            ReviewAgent::ProgressSummary => "progress_summary",
        }
    }
}

impl fmt::Display for ReviewAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Severity of a review finding. Declared low to high so `Ord` follows urgency.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_label(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}
