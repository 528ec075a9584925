//! Sequential scheduler loop.
//!
//! Each iteration either runs a review sweep or picks the single best
//! eligible task, hands it to the worker, applies the outcome and commits
//! the whole state. Exactly one task is `in_progress` at any time, and the
//! `in_progress` mark is committed before the worker starts so a crash can
//! be reconciled on the next start.

mod report;

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use report::{DispatchRecord, IdleReason, IterationReport, RejectedTask};

use crate::breaker::{CircuitBreakerState, DEFAULT_FAILURE_THRESHOLD};
use crate::cadence::{review_task, should_run_review_sweep, DEFAULT_REVIEW_PERIOD};
use crate::clock::Clock;
use crate::evidence::{EvidenceEvent, RunRecorder};
use crate::resolver;
use crate::score::{ScoreModel, ScoreWeights};
use crate::store::{PersistError, StateDocument, StatePersistence, StoreError, TaskStore};
use crate::task::{Milestone, ReviewAgent, Task, TaskPatch, TaskStatus};
use crate::worker::{Outcome, Worker};

/// Errors that stop the scheduler loop.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// An internal store invariant was broken.
    #[error("task store error: {0}")]
    Store(#[from] StoreError),

    /// State could not be committed. The loop must not continue.
    #[error("failed to persist state: {0}")]
    Persist(#[from] PersistError),
}

/// Scheduler tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Consecutive failures before the breaker opens.
    /// Default: 5
    pub breaker_threshold: u32,
    /// Iterations between review sweeps; 0 disables sweeps.
    /// Default: 6
    pub review_period: u64,
    /// Agents run in every sweep, in order.
    /// Default: all agents
    pub review_agents: Vec<ReviewAgent>,
    pub weights: ScoreWeights,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            breaker_threshold: DEFAULT_FAILURE_THRESHOLD,
            review_period: DEFAULT_REVIEW_PERIOD,
            review_agents: ReviewAgent::ALL.to_vec(),
            weights: ScoreWeights::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_breaker_threshold(mut self, threshold: u32) -> Self {
        self.breaker_threshold = threshold;
        self
    }

    pub fn with_review_period(mut self, period: u64) -> Self {
        self.review_period = period;
        self
    }

    pub fn with_review_agents(mut self, agents: impl Into<Vec<ReviewAgent>>) -> Self {
        self.review_agents = agents.into();
        self
    }

    pub fn with_weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }
}

/// Drives tasks through the worker one at a time.
pub struct Scheduler {
    config: SchedulerConfig,
    scores: ScoreModel,
    store: TaskStore,
    breaker: CircuitBreakerState,
    iteration: u64,
    worker: Box<dyn Worker>,
    clock: Box<dyn Clock>,
    persistence: Box<dyn StatePersistence>,
    recorder: Option<RunRecorder>,
}

impl Scheduler {
    /// Load committed state and reconcile any interrupted dispatch.
    ///
    /// A task found `in_progress` can only be left over from a run that died
    /// mid-dispatch; it goes back to `pending` and the fix is committed
    /// before the scheduler is returned.
    pub fn open<P, W, C>(
        config: SchedulerConfig,
        persistence: P,
        worker: W,
        clock: C,
    ) -> Result<Self, SchedulerError>
    where
        P: StatePersistence + 'static,
        W: Worker + 'static,
        C: Clock + 'static,
    {
        let document = persistence.load()?.unwrap_or_default();
        let (store, iteration, mut breaker) = document.into_parts()?;
        breaker.set_threshold(config.breaker_threshold);

        let mut scheduler = Self {
            scores: ScoreModel::new(config.weights.clone()),
            config,
            store,
            breaker,
            iteration,
            worker: Box::new(worker),
            clock: Box::new(clock),
            persistence: Box::new(persistence),
            recorder: None,
        };

        let now = scheduler.clock.now();
        let interrupted = scheduler.store.reset_interrupted(now);
        if !interrupted.is_empty() {
            for id in &interrupted {
                warn!(task = %id, "interrupted dispatch reset to pending");
            }
            scheduler.commit()?;
        }
        Ok(scheduler)
    }

    /// Attach an evidence recorder.
    pub fn with_recorder(mut self, recorder: RunRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn breaker(&self) -> &CircuitBreakerState {
        &self.breaker
    }

    pub fn iteration_count(&self) -> u64 {
        self.iteration
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Current state as it would be committed.
    pub fn document(&self) -> StateDocument {
        StateDocument::capture(&self.store, self.iteration, &self.breaker)
    }

    /// Run up to `iterations` iterations.
    ///
    /// Stops early at the first idle iteration when `until_idle` is set, and
    /// between iterations once `stop` is raised.
    pub fn run(
        &mut self,
        iterations: u64,
        until_idle: bool,
        stop: Option<&AtomicBool>,
    ) -> Result<Vec<IterationReport>, SchedulerError> {
        self.record(EvidenceEvent::RunStart {
            iteration: self.iteration,
        });

        let mut reports = Vec::new();
        let mut result = Ok(());
        for _ in 0..iterations {
            if stop.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                info!("stop requested, ending run");
                break;
            }
            match self.step() {
                Ok(report) => {
                    let idle = report.is_idle();
                    reports.push(report);
                    if idle && until_idle {
                        break;
                    }
                }
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }

        let status = if result.is_ok() { "ok" } else { "error" };
        self.record(EvidenceEvent::RunComplete {
            iterations: reports.len() as u64,
            status: status.to_string(),
        });
        result.map(|()| reports)
    }

    /// Run exactly one iteration.
    pub fn step(&mut self) -> Result<IterationReport, SchedulerError> {
        self.iteration += 1;
        let iteration = self.iteration;
        let mut report = IterationReport::new(iteration);

        if should_run_review_sweep(iteration, self.config.review_period)
            && !self.config.review_agents.is_empty()
        {
            report.sweep = true;
            self.run_sweep(&mut report)?;
        } else {
            self.dispatch_best(&mut report)?;
        }

        self.commit()?;
        Ok(report)
    }

    fn run_sweep(&mut self, report: &mut IterationReport) -> Result<(), SchedulerError> {
        let iteration = report.iteration;
        let now = self.clock.now();

        let mut ids = Vec::with_capacity(self.config.review_agents.len());
        for agent in self.config.review_agents.clone() {
            let task = review_task(iteration, agent, now);
            if !self.store.contains(&task.id) {
                self.store.create(task.clone())?;
            }
            ids.push(task.id);
        }
        info!(iteration, reviews = ids.len(), "review sweep");
        self.record(EvidenceEvent::ReviewSweep {
            iteration,
            tasks: ids.clone(),
        });

        for id in ids {
            if self.store.get(&id)?.status == TaskStatus::Pending {
                let score = self.scores.score(self.store.get(&id)?, &self.store, now);
                self.dispatch(&id, score, report)?;
            }
        }
        Ok(())
    }

    fn dispatch_best(&mut self, report: &mut IterationReport) -> Result<(), SchedulerError> {
        let iteration = report.iteration;
        let resolution = resolver::eligible(self.store.iter());
        for dangling in &resolution.dangling {
            warn!(iteration, "{dangling}");
        }
        report.dangling = resolution.dangling;

        if resolution.eligible.is_empty() {
            debug!(iteration, "no eligible work");
            return self.idle(report, IdleReason::NoEligibleWork);
        }

        let candidates: Vec<String> = if self.breaker.can_dispatch_content_task() {
            resolution.eligible
        } else {
            resolution
                .eligible
                .into_iter()
                .filter(|id| self.store.get(id).is_ok_and(|t| !t.is_content()))
                .collect()
        };
        if candidates.is_empty() {
            warn!(
                iteration,
                consecutive_failures = self.breaker.consecutive_failures,
                threshold = self.breaker.threshold,
                "blocked by circuit breaker"
            );
            return self.idle(report, IdleReason::CircuitOpen);
        }

        let now = self.clock.now();
        let ranked = self.scores.rank(&candidates, &self.store, now);
        for entry in &ranked {
            debug!(iteration, task = %entry.id, score = entry.score, "ranked");
            let patch = if self.store.get(&entry.id)?.status == TaskStatus::Pending {
                TaskPatch {
                    status: Some(TaskStatus::Eligible),
                    score: Some(entry.score),
                    ..TaskPatch::default()
                }
            } else {
                TaskPatch::score(entry.score)
            };
            self.store.update(&entry.id, patch, now)?;
        }

        match ranked.first() {
            Some(top) => {
                let (id, score) = (top.id.clone(), top.score);
                self.dispatch(&id, score, report)
            }
            None => self.idle(report, IdleReason::NoEligibleWork),
        }
    }

    fn idle(
        &mut self,
        report: &mut IterationReport,
        reason: IdleReason,
    ) -> Result<(), SchedulerError> {
        report.idle = Some(reason);
        self.record(EvidenceEvent::Idle {
            iteration: report.iteration,
            reason: reason.as_label().to_string(),
        });
        Ok(())
    }

    fn dispatch(
        &mut self,
        id: &str,
        score: i64,
        report: &mut IterationReport,
    ) -> Result<(), SchedulerError> {
        let now = self.clock.now();
        if self.store.get(id)?.status == TaskStatus::Pending {
            self.store.update(id, TaskPatch::status(TaskStatus::Eligible), now)?;
        }
        let task = self
            .store
            .update(id, TaskPatch::status(TaskStatus::InProgress), now)?
            .clone();
        self.commit()?;

        info!(
            iteration = report.iteration,
            task = %task.id,
            kind = task.kind.as_label(),
            score,
            "dispatching"
        );
        let outcome = match self.worker.execute(&task) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(task = %task.id, "worker error: {err}");
                Outcome::failure(err.to_string())
            }
        };

        let now = self.clock.now();
        let error = if outcome.success {
            self.store.update(id, TaskPatch::status(TaskStatus::Complete), now)?;
            info!(task = %task.id, "complete");
            None
        } else {
            let message = outcome
                .message
                .clone()
                .unwrap_or_else(|| "worker reported failure".to_string());
            self.store.update(id, TaskPatch::failed(message.clone()), now)?;
            warn!(task = %task.id, error = %message, "failed");
            Some(message)
        };

        self.feed_breaker(outcome.success, report);

        if outcome.success && task.is_content() {
            self.advance_milestone(&task, report);
        }
        self.apply_discoveries(&task, outcome, report);

        self.record(EvidenceEvent::Dispatch {
            iteration: report.iteration,
            task_id: task.id.clone(),
            kind: task.kind.as_label().to_string(),
            status: if error.is_none() { "complete" } else { "failed" }.to_string(),
            error: error.clone(),
        });
        report.dispatched.push(DispatchRecord {
            task_id: task.id,
            kind: task.kind.as_label(),
            score,
            success: error.is_none(),
            error,
        });
        Ok(())
    }

    /// Every outcome feeds the breaker, whatever the task kind.
    fn feed_breaker(&mut self, success: bool, report: &mut IterationReport) {
        if self.breaker.record_outcome(success) {
            report.breaker_opened = true;
            warn!(
                consecutive_failures = self.breaker.consecutive_failures,
                threshold = self.breaker.threshold,
                "circuit breaker opened; content dispatch paused"
            );
            self.record(EvidenceEvent::BreakerOpened {
                iteration: report.iteration,
                consecutive_failures: self.breaker.consecutive_failures,
            });
        }
    }

    /// Queue the chapter's next milestone after a milestone completes.
    fn advance_milestone(&mut self, completed: &Task, report: &mut IterationReport) {
        let (Some(chapter), Some(milestone)) = (completed.chapter.as_deref(), completed.milestone)
        else {
            return;
        };
        let Some(next) = milestone.next() else {
            info!(chapter, "chapter reached final milestone");
            return;
        };
        let exists = self
            .store
            .list_by_chapter(chapter)
            .iter()
            .any(|t| t.milestone == Some(next));
        if exists {
            return;
        }

        let task = Task::milestone(chapter, next, self.clock.now())
            .with_dependency(completed.id.clone());
        self.create_follow_up(task, report);
    }

    fn apply_discoveries(&mut self, source: &Task, outcome: Outcome, report: &mut IterationReport) {
        let now = self.clock.now();
        for new_task in outcome.new_tasks {
            self.create_follow_up(new_task.into_task(now), report);
        }
        for (index, mut finding) in outcome.findings.into_iter().enumerate() {
            if finding.chapter.is_none() {
                finding.chapter = source.chapter.clone();
            }
            let task = finding.into_remediation(&source.id, report.iteration, index + 1, now);
            self.create_follow_up(task, report);
        }
    }

    fn create_follow_up(&mut self, task: Task, report: &mut IterationReport) {
        let id = task.id.clone();
        match self.store.create(task) {
            Ok(_) => {
                debug!(task = %id, "created");
                report.created.push(id);
            }
            Err(err) => {
                warn!(task = %id, "rejected new task: {err}");
                report.rejected.push(RejectedTask {
                    task_id: id,
                    reason: err.to_string(),
                });
            }
        }
    }

    fn commit(&mut self) -> Result<(), SchedulerError> {
        let document = self.document();
        self.persistence.save(&document).map_err(|err| {
            error!(iteration = self.iteration, "failed to commit state: {err}");
            SchedulerError::Persist(err)
        })
    }

    fn record(&mut self, event: EvidenceEvent) {
        if let Some(recorder) = self.recorder.as_mut() {
            let now = self.clock.now();
            recorder.record(event, now);
        }
    }
}

/// Seed one `draft` task per chapter.
pub fn seed_chapters<'a>(
    store: &mut TaskStore,
    chapters: impl IntoIterator<Item = &'a str>,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<Vec<String>, StoreError> {
    let mut ids = Vec::new();
    for chapter in chapters {
        let task = store.create(Task::milestone(chapter, Milestone::Draft, now))?;
        ids.push(task.id.clone());
    }
    Ok(ids)
}
