//! End-to-end scheduler behavior over in-memory state.

use std::collections::BTreeMap;

use chrono::Duration;
use compound::clock::ManualClock;
use compound::resolver;
use compound::store::{StoreError, TaskStore};
use compound::task::{Milestone, ReviewAgent, Severity, Task, TaskKind, TaskPatch, TaskStatus};
use compound::worker::{Outcome, ReviewFinding};
use compound::{IdleReason, Scheduler, SchedulerConfig};

use crate::support::{seeded_state, t0, ScriptedWorker};

fn no_sweeps() -> SchedulerConfig {
    SchedulerConfig::default().with_review_period(0)
}

#[test]
fn test_three_failures_open_the_breaker() {
    let worker = ScriptedWorker::failing(3);
    let config = no_sweeps().with_breaker_threshold(3);
    let mut scheduler = Scheduler::open(
        config,
        seeded_state(&["ch01", "ch02", "ch03", "ch04"]),
        worker.clone(),
        ManualClock::new(t0()),
    )
    .expect("open");

    for _ in 0..3 {
        let report = scheduler.step().expect("step");
        assert_eq!(report.dispatched.len(), 1);
        assert!(!report.dispatched[0].success);
    }
    assert!(!scheduler.breaker().can_dispatch_content_task());

    let fourth = scheduler.step().expect("fourth");
    assert_eq!(fourth.idle, Some(IdleReason::CircuitOpen));
    assert!(fourth.dispatched.is_empty());
    assert_eq!(worker.seen().len(), 3);
    assert_eq!(
        scheduler.store().get("ch04-draft").expect("ch04").status,
        TaskStatus::Eligible
    );
}

#[test]
fn test_sixth_iteration_runs_full_review_sweep() {
    let worker = ScriptedWorker::default();
    let chapters = ["ch01", "ch02", "ch03", "ch04", "ch05", "ch06", "ch07"];
    let mut scheduler = Scheduler::open(
        SchedulerConfig::default().with_review_period(6),
        seeded_state(&chapters),
        worker.clone(),
        ManualClock::new(t0()),
    )
    .expect("open");

    for iteration in 1..=5 {
        let report = scheduler.step().expect("content step");
        assert!(!report.sweep, "iteration {iteration} should not sweep");
        assert_eq!(report.dispatched.len(), 1);
        assert_eq!(report.dispatched[0].kind, "content");
    }

    let sweep = scheduler.step().expect("sweep step");
    assert!(sweep.sweep);
    let expected: Vec<String> = ReviewAgent::ALL
        .iter()
        .map(|agent| format!("review-0006-{agent}"))
        .collect();
    assert_eq!(sweep.dispatched_ids(), expected);
    assert!(sweep.dispatched.iter().all(|d| d.kind == "review" && d.success));

    let seventh = scheduler.step().expect("resume");
    assert!(!seventh.sweep);
    assert_eq!(seventh.dispatched.len(), 1);
    assert_eq!(seventh.dispatched[0].kind, "content");
}

#[test]
fn test_completed_draft_unblocks_code_written() {
    let mut store = TaskStore::new();
    store
        .create(Task::milestone("chX", Milestone::Draft, t0()))
        .expect("draft");
    store
        .create(Task::milestone("chX", Milestone::CodeWritten, t0()).with_dependency("chX-draft"))
        .expect("code written");
    for status in [TaskStatus::Eligible, TaskStatus::InProgress, TaskStatus::Complete] {
        store
            .update("chX-draft", TaskPatch::status(status), t0())
            .expect("advance draft");
    }

    let resolution = resolver::eligible(store.iter());
    assert_eq!(resolution.eligible, vec!["chX-code_written".to_string()]);
    assert!(resolution.dangling.is_empty());
}

#[test]
fn test_mutual_dependency_is_rejected() {
    let mut store = TaskStore::new();
    store
        .create(Task::new("taskA", TaskKind::Content, t0()).with_dependency("taskB"))
        .expect("taskA");

    let before = store.clone();
    let err = store
        .create(Task::new("taskB", TaskKind::Content, t0()).with_dependency("taskA"))
        .unwrap_err();
    assert!(matches!(err, StoreError::CyclicDependency { .. }));
    assert_eq!(store, before);
}

#[test]
fn test_identical_inputs_give_identical_dispatch_order() {
    let run = || {
        let outcomes = vec![
            Outcome::success(),
            Outcome::failure("compile error"),
            Outcome::success(),
            Outcome::success().with_finding(ReviewFinding::new(
                "ch02.md",
                Severity::Medium,
                "passive voice",
            )),
        ];
        let worker = ScriptedWorker::new(outcomes);
        let clock = ManualClock::new(t0());
        let mut scheduler = Scheduler::open(
            SchedulerConfig::default().with_review_period(4),
            seeded_state(&["ch01", "ch02", "ch03"]),
            worker.clone(),
            clock.clone(),
        )
        .expect("open");
        for _ in 0..10 {
            scheduler.step().expect("step");
            clock.advance(Duration::minutes(30));
        }
        (worker.seen(), scheduler.document())
    };

    let (first_order, first_state) = run();
    let (second_order, second_state) = run();
    assert_eq!(first_order, second_order);
    assert_eq!(first_state, second_state);
}

#[test]
fn test_idle_iterations_are_idempotent() {
    let mut scheduler = Scheduler::open(
        no_sweeps(),
        seeded_state(&["ch01"]),
        ScriptedWorker::failing(1),
        ManualClock::new(t0()),
    )
    .expect("open");
    scheduler.step().expect("failing step");

    let before = scheduler.store().clone();
    for _ in 0..3 {
        let report = scheduler.step().expect("idle step");
        assert_eq!(report.idle, Some(IdleReason::NoEligibleWork));
    }
    assert_eq!(scheduler.store(), &before);
}

#[test]
fn test_chapter_runs_through_every_milestone() {
    let worker = ScriptedWorker::default();
    let mut scheduler = Scheduler::open(
        no_sweeps(),
        seeded_state(&["ch01"]),
        worker.clone(),
        ManualClock::new(t0()),
    )
    .expect("open");

    let reports = scheduler.run(10, true, None).expect("run");
    assert_eq!(reports.len(), 7);
    assert!(reports.last().expect("last").is_idle());

    let expected: Vec<String> = Milestone::ALL
        .iter()
        .map(|m| Task::milestone_id("ch01", *m))
        .collect();
    assert_eq!(worker.seen(), expected);
    assert!(scheduler
        .store()
        .iter()
        .all(|t| t.status == TaskStatus::Complete));
}

#[test]
fn test_milestones_complete_in_order_per_chapter() {
    let outcomes = (0..30).map(|i| {
        if i % 4 == 3 {
            Outcome::failure("flaky")
        } else {
            Outcome::success()
        }
    });
    let mut scheduler = Scheduler::open(
        no_sweeps().with_breaker_threshold(100),
        seeded_state(&["ch01", "ch02", "ch03"]),
        ScriptedWorker::new(outcomes),
        ManualClock::new(t0()),
    )
    .expect("open");

    for _ in 0..15 {
        scheduler.step().expect("step");

        let mut by_chapter: BTreeMap<String, Vec<(Milestone, TaskStatus)>> = BTreeMap::new();
        for task in scheduler.store().iter() {
            if let (Some(chapter), Some(milestone)) = (&task.chapter, task.milestone) {
                by_chapter
                    .entry(chapter.clone())
                    .or_default()
                    .push((milestone, task.status));
            }
        }
        for (chapter, mut tasks) in by_chapter {
            tasks.sort();
            let active = tasks
                .iter()
                .filter(|(_, s)| matches!(s, TaskStatus::Eligible | TaskStatus::InProgress))
                .count();
            assert!(active <= 1, "{chapter} has {active} active milestone tasks");

            let complete: Vec<bool> = tasks
                .iter()
                .map(|(_, s)| *s == TaskStatus::Complete)
                .collect();
            let prefix = complete.iter().take_while(|c| **c).count();
            assert!(
                complete[prefix..].iter().all(|c| !c),
                "{chapter} completed milestones are not a prefix: {tasks:?}"
            );
        }
    }
}

#[test]
fn test_open_breaker_still_runs_review_sweeps() {
    let worker = ScriptedWorker::failing(1);
    let config = SchedulerConfig::default()
        .with_breaker_threshold(1)
        .with_review_period(2)
        .with_review_agents(vec![ReviewAgent::Slop, ReviewAgent::Style]);
    let mut scheduler = Scheduler::open(
        config,
        seeded_state(&["ch01", "ch02"]),
        worker.clone(),
        ManualClock::new(t0()),
    )
    .expect("open");

    let first = scheduler.step().expect("first");
    assert!(first.breaker_opened);
    assert!(scheduler.breaker().open);

    let sweep = scheduler.step().expect("sweep");
    assert_eq!(
        sweep.dispatched_ids(),
        vec!["review-0002-slop", "review-0002-style"]
    );
    assert!(!scheduler.breaker().open);
    assert_eq!(scheduler.breaker().consecutive_failures, 0);

    let third = scheduler.step().expect("third");
    assert_eq!(third.dispatched_ids(), vec!["ch02-draft"]);
}

#[test]
fn test_success_between_failures_keeps_breaker_closed() {
    let outcomes = [
        Outcome::failure("first"),
        Outcome::failure("second"),
        Outcome::success(),
        Outcome::failure("third"),
        Outcome::failure("fourth"),
    ];
    let mut scheduler = Scheduler::open(
        no_sweeps().with_breaker_threshold(3),
        seeded_state(&["ch01", "ch02", "ch03", "ch04", "ch05"]),
        ScriptedWorker::new(outcomes),
        ManualClock::new(t0()),
    )
    .expect("open");

    for _ in 0..5 {
        let report = scheduler.step().expect("step");
        assert_eq!(report.dispatched.len(), 1);
        assert!(!report.breaker_opened);
    }
    assert!(!scheduler.breaker().open);
    assert_eq!(scheduler.breaker().consecutive_failures, 2);

    let sixth = scheduler.step().expect("sixth");
    assert!(sixth.idle.is_none());
}

#[test]
fn test_review_success_resets_failure_streak() {
    let outcomes = [
        Outcome::failure("first"),
        Outcome::failure("second"),
        Outcome::success(),
        Outcome::failure("third"),
    ];
    let config = SchedulerConfig::default()
        .with_breaker_threshold(3)
        .with_review_period(3)
        .with_review_agents(vec![ReviewAgent::Style]);
    let mut scheduler = Scheduler::open(
        config,
        seeded_state(&["ch01", "ch02", "ch03"]),
        ScriptedWorker::new(outcomes),
        ManualClock::new(t0()),
    )
    .expect("open");

    let reports = scheduler.run(4, false, None).expect("run");
    assert!(reports[2].sweep);
    assert_eq!(reports[3].dispatched.len(), 1);
    assert!(!reports[3].dispatched[0].success);

    assert_eq!(scheduler.breaker().consecutive_failures, 1);
    assert!(!scheduler.breaker().open);
}

#[test]
fn test_requeued_task_reporting_again_gets_fresh_remediation() {
    let low = ReviewFinding::new("ch01.md", Severity::Low, "long sentence");
    let outcomes = [
        Outcome::failure("build broke").with_finding(low.clone()),
        Outcome::success().with_finding(low),
    ];
    let state = seeded_state(&["ch01"]);
    let worker = ScriptedWorker::new(outcomes);
    let mut scheduler = Scheduler::open(
        no_sweeps(),
        state.clone(),
        worker.clone(),
        ManualClock::new(t0()),
    )
    .expect("open");
    let first = scheduler.step().expect("first attempt");
    assert_eq!(first.created, vec!["fix-ch01-draft-0001-01".to_string()]);

    // Requeue through the committed document, as the CLI does.
    let (mut store, iteration, breaker) = state
        .document()
        .expect("committed")
        .into_parts()
        .expect("parts");
    store.requeue("ch01-draft", t0()).expect("requeue");
    let requeued = compound::store::MemoryState::with_document(
        compound::store::StateDocument::capture(&store, iteration, &breaker),
    );
    let mut scheduler = Scheduler::open(
        no_sweeps(),
        requeued,
        worker,
        ManualClock::new(t0()),
    )
    .expect("reopen");

    let mut created = Vec::new();
    for _ in 0..3 {
        let report = scheduler.step().expect("step");
        assert!(report.rejected.is_empty(), "rejected: {:?}", report.rejected);
        created.extend(report.created);
    }
    assert!(created.contains(&"fix-ch01-draft-0002-01".to_string()));
    assert!(scheduler.store().contains("fix-ch01-draft-0001-01"));
}

#[test]
fn test_findings_spawn_prioritized_remediation() {
    let findings = Outcome::success()
        .with_finding(ReviewFinding::new("ch01.md", Severity::Low, "long sentence"))
        .with_finding(
            ReviewFinding::new("ch01.md", Severity::Critical, "wrong output").with_line(88),
        );
    let config = SchedulerConfig::default()
        .with_review_period(1)
        .with_review_agents(vec![ReviewAgent::TechnicalAccuracy]);
    let worker = ScriptedWorker::new([findings]);
    let mut scheduler = Scheduler::open(
        config,
        seeded_state(&[]),
        worker.clone(),
        ManualClock::new(t0()),
    )
    .expect("open");

    let sweep = scheduler.step().expect("sweep");
    assert_eq!(
        sweep.created,
        vec![
            "fix-review-0001-technical_accuracy-0001-01".to_string(),
            "fix-review-0001-technical_accuracy-0001-02".to_string(),
        ]
    );

    // Reopen without sweeps so the next iteration ranks the remediation tasks.
    let document = scheduler.document();
    let mut scheduler = Scheduler::open(
        no_sweeps(),
        compound::store::MemoryState::with_document(document),
        worker.clone(),
        ManualClock::new(t0()),
    )
    .expect("reopen");
    let next = scheduler.step().expect("remediation");
    assert_eq!(next.dispatched_ids(), vec!["fix-review-0001-technical_accuracy-0001-02"]);
}

#[test]
fn test_interrupted_task_is_dispatched_again_after_restart() {
    let state = seeded_state(&["ch01"]).fail_after(1);
    let observer = state.clone();
    let mut scheduler = Scheduler::open(
        no_sweeps(),
        state,
        ScriptedWorker::default(),
        ManualClock::new(t0()),
    )
    .expect("open");
    assert!(scheduler.step().is_err());

    let document = observer.document().expect("checkpoint");
    let worker = ScriptedWorker::default();
    let mut restarted = Scheduler::open(
        no_sweeps(),
        compound::store::MemoryState::with_document(document),
        worker.clone(),
        ManualClock::new(t0()),
    )
    .expect("reopen");
    assert_eq!(
        restarted.store().get("ch01-draft").expect("draft").status,
        TaskStatus::Pending
    );

    restarted.step().expect("redispatch");
    assert_eq!(worker.seen(), vec!["ch01-draft".to_string()]);
}
