//! Command implementations behind the CLI.

use std::io::{self, IsTerminal};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use owo_colors::OwoColorize;
use tracing::{info, warn};

use crate::breaker::CircuitBreakerState;
use crate::cli::{AddArgs, Cli, Command, InitArgs, RunArgs, StatusArgs};
use crate::clock::SystemClock;
use crate::config::Settings;
use crate::evidence::{generate_run_id, retention_days_from_env, RunRecorder};
use crate::progress::ProgressSummary;
use crate::scheduler::{seed_chapters, IterationReport, Scheduler};
use crate::store::{JsonStateFile, StateDocument, StatePersistence, TaskStore};
use crate::task::{Task, TaskKind};
use crate::worker::CommandWorker;

/// Execute a parsed command line.
pub fn execute(cli: Cli) -> Result<()> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(state) = cli.state {
        settings.state_path = state;
    }

    match cli.command {
        Command::Init(args) => init(&settings, args),
        Command::Step => run(
            &settings,
            RunArgs {
                iterations: 1,
                until_idle: false,
            },
        ),
        Command::Run(args) => run(&settings, args),
        Command::Dump => dump(&settings),
        Command::Status(args) => status(&settings, args),
        Command::Add(args) => add(&settings, args),
        Command::Requeue { id } => edit(&settings, |state| {
            state.store.requeue(&id, Utc::now())?;
            println!("requeued {id}");
            Ok(())
        }),
        Command::Remove { id } => edit(&settings, |state| {
            state.store.remove(&id)?;
            println!("removed {id}");
            Ok(())
        }),
        Command::ResetBreaker => edit(&settings, |state| {
            state.breaker.reset();
            println!("circuit breaker reset");
            Ok(())
        }),
        Command::Config => {
            print!("{}", settings.to_toml()?);
            Ok(())
        }
    }
}

/// Loaded state for commands that edit it outside the scheduler.
struct State {
    store: TaskStore,
    iteration_count: u64,
    breaker: CircuitBreakerState,
}

fn load(path: &Path) -> Result<Option<State>> {
    let file = JsonStateFile::new(path);
    let Some(document) = file
        .load()
        .with_context(|| format!("reading {}", path.display()))?
    else {
        return Ok(None);
    };
    let (store, iteration_count, breaker) = document.into_parts()?;
    Ok(Some(State {
        store,
        iteration_count,
        breaker,
    }))
}

fn load_existing(path: &Path) -> Result<State> {
    load(path)?.with_context(|| {
        format!(
            "no state document at {} (run `compound init` first)",
            path.display()
        )
    })
}

fn save(path: &Path, state: &State) -> Result<()> {
    let document = StateDocument::capture(&state.store, state.iteration_count, &state.breaker);
    JsonStateFile::new(path)
        .save(&document)
        .with_context(|| format!("writing {}", path.display()))
}

fn edit(settings: &Settings, apply: impl FnOnce(&mut State) -> Result<()>) -> Result<()> {
    let mut state = load_existing(&settings.state_path)?;
    apply(&mut state)?;
    save(&settings.state_path, &state)
}

fn init(settings: &Settings, args: InitArgs) -> Result<()> {
    let path = &settings.state_path;
    if path.exists() && !args.force {
        bail!(
            "state document {} already exists (use --force to overwrite)",
            path.display()
        );
    }

    let chapters: Vec<String> = (1..=args.chapters)
        .map(|n| format!("{}{n:02}", args.prefix))
        .collect();
    let mut store = TaskStore::new();
    let ids = seed_chapters(&mut store, chapters.iter().map(String::as_str), Utc::now())?;

    let state = State {
        store,
        iteration_count: 0,
        breaker: CircuitBreakerState::new(settings.breaker.threshold),
    };
    save(path, &state)?;
    info!(path = %path.display(), tasks = ids.len(), "initialized state");
    println!("initialized {} with {} chapter(s)", path.display(), ids.len());
    Ok(())
}

fn run(settings: &Settings, args: RunArgs) -> Result<()> {
    let path = &settings.state_path;
    if !path.exists() {
        bail!(
            "no state document at {} (run `compound init` first)",
            path.display()
        );
    }

    let worker = CommandWorker::from_config(&settings.worker);
    let mut scheduler = Scheduler::open(
        settings.scheduler_config(),
        JsonStateFile::new(path),
        worker,
        SystemClock,
    )?;
    if let Some(recorder) = recorder(settings) {
        scheduler = scheduler.with_recorder(recorder);
    }

    let stop = Arc::new(AtomicBool::new(false));
    if args.iterations > 1 {
        let flag = Arc::clone(&stop);
        if let Err(err) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
            warn!("could not install Ctrl-C handler: {err}");
        }
    }

    let color = io::stdout().is_terminal();
    let reports = scheduler.run(args.iterations, args.until_idle, Some(stop.as_ref()))?;
    for report in &reports {
        println!("{}", describe(report, color));
    }
    Ok(())
}

fn recorder(settings: &Settings) -> Option<RunRecorder> {
    if !settings.evidence.enabled {
        return None;
    }
    let state_dir = settings.state_dir();
    match RunRecorder::open(&state_dir, generate_run_id(), retention_days_from_env()) {
        Ok(recorder) => {
            recorder.prune(Utc::now());
            Some(recorder)
        }
        Err(err) => {
            warn!(dir = %state_dir.display(), "evidence disabled: {err}");
            None
        }
    }
}

fn describe(report: &IterationReport, color: bool) -> String {
    let prefix = format!("iteration {}", report.iteration);
    let prefix = if color { prefix.bold().to_string() } else { prefix };

    if let Some(reason) = report.idle {
        let text = format!("idle ({reason})");
        let text = if color { text.yellow().to_string() } else { text };
        return format!("{prefix}: {text}");
    }

    let mut parts = Vec::new();
    for dispatch in &report.dispatched {
        let outcome = match (&dispatch.error, color) {
            (None, false) => "complete".to_string(),
            (None, true) => "complete".green().to_string(),
            (Some(err), false) => format!("failed: {err}"),
            (Some(err), true) => format!("failed: {err}").red().to_string(),
        };
        parts.push(format!("{} {}", dispatch.task_id, outcome));
    }
    let mut line = format!("{prefix}: {}", parts.join("; "));
    if report.sweep {
        line.push_str(" [review sweep]");
    }
    if !report.created.is_empty() {
        line.push_str(&format!(" (+{} task(s))", report.created.len()));
    }
    if report.breaker_opened {
        line.push_str(" [circuit breaker opened]");
    }
    line
}

fn dump(settings: &Settings) -> Result<()> {
    let document = JsonStateFile::new(&settings.state_path)
        .load()?
        .unwrap_or_default();
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

fn status(settings: &Settings, args: StatusArgs) -> Result<()> {
    let document = JsonStateFile::new(&settings.state_path)
        .load()?
        .unwrap_or_default();
    let summary = ProgressSummary::from_document(&document, settings.review.period);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", summary.render(io::stdout().is_terminal()));
    }
    Ok(())
}

fn add(settings: &Settings, args: AddArgs) -> Result<()> {
    edit(settings, |state| {
        let now = Utc::now();
        let kind = match args.severity {
            Some(severity) => TaskKind::Remediation {
                severity,
                source: None,
                file: None,
                line: None,
            },
            None => TaskKind::Content,
        };
        let mut task = Task::new(args.id.clone(), kind, now);
        task.chapter = args.chapter;
        task.milestone = args.milestone;
        if let Some(title) = args.title {
            task.title = title;
        }
        task.depends_on = args.depends_on.into_iter().collect();

        let missing: Vec<&String> = task
            .depends_on
            .iter()
            .filter(|dep| !state.store.contains(dep))
            .collect();
        if !missing.is_empty() {
            let missing: Vec<&str> = missing.iter().map(|s| s.as_str()).collect();
            warn!(task = %task.id, "dependencies not in store yet: {}", missing.join(", "));
        }

        state.store.create(task)?;
        println!("added {}", args.id);
        Ok(())
    })
}
