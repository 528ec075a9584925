//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::task::{Milestone, Severity};

/// Top-level CLI parser for `compound`.
#[derive(Debug, Parser)]
#[command(
    name = "compound",
    version,
    about = "Drive a manuscript through its milestones, one task at a time"
)]
pub struct Cli {
    /// Config file (default: ./compound.toml if present).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// State document path, overriding `state_path` from config.
    #[arg(long, global = true, value_name = "PATH")]
    pub state: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write a fresh state document with one draft task per chapter.
    Init(InitArgs),
    /// Run a single scheduler iteration.
    Step,
    /// Run several scheduler iterations.
    Run(RunArgs),
    /// Print the state document as JSON.
    Dump,
    /// Show progress per milestone and chapter.
    Status(StatusArgs),
    /// Add a task by hand.
    Add(AddArgs),
    /// Move a failed task back to pending.
    Requeue { id: String },
    /// Delete a task.
    Remove { id: String },
    /// Close the circuit breaker and clear its failure count.
    ResetBreaker,
    /// Print the effective configuration as TOML.
    Config,
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Number of chapters to seed.
    #[arg(long, default_value_t = 1)]
    pub chapters: u32,

    /// Chapter id prefix; ids are `<prefix>01`, `<prefix>02`, ...
    #[arg(long, default_value = "ch")]
    pub prefix: String,

    /// Overwrite an existing state document.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Maximum number of iterations.
    #[arg(short = 'n', long = "iterations", default_value_t = 1)]
    pub iterations: u64,

    /// Stop at the first iteration that dispatches nothing.
    #[arg(long)]
    pub until_idle: bool,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Emit the summary as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct AddArgs {
    #[arg(long)]
    pub id: String,

    #[arg(long)]
    pub chapter: Option<String>,

    #[arg(long, value_enum)]
    pub milestone: Option<Milestone>,

    #[arg(long)]
    pub title: Option<String>,

    /// Make this a remediation task with the given severity.
    #[arg(long, value_enum)]
    pub severity: Option<Severity>,

    /// Repeatable.
    #[arg(long = "depends-on", value_name = "ID")]
    pub depends_on: Vec<String>,
}
