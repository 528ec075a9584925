//! Worker that runs an external program per task.
//!
//! Protocol:
//! - the task is written to the child's stdin as JSON;
//! - `COMPOUND_TASK_ID`, `COMPOUND_TASK_KIND`, `COMPOUND_CHAPTER`,
//!   `COMPOUND_MILESTONE` and `COMPOUND_REVIEW_AGENT` are set when they apply;
//! - stdout may carry a JSON [`Outcome`]; when it is empty the exit status
//!   decides success;
//! - a non-zero exit is always a failure, whatever stdout says.

use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::task::{Task, TaskKind};
use crate::worker::{NewTask, Outcome, ReviewFinding, Worker, WorkerError};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How to launch the worker program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Program to execute for every task.
    /// Default: "compound-worker"
    pub program: String,

    /// Extra arguments passed before any task data.
    pub args: Vec<String>,

    /// Maximum wall time for a single task.
    /// Default: 900 seconds (15 minutes)
    pub timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: "compound-worker".to_string(),
            args: Vec::new(),
            timeout_secs: 900,
        }
    }
}

impl WorkerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Outcome as read from stdout; `success` falls back to the exit status.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportedOutcome {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    new_tasks: Vec<NewTask>,
    #[serde(default)]
    findings: Vec<ReviewFinding>,
    #[serde(default)]
    message: Option<String>,
}

/// Runs `program args...` once per task.
#[derive(Debug, Clone)]
pub struct CommandWorker {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandWorker {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: WorkerConfig::default().timeout(),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            timeout: config.timeout(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, task: &Task) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env("COMPOUND_TASK_ID", &task.id)
            .env("COMPOUND_TASK_KIND", task.kind.as_label())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(chapter) = &task.chapter {
            cmd.env("COMPOUND_CHAPTER", chapter);
        }
        if let Some(milestone) = task.milestone {
            cmd.env("COMPOUND_MILESTONE", milestone.as_label());
        }
        if let TaskKind::Review { agent } = task.kind {
            cmd.env("COMPOUND_REVIEW_AGENT", agent.as_label());
        }
        cmd
    }
}

impl Worker for CommandWorker {
    fn execute(&mut self, task: &Task) -> Result<Outcome, WorkerError> {
        let payload = serde_json::to_vec(task).map_err(std::io::Error::other)?;

        let mut child = self
            .command(task)
            .spawn()
            .map_err(|source| WorkerError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        debug!(task = %task.id, program = %self.program, pid = child.id(), "worker started");

        // Feed stdin and drain both pipes off-thread so a chatty child can
        // never block on a full pipe while we poll.
        let stdin = child.stdin.take();
        let writer = thread::spawn(move || -> std::io::Result<()> {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&payload)?;
            }
            Ok(())
        });
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let start = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if start.elapsed() > self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                let _ = writer.join();
                let _ = join(stdout);
                let _ = join(stderr);
                warn!(task = %task.id, "worker timed out, killed");
                return Err(WorkerError::Timeout {
                    after: self.timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        // A child that exits without reading stdin yields a broken pipe here,
        // which is not an error for us.
        let _ = writer.join();
        let stdout = join(stdout)?;
        let stderr = join(stderr)?;

        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            let outcome = if status.success() {
                Outcome::success()
            } else {
                Outcome::failure(failure_message(status.code(), &stderr))
            };
            return Ok(outcome);
        }

        let reported: ReportedOutcome = serde_json::from_str(trimmed)
            .map_err(|e| WorkerError::InvalidOutput(e.to_string()))?;
        let success = status.success() && reported.success.unwrap_or(true);
        let message = match reported.message {
            Some(message) => Some(message),
            None if !success => Some(failure_message(status.code(), &stderr)),
            None => None,
        };

        Ok(Outcome {
            success,
            new_tasks: reported.new_tasks,
            findings: reported.findings,
            message,
        })
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<std::io::Result<String>> {
    thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_string(&mut buf)?;
        }
        Ok(buf)
    })
}

fn join(handle: JoinHandle<std::io::Result<String>>) -> Result<String, WorkerError> {
    handle
        .join()
        .map_err(|_| WorkerError::InvalidOutput("output reader panicked".to_string()))?
        .map_err(WorkerError::Io)
}

fn failure_message(code: Option<i32>, stderr: &str) -> String {
    let exit = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
    match stderr.lines().rev().find(|l| !l.trim().is_empty()) {
        Some(line) => format!("exit {exit}: {}", line.trim()),
        None => format!("exit {exit}"),
    }
}
