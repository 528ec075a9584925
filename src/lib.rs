//! Iterative task orchestration for manuscript production.
//!
//! A single sequential [`scheduler::Scheduler`] repeatedly picks the
//! highest-priority eligible task from the [`store::TaskStore`], hands it to
//! a [`worker::Worker`], and commits the outcome. Chapters advance through
//! fixed milestones, review sweeps run on a fixed cadence, and a
//! consecutive-failure [`breaker`] pauses content work when the worker keeps
//! failing.

pub mod breaker;
pub mod cadence;
pub mod cli;
pub mod clock;
pub mod commands;
pub mod config;
pub mod evidence;
pub mod progress;
pub mod resolver;
pub mod scheduler;
pub mod score;
pub mod store;
pub mod task;
pub mod worker;

pub use breaker::CircuitBreakerState;
pub use scheduler::{IdleReason, IterationReport, Scheduler, SchedulerConfig, SchedulerError};
pub use store::{StoreError, TaskStore};
pub use task::{Milestone, Task, TaskKind, TaskPatch, TaskStatus};
