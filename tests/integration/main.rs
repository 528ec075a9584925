//! Integration tests for the `compound` crate.

mod cli;
mod scheduler_scenarios;
mod support;
