//! Ralph Orchestrator core
//!
//! Drives a long-running, iterative loop that asks an LLM to make progress on a
//! task described by a markdown prompt file, re-reading the (possibly
//! agent-edited) file on each iteration and halting when either a completion
//! marker appears or a resource budget is exhausted.
//!
//! # Modules
//!
//! - [`domain`] - prompt file, runtime context, metrics, task queue
//! - [`adapter`] - uniform contract over LLM execution backends
//! - [`context`] - per-iteration prompt assembly, budgeting, measurement
//! - [`skillbook`] - asynchronous reflection worker and durable skill storage
//! - [`subagent`] - file-coordinated subagent spawning and verdict aggregation
//! - [`engine`] - the drive loop itself, tying the above together

#![allow(dead_code)]

pub mod adapter;
pub mod config;
pub mod context;
pub mod domain;
pub mod engine;
pub mod error;
pub mod skillbook;
pub mod subagent;
mod util;

pub use config::RalphConfig;
pub use engine::{IterationEngine, RalphOutcome};
pub use error::RalphError;

pub type Result<T> = std::result::Result<T, RalphError>;
