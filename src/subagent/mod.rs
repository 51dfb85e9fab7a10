//! Subagent Orchestration - a file-coordinated protocol for spawning
//! specialized subagent processes, aggregating their structured verdicts, and
//! feeding results back into the main loop (spec.md §4.5).
//!
//! Grounded on the teacher's `coordinator::core` (register/dispatch, typed
//! messages) and `worktree::manager` (subprocess spawn-with-timeout, typed
//! error on non-zero exit).

mod coordination;
mod orchestrator;
mod profile;
mod result;

pub use coordination::CoordinationState;
pub use orchestrator::{SubagentOrchestrator, SubagentState};
pub use profile::{select_profile, SubagentProfile, SubagentProfileKind};
pub use result::{aggregate_verdicts, SubagentResult, Verdict};

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum SubagentError {
    #[error("subagent coordination timed out")]
    Timeout,

    #[error("subagent process failed: {0}")]
    ProcessFailure(String),

    #[error("coordination I/O error: {0}")]
    Io(String),
}
