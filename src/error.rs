//! Top-level error taxonomy for the orchestrator.
//!
//! Mirrors the closed set of error kinds from the design: transport failures,
//! semantic failures reported by an adapter, reflector schema failures,
//! subagent coordination timeouts, persistence failures, and fatal
//! configuration problems. Module-local error enums convert into this one at
//! the engine boundary. Budget/iteration/time exhaustion is not an error at
//! all here — it is a normal `RalphOutcome` (`ExhaustedIterations`/
//! `ExhaustedTime`) the drive loop returns once its caps are reached.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RalphError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("adapter reported semantic failure: {0}")]
    Semantic(String),

    #[error("reflector returned a schema-invalid response: {0}")]
    Schema(String),

    #[error("subagent coordination timed out: {0}")]
    CoordinationTimeout(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("fatal configuration error: {0}")]
    FatalConfig(String),
}

impl From<crate::adapter::AdapterError> for RalphError {
    fn from(e: crate::adapter::AdapterError) -> Self {
        match e {
            crate::adapter::AdapterError::Network(msg) => RalphError::Transport(msg),
            crate::adapter::AdapterError::RateLimited { .. } => RalphError::Transport(e.to_string()),
            crate::adapter::AdapterError::Api { .. } => RalphError::Transport(e.to_string()),
            crate::adapter::AdapterError::InvalidResponse(msg) => RalphError::Semantic(msg),
            crate::adapter::AdapterError::Unavailable(name) => {
                RalphError::FatalConfig(format!("adapter '{name}' permanently unavailable"))
            }
        }
    }
}

impl From<crate::skillbook::SkillbookError> for RalphError {
    fn from(e: crate::skillbook::SkillbookError) -> Self {
        match e {
            crate::skillbook::SkillbookError::Schema(msg) => RalphError::Schema(msg),
            crate::skillbook::SkillbookError::Persistence(msg) => RalphError::Persistence(msg),
            crate::skillbook::SkillbookError::QueueClosed => {
                RalphError::Persistence("learning queue closed".to_string())
            }
        }
    }
}

impl From<crate::subagent::SubagentError> for RalphError {
    fn from(e: crate::subagent::SubagentError) -> Self {
        match e {
            crate::subagent::SubagentError::Timeout => RalphError::CoordinationTimeout(e.to_string()),
            crate::subagent::SubagentError::ProcessFailure(msg) => RalphError::CoordinationTimeout(msg),
            crate::subagent::SubagentError::Io(msg) => RalphError::Persistence(msg),
        }
    }
}
