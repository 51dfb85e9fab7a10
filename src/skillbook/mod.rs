//! Learning / Skillbook Subsystem (ACE) - turns execution traces into durable
//! skills, deduplicates and prunes them, persists them atomically, and
//! injects a top-K subset back into the prompt (spec.md §4.4).
//!
//! Grounded on the teacher's `state::StateManager` actor: an in-memory store
//! guarded by a `tokio::sync::RwLock`, mutated only by a dedicated background
//! task reachable through a bounded `mpsc::Sender`.

mod dedup;
mod reflector;
mod skill;
mod task;
mod worker;

pub use reflector::{AdapterReflector, MockReflector, NewSkillProposal, Reflector, ReflectionRequest, ReflectorOutcome, UpdatedSkillProposal};
pub use skill::{Skill, Skillbook, SkillbookDocument};
pub use task::{ExecutionTrace, LearningTask};
pub use worker::{LearningHandle, LearningWorker};

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum SkillbookError {
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("reflector returned invalid schema: {0}")]
    Schema(String),

    #[error("learning queue is shut down")]
    QueueClosed,
}
