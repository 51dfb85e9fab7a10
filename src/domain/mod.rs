//! Domain model: the prompt file, runtime context, metrics, and task queue
//! extracted from spec.md §3.

mod metrics;
mod prompt_file;
mod runtime_context;
mod task_queue;

pub use metrics::Metrics;
pub use prompt_file::PromptFile;
pub use runtime_context::RuntimeContext;
pub use task_queue::{Task, TaskState, TaskQueue};
