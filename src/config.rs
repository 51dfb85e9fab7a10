//! Configuration data records.
//!
//! The CLI argument parser and config-file format are external to this crate
//! (see spec.md §1 Non-goals); `RalphConfig` and `LearningConfig` are the plain
//! data records the engine and learning worker are constructed from. An
//! `from_env` convenience mirrors the teacher's pattern of resolving provider
//! credentials from the process environment.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for a single `IterationEngine::run` invocation.
#[derive(Debug, Clone)]
pub struct RalphConfig {
    /// Path to the mutable markdown prompt file.
    pub prompt_path: PathBuf,

    /// Directory rooted at `./.agent` by default; holds logs, skillbook,
    /// metrics, coordination state.
    pub agent_dir: PathBuf,

    /// Name of the adapter to use, resolved through the adapter registry.
    pub adapter_name: String,

    /// Fallback adapter names consulted only on transport failure.
    pub adapter_fallback: Vec<String>,

    /// Hard cap on iterations attempted.
    pub max_iterations: u32,

    /// Hard cap on wall-clock runtime for the whole run.
    pub max_runtime: Duration,

    /// Take a checkpoint every N completed iterations.
    pub checkpoint_interval: u32,

    /// Consecutive iteration failures before the loop aborts as fatal.
    pub failure_cap: u32,

    /// Whether subagent orchestration replaces direct adapter calls.
    pub orchestration_enabled: bool,

    /// Whether completion additionally requires validation evidence.
    pub enable_validation: bool,

    /// When true, no adapter call is made; a synthetic successful response is
    /// substituted and the enriched prompt is logged instead.
    pub dry_run: bool,

    /// Iteration number at which the instruction block switches from the full
    /// variant to the condensed variant (spec §4.3).
    pub instruction_condense_at: u32,

    /// Number of skills injected per iteration (Top-K), at most.
    pub top_k_skills: usize,

    pub learning: LearningConfig,
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            prompt_path: PathBuf::from("PROMPT.md"),
            agent_dir: PathBuf::from("./.agent"),
            adapter_name: "anthropic".to_string(),
            adapter_fallback: Vec::new(),
            max_iterations: 100,
            max_runtime: Duration::from_secs(60 * 60 * 4),
            checkpoint_interval: 5,
            failure_cap: 5,
            orchestration_enabled: false,
            enable_validation: false,
            dry_run: false,
            instruction_condense_at: 6,
            top_k_skills: 5,
            learning: LearningConfig::default(),
        }
    }
}

impl RalphConfig {
    /// Build a config from environment variables, falling back to defaults for
    /// anything unset. Mirrors the teacher's `LlmConfig`/`ResolvedLlmConfig`
    /// environment-resolution convenience.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("RALPH_PROMPT_PATH") {
            config.prompt_path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("RALPH_AGENT_DIR") {
            config.agent_dir = PathBuf::from(dir);
        }
        if let Ok(name) = std::env::var("RALPH_ADAPTER") {
            config.adapter_name = name;
        }
        if let Ok(n) = std::env::var("RALPH_MAX_ITERATIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or(())
        {
            config.max_iterations = n;
        }

        config
    }
}

/// Recognized learning-subsystem options (spec.md §3 `LearningConfig`).
#[derive(Debug, Clone)]
pub struct LearningConfig {
    pub model: String,
    pub max_skills: usize,
    pub prune_threshold: usize,
    pub deduplication_enabled: bool,
    pub similarity_threshold: f64,
    pub worker_timeout: Duration,
    /// Whether the learning/skillbook subsystem is active; gates whether
    /// `IterationEngine::new` spawns the `LearningWorker` at all.
    pub enabled: bool,
}

impl Default for LearningConfig {
    fn default() -> Self {
        let max_skills = 200;
        Self {
            model: "claude-haiku".to_string(),
            max_skills,
            prune_threshold: max_skills,
            deduplication_enabled: true,
            similarity_threshold: 0.85,
            worker_timeout: Duration::from_secs(30),
            enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prune_threshold_matches_max_skills() {
        let cfg = LearningConfig::default();
        assert_eq!(cfg.prune_threshold, cfg.max_skills);
    }

    #[test]
    fn default_similarity_threshold_is_085() {
        assert_eq!(LearningConfig::default().similarity_threshold, 0.85);
    }
}
