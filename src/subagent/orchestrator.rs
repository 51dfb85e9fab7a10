//! Spawn/aggregate state machine (spec.md §4.5 "Spawning protocol", "State
//! machine"). Grounded on the teacher's `coordinator::core` dispatch loop and
//! `worktree::manager`'s subprocess spawn-with-timeout pattern.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use super::coordination::CoordinationState;
use super::profile::{SubagentProfile, SubagentProfileKind};
use super::result::{aggregate_verdicts, SubagentResult, Verdict};
use super::SubagentError;

/// Minimum per-subagent spawn timeout (spec.md §4.5: "a per-call timeout of
/// at least 300 seconds").
pub const MIN_SPAWN_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubagentState {
    Idle,
    Prepared,
    Spawned,
    Aggregated,
}

pub struct SubagentOrchestrator {
    coord: CoordinationState,
    state: SubagentState,
    /// Resolves a profile kind to the subprocess to run: (binary, args).
    resolver: Box<dyn Fn(SubagentProfileKind) -> (String, Vec<String>) + Send + Sync>,
    spawn_timeout: Duration,
}

impl SubagentOrchestrator {
    pub fn new(
        agent_dir: &Path,
        resolver: impl Fn(SubagentProfileKind) -> (String, Vec<String>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            coord: CoordinationState::new(agent_dir),
            state: SubagentState::Idle,
            resolver: Box::new(resolver),
            spawn_timeout: MIN_SPAWN_TIMEOUT,
        }
    }

    pub fn state(&self) -> SubagentState {
        self.state
    }

    /// Drive one full IDLE -> PREPARED -> SPAWNED -> AGGREGATED -> IDLE round
    /// for the given set of profiles, returning the aggregated verdict.
    pub async fn run_round(
        &mut self,
        profiles: &[SubagentProfileKind],
        task_description: &str,
        criteria: &[String],
        skills_by_profile: impl Fn(SubagentProfileKind) -> Vec<String>,
    ) -> Result<Verdict, SubagentError> {
        info!(profiles = ?profiles, "SubagentOrchestrator::run_round: called");
        self.coord.ensure_initialized()?;

        let shared_context = format!(
            "# Shared attempt context\n\nTask: {task_description}\nCriteria:\n- {}\n",
            criteria.join("\n- ")
        );
        self.coord.write_shared_context(&shared_context)?;
        self.coord.clear_results()?;
        self.state = SubagentState::Prepared;

        self.state = SubagentState::Spawned;
        let mut results = Vec::with_capacity(profiles.len());
        for &kind in profiles {
            let profile = SubagentProfile::for_kind(kind);
            let skills = skills_by_profile(kind);
            let prompt = profile.render(task_description, criteria, &skills, &self.coord.root_for_display());
            let result = self.spawn_one(kind, &prompt).await;
            results.push(result);
        }

        self.state = SubagentState::Aggregated;
        let verdict = aggregate_verdicts(&results);

        let journal_line = format!(
            "attempt: profiles={:?} verdict={:?}",
            profiles.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
            verdict,
        );
        self.coord.append_journal_line(&journal_line)?;

        self.state = SubagentState::Idle;
        Ok(verdict)
    }

    async fn spawn_one(&self, kind: SubagentProfileKind, prompt: &str) -> SubagentResult {
        let (binary, args) = (self.resolver)(kind);
        let result_path = self.coord.results_dir().join(format!("{kind}.json"));

        debug!(%kind, %binary, "spawn_one: spawning subagent");
        let spawn_result = self.run_subprocess(&binary, &args, prompt).await;

        match spawn_result {
            Ok(status) if status.success() => match std::fs::read(&result_path) {
                Ok(raw) => match serde_json::from_slice::<SubagentResult>(&raw) {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(%kind, error = %e, "subagent result file malformed");
                        SubagentResult::synthesize_failure(kind.to_string(), format!("malformed result: {e}"))
                    }
                },
                Err(e) => {
                    warn!(%kind, error = %e, "subagent did not write a result file");
                    SubagentResult::synthesize_failure(kind.to_string(), format!("missing result file: {e}"))
                }
            },
            Ok(status) => {
                warn!(%kind, ?status, "subagent exited non-zero");
                SubagentResult::synthesize_failure(kind.to_string(), format!("exit status {status}"))
            }
            Err(SubagentError::Timeout) => {
                warn!(%kind, "subagent timed out");
                SubagentResult::synthesize_failure(kind.to_string(), "coordination timeout")
            }
            Err(e) => {
                warn!(%kind, error = %e, "subagent spawn failed");
                SubagentResult::synthesize_failure(kind.to_string(), e.to_string())
            }
        }
    }

    async fn run_subprocess(
        &self,
        binary: &str,
        args: &[String],
        prompt: &str,
    ) -> Result<std::process::ExitStatus, SubagentError> {
        use tokio::io::AsyncWriteExt;

        let mut child = Command::new(binary)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SubagentError::ProcessFailure(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(prompt.as_bytes()).await;
        }

        match tokio::time::timeout(self.spawn_timeout, child.wait()).await {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(e)) => Err(SubagentError::ProcessFailure(e.to_string())),
            Err(_) => Err(SubagentError::Timeout),
        }
    }
}

impl CoordinationState {
    fn root_for_display(&self) -> std::path::PathBuf {
        self.results_dir().parent().unwrap().to_path_buf()
    }
}
