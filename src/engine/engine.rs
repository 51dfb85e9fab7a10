//! `IterationEngine::run` - the per-iteration algorithm (spec.md §4.1).
//! Grounded on the teacher's `loop::engine::LoopEngine::run`/`run_iteration`:
//! a status enum, an iteration counter, structured `eyre`-flavored error
//! propagation (here `RalphError`), and a single cooperative drive loop.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::adapter::{AdapterRegistry, Response};
use crate::config::RalphConfig;
use crate::context::{BudgetAllocation, BudgetPolicy, ContextPipeline, ContextTracker, MeasurePoint, SkillExcerpt};
use crate::domain::{Metrics, PromptFile, RuntimeContext, TaskQueue};
use crate::error::RalphError;
use crate::skillbook::{ExecutionTrace, LearningHandle, LearningTask, LearningWorker, Reflector, Skillbook};
use crate::subagent::{select_profile, SubagentOrchestrator, SubagentProfileKind, Verdict};

use super::checkpoint::CheckpointStore;
use super::completion;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RalphOutcome {
    Completed,
    ExhaustedIterations,
    ExhaustedTime,
    Cancelled,
    FatalError(String),
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub outcome: RalphOutcome,
    pub metrics: Metrics,
}

pub struct IterationEngine {
    config: RalphConfig,
    adapters: AdapterRegistry,
    working_dir: PathBuf,
    runtime_context: RuntimeContext,
    prompt_file: PromptFile,
    task_queue: TaskQueue,
    metrics: Metrics,
    tracker: ContextTracker,
    checkpoint_store: CheckpointStore,
    skillbook: Arc<RwLock<Skillbook>>,
    learning_handle: Option<LearningHandle>,
    learning_join: Option<tokio::task::JoinHandle<()>>,
    subagent_orchestrator: Option<SubagentOrchestrator>,
    cancel_flag: Arc<AtomicBool>,
    failures_consecutive: u32,
    history: Vec<String>,
}

impl IterationEngine {
    pub fn new(config: RalphConfig, adapters: AdapterRegistry, reflector: Arc<dyn Reflector>) -> Result<Self, RalphError> {
        let working_dir = std::env::current_dir()
            .map_err(|e| RalphError::FatalConfig(format!("cannot resolve working directory: {e}")))?;
        let runtime_context = RuntimeContext::new(working_dir.clone(), config.prompt_path.clone(), &config.agent_dir);

        ensure_infrastructure(&config)?;

        let skillbook = Arc::new(RwLock::new(Skillbook::load(config.agent_dir.join("skillbook").join("skillbook.json"))));

        let (learning_handle, learning_join) = if config.learning.enabled {
            let (handle, join) = LearningWorker::spawn(skillbook.clone(), reflector, config.learning.clone());
            (Some(handle), Some(join))
        } else {
            (None, None)
        };

        let subagent_orchestrator = if config.orchestration_enabled {
            Some(SubagentOrchestrator::new(&config.agent_dir, default_subagent_resolver))
        } else {
            None
        };

        Ok(Self {
            tracker: ContextTracker::new(&config.agent_dir),
            checkpoint_store: CheckpointStore::new(&config.agent_dir),
            prompt_file: PromptFile::new(config.prompt_path.clone()),
            task_queue: TaskQueue::default(),
            metrics: Metrics::default(),
            skillbook,
            learning_handle,
            learning_join,
            subagent_orchestrator,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            failures_consecutive: 0,
            history: Vec::new(),
            working_dir,
            runtime_context,
            config,
            adapters,
        })
    }

    /// A clone of this handle can be used by the embedding shell to request
    /// cancellation from outside the loop (spec.md §5 "Cancellation").
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel_flag.clone()
    }

    /// Shared handle to the skillbook, for printing a final "skills learned"
    /// count after `run()` returns (spec.md §7 "User-visible behavior").
    pub fn skillbook_handle(&self) -> Arc<RwLock<Skillbook>> {
        self.skillbook.clone()
    }

    pub fn context_summary(&self) -> crate::context::TimelineSummary {
        self.tracker.summary()
    }

    pub async fn run(&mut self) -> RunResult {
        self.metrics.start();
        let start_time = SystemTime::now();
        let start_instant = Instant::now();

        let outcome = loop {
            if self.cancel_flag.load(Ordering::SeqCst) {
                break RalphOutcome::Cancelled;
            }

            if self.metrics.iterations_attempted >= self.config.max_iterations {
                break RalphOutcome::ExhaustedIterations;
            }
            if start_instant.elapsed() >= self.config.max_runtime {
                break RalphOutcome::ExhaustedTime;
            }

            match self.run_iteration(start_time).await {
                Ok(Some(outcome)) => break outcome,
                Ok(None) => continue,
                Err(e) => break RalphOutcome::FatalError(e.to_string()),
            }
        };

        self.shutdown().await;
        RunResult {
            outcome,
            metrics: self.metrics.clone(),
        }
    }

    /// Runs one iteration. `Ok(Some(outcome))` means the loop should stop;
    /// `Ok(None)` means keep looping; `Err` is a fatal error.
    async fn run_iteration(&mut self, start_time: SystemTime) -> Result<Option<RalphOutcome>, RalphError> {
        self.metrics.record_attempt();
        let iteration = self.metrics.iterations_attempted;

        let prompt_text = self.prompt_file.read()?;

        if self.task_queue.is_empty() {
            self.task_queue = TaskQueue::extract(&prompt_text);
        } else {
            self.task_queue.reconcile(&prompt_text);
        }

        let adapter = self.adapters.get(&self.config.adapter_name)?;
        let limit = adapter.context_limit_tokens();
        let budget = BudgetAllocation::compute(limit, BudgetPolicy::default());

        self.tracker
            .record(iteration, MeasurePoint::IterationStart, adapter.count_tokens(&prompt_text), limit);

        let skill_excerpts = {
            let mut book = self.skillbook.write().await;
            book.select_top_k(&prompt_text, &[], self.config.top_k_skills, budget.middle_budget / 2, &|t| adapter.count_tokens(t))
                .into_iter()
                .map(|s| SkillExcerpt { title: s.title, body: s.body })
                .collect::<Vec<_>>()
        };
        let skills_tokens: u64 = skill_excerpts.iter().map(|s| adapter.count_tokens(&s.body)).sum();
        self.tracker
            .record(iteration, MeasurePoint::AfterSkills, skills_tokens, limit);

        let scratchpad = std::fs::read_to_string(&self.runtime_context.scratchpad_path).ok();
        let history_summary = if self.history.is_empty() {
            None
        } else {
            Some(self.history.join("\n"))
        };

        let assembled = ContextPipeline::assemble(
            &self.runtime_context.render(),
            iteration,
            self.config.instruction_condense_at,
            &skill_excerpts,
            scratchpad.as_deref(),
            history_summary.as_deref(),
            &prompt_text,
            budget,
            &|t| adapter.count_tokens(t),
        );
        self.tracker.record(
            iteration,
            MeasurePoint::AfterPrompt,
            adapter.count_tokens(&assembled.text),
            limit,
        );

        let response = if self.config.dry_run {
            info!(iteration, enriched_prompt = %assembled.text, "dry_run: enriched prompt");
            Response::synthetic_success("dry-run: no adapter call made")
        } else if self.config.orchestration_enabled {
            match self.run_via_subagents(&assembled.text).await {
                Ok(response) => response,
                Err(e) => {
                    return self.handle_iteration_failure(e).await;
                }
            }
        } else {
            match self
                .adapters
                .execute_with_fallback(
                    &self.config.adapter_name,
                    &self.config.adapter_fallback,
                    &assembled.text,
                    self.prompt_file.path(),
                    false,
                )
                .await
            {
                Ok((_used, response)) => response,
                Err(e) => return self.handle_iteration_failure(e.into()).await,
            }
        };

        let tool_call_tokens: u64 = response
            .tool_calls
            .iter()
            .map(|call| adapter.count_tokens(&call.name) + adapter.count_tokens(&call.input.to_string()))
            .sum();
        self.tracker.record(iteration, MeasurePoint::AfterTools, tool_call_tokens, limit);

        self.tracker
            .record(iteration, MeasurePoint::AfterResponse, adapter.count_tokens(&response.output), limit);
        let _ = self.tracker.flush();

        let post_prompt_text = self.prompt_file.read().unwrap_or_else(|_| prompt_text.clone());
        self.task_queue.reconcile(&post_prompt_text);
        self.push_history(iteration, &response);

        let validation_dir = self.config.agent_dir.join("validation-evidence");
        if completion::is_complete(&response.output, &post_prompt_text, self.config.enable_validation, &validation_dir, start_time) {
            info!(iteration, "completion marker detected and accepted");
            self.metrics.record_success();
            self.failures_consecutive = 0;
            self.enqueue_learning(iteration, &response, true, None);
            return Ok(Some(RalphOutcome::Completed));
        }

        if response.success {
            self.metrics.record_success();
            self.failures_consecutive = 0;
        } else {
            self.metrics.record_failure();
            self.failures_consecutive += 1;
            warn!(iteration, failures_consecutive = self.failures_consecutive, "adapter reported semantic failure");
        }

        if self.metrics.iterations_completed > 0 && self.metrics.iterations_completed % self.config.checkpoint_interval == 0 {
            if let Err(e) = self.checkpoint_store.take(&self.working_dir, &self.config.agent_dir, iteration) {
                warn!(error = %e, "checkpoint failed");
            }
        }

        self.enqueue_learning(iteration, &response, response.success, None);

        if self.failures_consecutive >= self.config.failure_cap {
            return Err(RalphError::Semantic(format!(
                "{} consecutive failed iterations reached failure_cap={}",
                self.failures_consecutive, self.config.failure_cap
            )));
        }

        Ok(None)
    }

    async fn handle_iteration_failure(&mut self, error: RalphError) -> Result<Option<RalphOutcome>, RalphError> {
        self.metrics.record_failure();
        self.failures_consecutive += 1;
        warn!(error = %error, failures_consecutive = self.failures_consecutive, "iteration failed");

        if matches!(error, RalphError::FatalConfig(_)) {
            return Err(error);
        }
        if self.failures_consecutive >= self.config.failure_cap {
            return Err(error);
        }
        Ok(None)
    }

    async fn run_via_subagents(&mut self, prompt_text: &str) -> Result<Response, RalphError> {
        let kind = select_profile(prompt_text);
        let orchestrator = self
            .subagent_orchestrator
            .as_mut()
            .expect("orchestration_enabled implies an orchestrator exists");

        let task_description = self
            .task_queue
            .active_task()
            .map(|t| t.text.clone())
            .unwrap_or_else(|| "continue the current task".to_string());

        let verdict = orchestrator
            .run_round(&[kind], &task_description, &[], |_kind| Vec::new())
            .await?;

        Ok(Response {
            success: verdict == Verdict::Pass,
            output: format!("subagent round ({kind}) verdict: {verdict:?}"),
            input_tokens: 0,
            output_tokens: 0,
            duration_seconds: 0.0,
            tool_calls: Vec::new(),
            error: if verdict == Verdict::Fail {
                Some("subagent verdict: fail".to_string())
            } else {
                None
            },
        })
    }

    fn push_history(&mut self, iteration: u32, response: &Response) {
        let excerpt: String = response.output.chars().take(160).collect();
        self.history.push(format!("iter {iteration}: {excerpt}"));
        const MAX_HISTORY_ENTRIES: usize = 50;
        if self.history.len() > MAX_HISTORY_ENTRIES {
            let excess = self.history.len() - MAX_HISTORY_ENTRIES;
            self.history.drain(0..excess);
        }
    }

    fn enqueue_learning(&self, iteration: u32, response: &Response, success: bool, error_detail: Option<String>) {
        let Some(handle) = &self.learning_handle else { return };

        let task_text = self
            .task_queue
            .active_task()
            .map(|t| t.text.clone())
            .unwrap_or_else(|| "unnamed task".to_string());

        let trace = ExecutionTrace {
            prompt_excerpt: task_text.chars().take(200).collect(),
            adapter_name: self.config.adapter_name.clone(),
            duration: std::time::Duration::from_secs_f64(response.duration_seconds),
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            tool_calls: response.tool_calls.clone(),
            error: response.error.clone(),
        };

        handle.enqueue(LearningTask {
            task_text,
            output_excerpt: response.output.chars().take(500).collect(),
            success_flag: success,
            error_detail,
            execution_trace: trace,
            iteration,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Roll back to the most recent checkpoint strictly prior to the current
    /// iteration, incrementing `rollback_count` and enqueuing a
    /// `LearningTask` describing the failure (spec.md §4.1 "Checkpointing").
    pub fn rollback_to_last_checkpoint(&mut self, failing_iteration: u32) -> Result<(), RalphError> {
        let checkpoint = self
            .checkpoint_store
            .most_recent_before(failing_iteration)
            .cloned()
            .ok_or_else(|| RalphError::Persistence("no checkpoint available to roll back to".to_string()))?;

        self.checkpoint_store
            .rollback(&checkpoint, &self.working_dir, &self.config.agent_dir)?;
        self.metrics.record_rollback();

        if let Some(handle) = &self.learning_handle {
            let trace = ExecutionTrace {
                prompt_excerpt: String::new(),
                adapter_name: self.config.adapter_name.clone(),
                duration: std::time::Duration::default(),
                input_tokens: 0,
                output_tokens: 0,
                tool_calls: Vec::new(),
                error: Some("rollback".to_string()),
            };
            handle.enqueue(LearningTask::rollback(failing_iteration, trace));
        }
        Ok(())
    }

    async fn shutdown(&mut self) {
        info!("IterationEngine::shutdown: called");
        if let Some(handle) = &self.learning_handle {
            handle.request_shutdown();
        }
        if let Some(join) = self.learning_join.take() {
            let timeout = self.config.learning.worker_timeout + std::time::Duration::from_secs(1);
            if tokio::time::timeout(timeout, join).await.is_err() {
                warn!("learning worker did not drain in time; abandoning after final flush attempt");
            }
        }
        let _ = self.tracker.flush();
    }
}

fn ensure_infrastructure(config: &RalphConfig) -> Result<(), RalphError> {
    for sub in ["logs", "skillbook", "metrics"] {
        std::fs::create_dir_all(config.agent_dir.join(sub))
            .map_err(|e| RalphError::FatalConfig(format!("cannot create {sub} dir: {e}")))?;
    }
    if config.orchestration_enabled {
        std::fs::create_dir_all(config.agent_dir.join("coordination"))
            .map_err(|e| RalphError::FatalConfig(format!("cannot create coordination dir: {e}")))?;
    }
    Ok(())
}

fn default_subagent_resolver(kind: SubagentProfileKind) -> (String, Vec<String>) {
    let binary = std::env::var("RALPH_SUBAGENT_BINARY").unwrap_or_else(|_| "true".to_string());
    (binary, vec!["--profile".to_string(), kind.to_string()])
}
