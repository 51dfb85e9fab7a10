//! End-to-end seed scenarios (spec.md §8 "End-to-end scenarios") plus a couple
//! of the boundary behaviors from the same section. Each test exercises real
//! subsystem wiring (`IterationEngine`, the learning worker, the skillbook,
//! the subagent orchestrator) rather than asserting on mocked internals.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use ralph::adapter::mock::MockAdapter;
use ralph::adapter::{AdapterRegistry, Response};
use ralph::config::RalphConfig;
use ralph::engine::CheckpointStore;
use ralph::skillbook::{
    ExecutionTrace, LearningTask, LearningWorker, MockReflector, NewSkillProposal, Reflector,
    ReflectionRequest, ReflectorOutcome, Skill, Skillbook, SkillbookError,
};
use ralph::subagent::{SubagentOrchestrator, SubagentProfileKind, Verdict};
use ralph::{IterationEngine, RalphOutcome};

fn base_config(dir: &std::path::Path) -> RalphConfig {
    let mut config = RalphConfig::default();
    config.agent_dir = dir.join(".agent");
    config.prompt_path = dir.join("PROMPT.md");
    config.learning.enabled = false;
    config.orchestration_enabled = false;
    config.adapter_name = "mock".to_string();
    config
}

fn mock_registry(responses: Vec<Result<Response, ralph::adapter::AdapterError>>) -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(MockAdapter::new("mock", responses)));
    registry
}

// 1. Simple task (1 iteration).
#[tokio::test]
async fn simple_task_completes_in_a_single_iteration() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("PROMPT.md"),
        "- [ ] Create greeting.py that prints 'Hello from validation test!'\nMark `- [x] TASK_COMPLETE` when done.\n",
    )
    .unwrap();

    let config = base_config(dir.path());
    let registry = mock_registry(vec![Ok(Response::synthetic_success(
        "wrote greeting.py\n- [x] TASK_COMPLETE",
    ))]);
    let reflector: Arc<dyn Reflector> = Arc::new(MockReflector::new(ReflectorOutcome::default()));

    let mut engine = IterationEngine::new(config, registry, reflector).unwrap();
    let result = engine.run().await;

    assert_eq!(result.outcome, RalphOutcome::Completed);
    assert_eq!(result.metrics.iterations_attempted, 1);

    let summary = engine.context_summary();
    // 200_000-token default adapter limit; a one-line prompt is nowhere near
    // 1% of it.
    assert!(summary.peak_usage_percent < 1.0);
}

// 2. Budgeted failure.
#[tokio::test]
async fn budgeted_failure_exhausts_iterations_and_learns_from_it() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("PROMPT.md"),
        "- [ ] Prove P = NP in this session.\n",
    )
    .unwrap();

    let mut config = base_config(dir.path());
    config.max_iterations = 3;
    config.learning.enabled = true;
    config.learning.worker_timeout = std::time::Duration::from_secs(2);

    let registry = mock_registry(vec![
        Ok(Response {
            success: false,
            output: "could not make progress".to_string(),
            input_tokens: 10,
            output_tokens: 10,
            duration_seconds: 0.01,
            tool_calls: vec![],
            error: Some("stuck".to_string()),
        });
        3
    ]);
    let reflector: Arc<dyn Reflector> = Arc::new(MockReflector::new(ReflectorOutcome {
        new_skills: vec![NewSkillProposal {
            title: "P=NP is out of scope for a single session".to_string(),
            body: "do not attempt open research problems as a scoped coding task".to_string(),
            tags: vec!["what-didnt-work".to_string()],
        }],
        updated_skills: vec![],
        discard_skills: vec![],
    }));

    let mut engine = IterationEngine::new(config, registry, reflector).unwrap();
    let result = engine.run().await;

    assert_eq!(result.outcome, RalphOutcome::ExhaustedIterations);
    assert_eq!(result.metrics.iterations_attempted, 3);
    assert!(result.metrics.failures >= 1);

    // `run()` awaits the learning worker's drain inside `shutdown()`, so by
    // the time it returns the skill it proposed has been persisted.
    let book = Skillbook::load(dir.path().join(".agent").join("skillbook").join("skillbook.json"));
    assert!(!book.is_empty());
}

// 3. Rollback learning.
#[tokio::test]
async fn rollback_restores_snapshot_and_records_a_rollback_learning_task() {
    let work = tempfile::tempdir().unwrap();
    let agent_dir = work.path().join(".agent");
    std::fs::create_dir_all(&agent_dir).unwrap();
    std::fs::write(work.path().join("PROMPT.md"), "iteration 3 snapshot content").unwrap();

    let mut store = CheckpointStore::new(&agent_dir);
    let checkpoint_at_3 = store.take(work.path(), &agent_dir, 3).unwrap();

    // Iteration 4 corrupts the working tree.
    std::fs::write(work.path().join("PROMPT.md"), "iteration 4 broke everything").unwrap();

    store.rollback(&checkpoint_at_3, work.path(), &agent_dir).unwrap();
    let restored = std::fs::read_to_string(work.path().join("PROMPT.md")).unwrap();
    assert_eq!(restored, "iteration 3 snapshot content");

    let skillbook = Arc::new(RwLock::new(Skillbook::new(agent_dir.join("skillbook").join("skillbook.json"))));
    let reflector: Arc<dyn Reflector> = Arc::new(MockReflector::new(ReflectorOutcome::default()));
    let mut learning_config = ralph::config::LearningConfig::default();
    learning_config.worker_timeout = std::time::Duration::from_secs(2);
    let (handle, join) = LearningWorker::spawn(skillbook, reflector, learning_config);

    let trace = ExecutionTrace {
        prompt_excerpt: String::new(),
        adapter_name: "mock".to_string(),
        duration: std::time::Duration::default(),
        input_tokens: 0,
        output_tokens: 0,
        tool_calls: vec![],
        error: Some("rollback".to_string()),
    };
    handle.enqueue(LearningTask::rollback(4, trace));

    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    handle.request_shutdown();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), join).await;

    let (processed, _dropped, _deduplicated, _schema_errors) = handle.stats();
    assert_eq!(processed, 1);
}

// 4. Deduplication.
struct SequencedReflector {
    outcomes: std::sync::Mutex<std::collections::VecDeque<ReflectorOutcome>>,
}

#[async_trait]
impl Reflector for SequencedReflector {
    async fn reflect(&self, _request: ReflectionRequest) -> Result<ReflectorOutcome, SkillbookError> {
        Ok(self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }
}

#[tokio::test]
async fn near_identical_skill_proposals_deduplicate_to_one() {
    let dir = tempfile::tempdir().unwrap();
    let skillbook = Arc::new(RwLock::new(Skillbook::new(dir.path().join("skillbook.json"))));

    let reflector: Arc<dyn Reflector> = Arc::new(SequencedReflector {
        outcomes: std::sync::Mutex::new(
            vec![
                ReflectorOutcome {
                    new_skills: vec![NewSkillProposal {
                        title: "retry network calls".to_string(),
                        body: "retry transient network failures with exponential backoff and jitter".to_string(),
                        tags: vec!["networking".to_string()],
                    }],
                    updated_skills: vec![],
                    discard_skills: vec![],
                },
                ReflectorOutcome {
                    new_skills: vec![NewSkillProposal {
                        title: "retry network calls with backoff".to_string(),
                        body: "retry transient network failures using exponential backoff with jitter".to_string(),
                        tags: vec!["networking".to_string(), "resilience".to_string()],
                    }],
                    updated_skills: vec![],
                    discard_skills: vec![],
                },
            ]
            .into(),
        ),
    });

    let mut config = ralph::config::LearningConfig::default();
    config.worker_timeout = std::time::Duration::from_secs(2);
    config.similarity_threshold = 0.85;
    let (handle, join) = LearningWorker::spawn(skillbook.clone(), reflector, config);

    let trace = ExecutionTrace {
        prompt_excerpt: "fix flaky network call".to_string(),
        adapter_name: "mock".to_string(),
        duration: std::time::Duration::from_secs(1),
        input_tokens: 10,
        output_tokens: 10,
        tool_calls: vec![],
        error: None,
    };
    for i in 0..2 {
        handle.enqueue(LearningTask {
            task_text: "fix flaky network call".to_string(),
            output_excerpt: "done".to_string(),
            success_flag: true,
            error_detail: None,
            execution_trace: trace.clone(),
            iteration: i,
            timestamp: chrono::Utc::now(),
        });
        // Let each task drain before enqueueing the next so the dedup check
        // sees the first skill already inserted.
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    }

    handle.request_shutdown();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), join).await;

    let book = skillbook.read().await;
    assert_eq!(book.len(), 1, "near-duplicate proposals must collapse into one stored skill");
    let (_, _, deduplicated, _) = handle.stats();
    assert_eq!(deduplicated, 1, "the second proposal should merge into the first instead of inserting");
}

// 5. Top-K injection.
#[tokio::test]
async fn top_k_injection_selects_the_five_highest_ranked_skills() {
    let dir = tempfile::tempdir().unwrap();
    let mut book = Skillbook::new(dir.path().join("skillbook.json"));

    for i in 0..10u32 {
        let mut skill = Skill::new(
            format!("skill-{i}"),
            "handle retries and backoff for flaky network calls".to_string(),
            vec!["networking".to_string()],
        );
        // Higher index -> higher success_correlation -> higher retrieval score,
        // since body/tags are identical across all ten.
        skill.success_correlation = i as f64 / 10.0;
        book.insert(skill);
    }

    let selected = book.select_top_k(
        "please handle retries and backoff for the flaky network call",
        &["networking".to_string()],
        5,
        100_000,
        &|s: &str| s.len() as u64,
    );

    assert_eq!(selected.len(), 5);
    let titles: std::collections::HashSet<_> = selected.iter().map(|s| s.title.clone()).collect();
    for expected in ["skill-9", "skill-8", "skill-7", "skill-6", "skill-5"] {
        assert!(titles.contains(expected), "expected {expected} among the top 5, got {titles:?}");
    }
}

// 6. Subagent aggregation.
#[tokio::test]
async fn subagent_round_fails_when_any_profile_fails() {
    let dir = tempfile::tempdir().unwrap();
    let coordination_root = dir.path().join(".agent").join("coordination");
    let results_dir = coordination_root.join("results");

    let resolver = move |kind: SubagentProfileKind| -> (String, Vec<String>) {
        let script = match kind {
            SubagentProfileKind::Validator => "pass",
            _ => "fail",
        };
        (
            "/bin/sh".to_string(),
            vec![
                "-c".to_string(),
                format!(
                    "cat > '{}/{}.json' <<'EOF'\n{{\"subagent_type\":\"{}\",\"verdict\":\"{}\",\"summary\":\"done\"}}\nEOF\n",
                    results_dir.display(),
                    kind,
                    kind,
                    script,
                ),
            ],
        )
    };

    let mut orchestrator = SubagentOrchestrator::new(&dir.path().join(".agent"), resolver);
    let verdict = orchestrator
        .run_round(
            &[SubagentProfileKind::Validator, SubagentProfileKind::Implementer],
            "implement and validate the change",
            &[],
            |_kind| Vec::new(),
        )
        .await
        .unwrap();

    assert_eq!(verdict, Verdict::Fail);

    let journal = std::fs::read_to_string(coordination_root.join("attempt-journal.md")).unwrap();
    assert!(journal.contains("validator"));
    assert!(journal.contains("implementer"));
}

// Boundary: empty prompt file.
#[tokio::test]
async fn empty_prompt_file_is_a_fatal_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("PROMPT.md"), "   \n").unwrap();

    let config = base_config(dir.path());
    let registry = mock_registry(vec![]);
    let reflector: Arc<dyn Reflector> = Arc::new(MockReflector::new(ReflectorOutcome::default()));

    let mut engine = IterationEngine::new(config, registry, reflector).unwrap();
    let result = engine.run().await;

    match result.outcome {
        RalphOutcome::FatalError(msg) => assert!(msg.contains("prompt file")),
        other => panic!("expected FatalError, got {other:?}"),
    }
}

// Boundary: no adapters registered.
#[tokio::test]
async fn no_registered_adapter_is_a_fatal_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("PROMPT.md"), "- [ ] do something\n").unwrap();

    let config = base_config(dir.path());
    let registry = AdapterRegistry::new();
    let reflector: Arc<dyn Reflector> = Arc::new(MockReflector::new(ReflectorOutcome::default()));

    let mut engine = IterationEngine::new(config, registry, reflector).unwrap();
    let result = engine.run().await;

    match result.outcome {
        RalphOutcome::FatalError(msg) => assert!(msg.contains("unavailable")),
        other => panic!("expected FatalError, got {other:?}"),
    }
}
