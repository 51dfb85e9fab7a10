//! The background learning worker: the single consumer of `LearningTask`s,
//! the sole writer of the in-memory skillbook (spec.md §4.4 "Concurrency
//! model"). Grounded on the teacher's `state::StateManager` actor: a
//! dedicated `tokio::spawn`ed loop, an `Arc<RwLock<_>>`-guarded store, and a
//! handle type wrapping the producer side so callers never touch the actor
//! directly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};

use crate::config::LearningConfig;

use super::dedup::{find_duplicate, pruning_score};
use super::skill::{Skill, Skillbook};
use super::task::LearningTask;
use super::reflector::{ReflectionRequest, Reflector};
use super::SkillbookError;

const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Default)]
pub struct WorkerStats {
    pub processed: AtomicU64,
    pub dropped: AtomicU64,
    pub deduplicated: AtomicU64,
    pub schema_errors: AtomicU64,
}

struct Inner {
    queue: std::sync::Mutex<VecDeque<LearningTask>>,
    notify: Notify,
    shutdown: Notify,
    shutting_down: std::sync::atomic::AtomicBool,
    stats: WorkerStats,
    capacity: usize,
}

/// Producer-side handle: the only way other components (engine, rollback
/// path) talk to the learning worker. Enqueue is always non-blocking.
#[derive(Clone)]
pub struct LearningHandle {
    inner: Arc<Inner>,
}

impl LearningHandle {
    /// Enqueue a task without blocking. If the queue is at capacity, the
    /// oldest non-error in-flight task is dropped and counted (spec.md §4.4).
    pub fn enqueue(&self, task: LearningTask) {
        let mut queue = self.inner.queue.lock().unwrap();
        if queue.len() >= self.inner.capacity {
            let evict_idx = queue.iter().position(|t| t.success_flag).unwrap_or(0);
            queue.remove(evict_idx);
            self.inner.stats.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(task);
        drop(queue);
        self.inner.notify.notify_one();
    }

    pub fn stats(&self) -> (u64, u64, u64, u64) {
        (
            self.inner.stats.processed.load(Ordering::Relaxed),
            self.inner.stats.dropped.load(Ordering::Relaxed),
            self.inner.stats.deduplicated.load(Ordering::Relaxed),
            self.inner.stats.schema_errors.load(Ordering::Relaxed),
        )
    }

    /// Signal the worker to stop accepting further processing once drained.
    pub fn request_shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        self.inner.shutdown.notify_waiters();
        self.inner.notify.notify_one();
    }

    fn queue_len(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }
}

pub struct LearningWorker;

impl LearningWorker {
    /// Spawn the worker loop and return the handle producers use. The worker
    /// drains for up to `config.worker_timeout` on shutdown, then is
    /// abandoned after a final flush attempt (spec.md §4.4, §5).
    pub fn spawn(
        skillbook: Arc<RwLock<Skillbook>>,
        reflector: Arc<dyn Reflector>,
        config: LearningConfig,
    ) -> (LearningHandle, tokio::task::JoinHandle<()>) {
        let inner = Arc::new(Inner {
            queue: std::sync::Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            shutdown: Notify::new(),
            shutting_down: std::sync::atomic::AtomicBool::new(false),
            stats: WorkerStats::default(),
            capacity: DEFAULT_QUEUE_CAPACITY,
        });
        let handle = LearningHandle { inner: inner.clone() };

        let join = tokio::spawn(run_loop(inner, skillbook, reflector, config));
        (handle, join)
    }
}

async fn run_loop(
    inner: Arc<Inner>,
    skillbook: Arc<RwLock<Skillbook>>,
    reflector: Arc<dyn Reflector>,
    config: LearningConfig,
) {
    info!("LearningWorker: started");
    loop {
        let next = {
            let mut queue = inner.queue.lock().unwrap();
            queue.pop_front()
        };

        let task = match next {
            Some(task) => task,
            None => {
                if inner.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                tokio::select! {
                    _ = inner.notify.notified() => continue,
                    _ = tokio::time::sleep(Duration::from_millis(500)) => continue,
                }
            }
        };

        match process_task(&skillbook, reflector.as_ref(), &config, &task).await {
            Err(e) => {
                warn!(error = %e, "learning task failed, discarding");
                inner.stats.schema_errors.fetch_add(1, Ordering::Relaxed);
            }
            Ok(deduplicated) => {
                inner.stats.processed.fetch_add(1, Ordering::Relaxed);
                if deduplicated > 0 {
                    inner.stats.deduplicated.fetch_add(deduplicated, Ordering::Relaxed);
                }
            }
        }
    }

    // Final drain within worker_timeout before giving up.
    let deadline = tokio::time::Instant::now() + config.worker_timeout;
    while tokio::time::Instant::now() < deadline {
        let next = {
            let mut queue = inner.queue.lock().unwrap();
            queue.pop_front()
        };
        let Some(task) = next else { break };
        if let Ok(deduplicated) = process_task(&skillbook, reflector.as_ref(), &config, &task).await {
            if deduplicated > 0 {
                inner.stats.deduplicated.fetch_add(deduplicated, Ordering::Relaxed);
            }
        }
        inner.stats.processed.fetch_add(1, Ordering::Relaxed);
    }

    let book = skillbook.read().await;
    if let Err(e) = book.persist() {
        warn!(error = %e, "final skillbook flush on shutdown failed");
    }
    info!("LearningWorker: stopped");
}

/// Returns the number of new-skill proposals that merged into an existing
/// skill instead of being inserted, so the caller can fold it into
/// `WorkerStats::deduplicated`.
async fn process_task(
    skillbook: &Arc<RwLock<Skillbook>>,
    reflector: &dyn Reflector,
    config: &LearningConfig,
    task: &LearningTask,
) -> Result<u64, SkillbookError> {
    debug!(iteration = task.iteration, success = task.success_flag, "process_task: called");

    let existing_titles: Vec<String> = {
        let book = skillbook.read().await;
        book.skills().iter().map(|s| s.title.clone()).collect()
    };

    let evidence = if let Some(err) = &task.error_detail {
        format!("{err}\n{}", task.execution_trace.error.clone().unwrap_or_default())
    } else {
        task.output_excerpt.clone()
    };

    let request = ReflectionRequest::new(&task.task_text, task.success_flag, &evidence, existing_titles);
    let outcome = reflector.reflect(request).await?;

    let mut book = skillbook.write().await;
    let mut deduplicated = 0u64;

    for proposal in outcome.new_skills {
        if config.deduplication_enabled {
            if let Some((existing_id, _sim)) = find_duplicate(
                book.skills(),
                &proposal.title,
                &proposal.body,
                config.similarity_threshold,
            )
            .map(|(s, sim)| (s.id.clone(), sim))
            {
                if let Some(existing) = book.find_mut(&existing_id) {
                    for tag in proposal.tags {
                        if !existing.tags.contains(&tag) {
                            existing.tags.push(tag);
                        }
                    }
                    existing.touch();
                    deduplicated += 1;
                    continue;
                }
            }
        }
        book.insert(Skill::new(proposal.title, proposal.body, proposal.tags));
    }

    for update in outcome.updated_skills {
        if let Some(existing) = book.find_mut(&update.id) {
            existing.body = update.body;
        }
    }

    for id in outcome.discard_skills {
        book.remove(&id);
    }

    // spec.md §3 Skillbook invariant: size <= max_skills, independent of
    // whatever prune_threshold a caller has configured.
    let effective_threshold = config.prune_threshold.min(config.max_skills);
    if book.len() > effective_threshold {
        book.prune_to(effective_threshold, pruning_score);
    }

    book.persist()?;
    drop(book);

    if deduplicated > 0 {
        debug!(deduplicated, "process_task: skills_deduplicated event");
    }

    Ok(deduplicated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skillbook::reflector::{MockReflector, NewSkillProposal, ReflectorOutcome};
    use crate::skillbook::task::ExecutionTrace;
    use chrono::Utc;

    fn sample_trace() -> ExecutionTrace {
        ExecutionTrace {
            prompt_excerpt: "do thing".to_string(),
            adapter_name: "mock".to_string(),
            duration: Duration::from_secs(1),
            input_tokens: 10,
            output_tokens: 10,
            tool_calls: vec![],
            error: None,
        }
    }

    #[tokio::test]
    async fn enqueued_task_is_processed_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let skillbook = Arc::new(RwLock::new(Skillbook::new(dir.path().join("skillbook.json"))));
        let reflector: Arc<dyn Reflector> = Arc::new(MockReflector::new(ReflectorOutcome {
            new_skills: vec![NewSkillProposal {
                title: "use retries".to_string(),
                body: "retry transient failures with backoff".to_string(),
                tags: vec!["networking".to_string()],
            }],
            updated_skills: vec![],
            discard_skills: vec![],
        }));
        let config = LearningConfig::default();

        let (handle, join) = LearningWorker::spawn(skillbook.clone(), reflector, config);
        handle.enqueue(LearningTask {
            task_text: "fix flaky network call".to_string(),
            output_excerpt: "done".to_string(),
            success_flag: true,
            error_detail: None,
            execution_trace: sample_trace(),
            iteration: 1,
            timestamp: Utc::now(),
        });

        // give the actor a chance to drain the single task
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.request_shutdown();
        let _ = tokio::time::timeout(Duration::from_secs(2), join).await;

        let book = skillbook.read().await;
        assert_eq!(book.len(), 1);
        assert_eq!(book.skills()[0].title, "use retries");
    }

    #[test]
    fn enqueue_drops_oldest_non_error_task_when_full() {
        let inner = Arc::new(Inner {
            queue: std::sync::Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            shutdown: Notify::new(),
            shutting_down: std::sync::atomic::AtomicBool::new(false),
            stats: WorkerStats::default(),
            capacity: 2,
        });
        let handle = LearningHandle { inner };

        let make_task = |text: &str, success: bool| LearningTask {
            task_text: text.to_string(),
            output_excerpt: String::new(),
            success_flag: success,
            error_detail: None,
            execution_trace: sample_trace(),
            iteration: 1,
            timestamp: Utc::now(),
        };

        handle.enqueue(make_task("first", true));
        handle.enqueue(make_task("second", false));
        handle.enqueue(make_task("third", true));

        assert_eq!(handle.queue_len(), 2);
        let (_, dropped, _, _) = handle.stats();
        assert_eq!(dropped, 1);
    }
}
