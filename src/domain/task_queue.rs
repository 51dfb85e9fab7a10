//! TaskQueue - GitHub-flavored checkbox items parsed from the prompt file
//! (spec.md §3, §4.1 "Task extraction").

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    InProgress,
    Done,
    Blocked,
}

#[derive(Debug, Clone)]
pub struct Task {
    pub text: String,
    pub state: TaskState,
}

#[derive(Debug, Clone, Default)]
pub struct TaskQueue {
    tasks: Vec<Task>,
}

impl TaskQueue {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// The currently-active task: the first `in_progress` entry, or else the
    /// first `pending` entry.
    pub fn active_task(&self) -> Option<&Task> {
        self.tasks
            .iter()
            .find(|t| t.state == TaskState::InProgress)
            .or_else(|| self.tasks.iter().find(|t| t.state == TaskState::Pending))
    }

    /// Parse checkbox lines out of a prompt file's markdown, preserving order.
    /// `- [ ]` becomes pending, `- [x]` (case-insensitive X) becomes done,
    /// `- [!]` becomes blocked — the marker instructions.rs's full block asks
    /// the agent to write ("mark the current task `blocked`... explain why in
    /// the prompt file") when it cannot make progress. The first pending item
    /// is promoted to in_progress.
    pub fn extract(markdown: &str) -> Self {
        debug!(len = markdown.len(), "TaskQueue::extract: called");
        let mut tasks = Vec::new();

        for line in markdown.lines() {
            let trimmed = line.trim_start();
            if let Some(rest) = trimmed.strip_prefix("- [ ] ").or_else(|| trimmed.strip_prefix("- [ ]")) {
                tasks.push(Task {
                    text: rest.trim().to_string(),
                    state: TaskState::Pending,
                });
            } else if let Some(rest) = strip_blocked(trimmed) {
                tasks.push(Task {
                    text: rest.trim().to_string(),
                    state: TaskState::Blocked,
                });
            } else if let Some(rest) = strip_checked(trimmed) {
                tasks.push(Task {
                    text: rest.trim().to_string(),
                    state: TaskState::Done,
                });
            }
        }

        let mut queue = Self { tasks };
        queue.promote_first_pending();
        queue
    }

    /// Re-extract against a new version of the prompt file, preserving
    /// in_progress status for a task whose text changed in place but did not
    /// disappear, per spec.md §4.1's task-extraction rule.
    pub fn reconcile(&mut self, markdown: &str) {
        let previous_in_progress = self
            .tasks
            .iter()
            .find(|t| t.state == TaskState::InProgress)
            .map(|t| t.text.clone());

        let mut fresh = Self::extract(markdown);

        if let Some(prev_text) = previous_in_progress {
            // If the exact previous text is no longer present as pending, the
            // agent either completed it (handled by Done parsing above) or
            // edited it in place — in the latter case the leading pending item
            // (which the fresh extraction just promoted) keeps its in_progress
            // status rather than reverting to pending, as long as a pending
            // item still exists at all.
            let still_pending_unchanged = fresh
                .tasks
                .iter()
                .any(|t| t.text == prev_text && t.state == TaskState::Pending);
            if !still_pending_unchanged {
                if let Some(first_pending) = fresh.tasks.iter_mut().find(|t| t.state == TaskState::Pending) {
                    first_pending.state = TaskState::InProgress;
                }
            }
        }

        *self = fresh;
    }

    fn promote_first_pending(&mut self) {
        if let Some(first_pending) = self.tasks.iter_mut().find(|t| t.state == TaskState::Pending) {
            first_pending.state = TaskState::InProgress;
        }
    }
}

fn strip_checked(trimmed: &str) -> Option<&str> {
    for prefix in ["- [x] ", "- [x]", "- [X] ", "- [X]"] {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return Some(rest);
        }
    }
    None
}

fn strip_blocked(trimmed: &str) -> Option<&str> {
    for prefix in ["- [!] ", "- [!]"] {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return Some(rest);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_marker_is_classified_and_skipped_for_active_task() {
        let md = "- [!] waiting on upstream API access\n- [ ] write tests\n";
        let queue = TaskQueue::extract(md);
        assert_eq!(queue.tasks()[0].state, TaskState::Blocked);
        assert_eq!(queue.active_task().unwrap().text, "write tests");
    }

    #[test]
    fn pending_and_done_are_classified() {
        let md = "- [ ] write tests\n- [x] read the spec\n";
        let queue = TaskQueue::extract(md);
        assert_eq!(queue.tasks().len(), 2);
        assert_eq!(queue.tasks()[1].state, TaskState::Done);
    }

    #[test]
    fn first_pending_becomes_in_progress() {
        let md = "- [ ] first\n- [ ] second\n";
        let queue = TaskQueue::extract(md);
        assert_eq!(queue.tasks()[0].state, TaskState::InProgress);
        assert_eq!(queue.tasks()[1].state, TaskState::Pending);
        assert_eq!(queue.active_task().unwrap().text, "first");
    }

    #[test]
    fn order_is_preserved() {
        let md = "- [ ] c\n- [ ] a\n- [ ] b\n";
        let queue = TaskQueue::extract(md);
        let texts: Vec<_> = queue.tasks().iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["c", "a", "b"]);
    }

    #[test]
    fn extraction_is_idempotent_on_unchanged_file() {
        let md = "- [ ] first\n- [x] second\n";
        let a = TaskQueue::extract(md);
        let b = TaskQueue::extract(md);
        assert_eq!(a.tasks().len(), b.tasks().len());
        for (x, y) in a.tasks().iter().zip(b.tasks().iter()) {
            assert_eq!(x.text, y.text);
            assert_eq!(x.state, y.state);
        }
    }

    #[test]
    fn in_place_edit_keeps_in_progress() {
        let mut queue = TaskQueue::extract("- [ ] draft the outline\n- [ ] write section two\n");
        assert_eq!(queue.active_task().unwrap().text, "draft the outline");

        queue.reconcile("- [ ] draft the outline (v2, adding detail)\n- [ ] write section two\n");
        assert_eq!(queue.tasks()[0].state, TaskState::InProgress);
    }

    #[test]
    fn disappearing_task_is_marked_done() {
        let mut queue = TaskQueue::extract("- [ ] draft the outline\n- [ ] write section two\n");
        queue.reconcile("- [x] draft the outline\n- [ ] write section two\n");
        assert_eq!(queue.tasks()[0].state, TaskState::Done);
        assert_eq!(queue.tasks()[1].state, TaskState::InProgress);
    }
}
