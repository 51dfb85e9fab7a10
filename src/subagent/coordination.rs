//! On-disk CoordinationState directory lifecycle (spec.md §3
//! "CoordinationState", §4.5 "Spawning protocol"). Grounded on the teacher's
//! `coordinator::persistence::EventStore` on-disk journal under a
//! coordination directory.

use std::io::Write;
use std::path::PathBuf;

use tracing::debug;

use super::SubagentError;

pub struct CoordinationState {
    root: PathBuf,
}

impl CoordinationState {
    pub fn new(agent_dir: &std::path::Path) -> Self {
        Self {
            root: agent_dir.join("coordination"),
        }
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join("results")
    }

    pub fn shared_context_path(&self) -> PathBuf {
        self.root.join("shared-context.md")
    }

    pub fn current_attempt_path(&self) -> PathBuf {
        self.root.join("current-attempt.json")
    }

    pub fn attempt_journal_path(&self) -> PathBuf {
        self.root.join("attempt-journal.md")
    }

    /// Initialize the directory tree if it does not already exist (spec.md
    /// §3: "initialized at loop start if subagent orchestration is enabled").
    pub fn ensure_initialized(&self) -> Result<(), SubagentError> {
        debug!(root = %self.root.display(), "CoordinationState::ensure_initialized: called");
        std::fs::create_dir_all(self.results_dir()).map_err(|e| SubagentError::Io(e.to_string()))?;
        if !self.attempt_journal_path().exists() {
            std::fs::write(self.attempt_journal_path(), "").map_err(|e| SubagentError::Io(e.to_string()))?;
        }
        Ok(())
    }

    pub fn write_shared_context(&self, content: &str) -> Result<(), SubagentError> {
        std::fs::write(self.shared_context_path(), content).map_err(|e| SubagentError::Io(e.to_string()))
    }

    pub fn write_current_attempt(&self, json: &serde_json::Value) -> Result<(), SubagentError> {
        let serialized = serde_json::to_vec_pretty(json).map_err(|e| SubagentError::Io(e.to_string()))?;
        std::fs::write(self.current_attempt_path(), serialized).map_err(|e| SubagentError::Io(e.to_string()))
    }

    /// Clear the results subtree between aggregation rounds (spec.md §3:
    /// "per-iteration subtree cleared between aggregation rounds").
    pub fn clear_results(&self) -> Result<(), SubagentError> {
        let dir = self.results_dir();
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| SubagentError::Io(e.to_string()))?;
        }
        std::fs::create_dir_all(&dir).map_err(|e| SubagentError::Io(e.to_string()))
    }

    pub fn append_journal_line(&self, line: &str) -> Result<(), SubagentError> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.attempt_journal_path())
            .map_err(|e| SubagentError::Io(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| SubagentError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_initialized_creates_results_dir_and_journal() {
        let dir = tempfile::tempdir().unwrap();
        let coord = CoordinationState::new(dir.path());
        coord.ensure_initialized().unwrap();

        assert!(coord.results_dir().is_dir());
        assert!(coord.attempt_journal_path().exists());
    }

    #[test]
    fn clear_results_empties_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let coord = CoordinationState::new(dir.path());
        coord.ensure_initialized().unwrap();
        std::fs::write(coord.results_dir().join("validator.json"), "{}").unwrap();

        coord.clear_results().unwrap();
        let entries: Vec<_> = std::fs::read_dir(coord.results_dir()).unwrap().collect();
        assert!(entries.is_empty());
    }

    #[test]
    fn journal_lines_append_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let coord = CoordinationState::new(dir.path());
        coord.ensure_initialized().unwrap();
        coord.append_journal_line("first").unwrap();
        coord.append_journal_line("second").unwrap();

        let contents = std::fs::read_to_string(coord.attempt_journal_path()).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines, vec!["first", "second"]);
    }
}
