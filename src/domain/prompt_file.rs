//! PromptFile - the mutable UTF-8 markdown document the agent edits in place.
//!
//! The file is re-read every iteration rather than cached (spec.md §9: "the LLM
//! is allowed to rewrite its own task spec, so the file is the source of truth
//! every iteration"). `PromptFile` only tracks mtime/hash so the engine can
//! detect whether the agent actually changed it between iterations.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

use crate::RalphError;

#[derive(Debug, Clone)]
pub struct PromptFile {
    path: PathBuf,
    last_hash: Option<u64>,
    last_mtime: Option<SystemTime>,
}

impl PromptFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_hash: None,
            last_mtime: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current contents, failing fatally if the file is missing or empty.
    pub fn read(&mut self) -> Result<String, RalphError> {
        debug!(path = %self.path.display(), "PromptFile::read: called");
        if !self.path.exists() {
            return Err(RalphError::FatalConfig(format!(
                "prompt file does not exist: {}",
                self.path.display()
            )));
        }

        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| RalphError::FatalConfig(format!("failed to read prompt file: {e}")))?;

        if content.trim().is_empty() {
            return Err(RalphError::FatalConfig(format!(
                "prompt file is empty: {}",
                self.path.display()
            )));
        }

        self.last_mtime = std::fs::metadata(&self.path).ok().and_then(|m| m.modified().ok());
        self.last_hash = Some(hash_of(&content));

        Ok(content)
    }

    /// Whether the file changed (by content hash) since the last `read`/`mark_seen`.
    pub fn changed_since_last_seen(&self) -> bool {
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return true;
        };
        self.last_hash != Some(hash_of(&content))
    }

    /// Record the current state as "seen" without re-reading via `read`.
    pub fn mark_seen(&mut self) {
        if let Ok(content) = std::fs::read_to_string(&self.path) {
            self.last_hash = Some(hash_of(&content));
        }
        self.last_mtime = std::fs::metadata(&self.path).ok().and_then(|m| m.modified().ok());
    }
}

fn hash_of(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}
