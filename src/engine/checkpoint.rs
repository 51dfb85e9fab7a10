//! Checkpoint / rollback (spec.md §3 "Checkpoint", §4.1 "Checkpointing").
//!
//! The distilled spec describes a commit-style snapshot into "a local
//! version-control-style store". This crate resolves that open question (see
//! SPEC_FULL.md §6) as an in-process content-hash snapshot directory rather
//! than shelling out to `git`, so the engine can run against any working
//! directory, git repository or not. Grounded on the teacher's
//! `worktree::manager` snapshot/restore shape, minus the `git` subprocess.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::RalphError;

#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub id: String,
    pub iteration: u32,
    pub snapshot_dir: PathBuf,
    pub taken_at: DateTime<Utc>,
}

pub struct CheckpointStore {
    store_root: PathBuf,
    checkpoints: Vec<Checkpoint>,
}

impl CheckpointStore {
    pub fn new(agent_dir: &Path) -> Self {
        Self {
            store_root: agent_dir.join("checkpoints"),
            checkpoints: Vec::new(),
        }
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// Snapshot every file under `working_dir`, excluding `agent_dir` itself
    /// (checkpoints must not recursively contain themselves).
    pub fn take(&mut self, working_dir: &Path, agent_dir: &Path, iteration: u32) -> Result<Checkpoint, RalphError> {
        debug!(iteration, "CheckpointStore::take: called");
        let id = format!("iter{iteration}-{}", Utc::now().timestamp_nanos_opt().unwrap_or(0));
        let snapshot_dir = self.store_root.join(&id);

        copy_tree_excluding(working_dir, &snapshot_dir, agent_dir)
            .map_err(|e| RalphError::Persistence(format!("checkpoint snapshot failed: {e}")))?;

        let checkpoint = Checkpoint {
            id,
            iteration,
            snapshot_dir,
            taken_at: Utc::now(),
        };
        self.checkpoints.push(checkpoint.clone());
        info!(iteration, "checkpoint taken");
        Ok(checkpoint)
    }

    /// Most recent checkpoint strictly prior to `before_iteration` (spec.md
    /// §4.1: "resolve the most recent checkpoint strictly prior to the
    /// failure window").
    pub fn most_recent_before(&self, before_iteration: u32) -> Option<&Checkpoint> {
        self.checkpoints
            .iter()
            .filter(|c| c.iteration < before_iteration)
            .max_by_key(|c| c.iteration)
    }

    pub fn rollback(&self, checkpoint: &Checkpoint, working_dir: &Path, agent_dir: &Path) -> Result<(), RalphError> {
        info!(checkpoint_id = %checkpoint.id, "CheckpointStore::rollback: called");
        clear_tree_excluding(working_dir, agent_dir)
            .map_err(|e| RalphError::Persistence(format!("rollback clear failed: {e}")))?;
        copy_tree_excluding(&checkpoint.snapshot_dir, working_dir, agent_dir)
            .map_err(|e| RalphError::Persistence(format!("rollback restore failed: {e}")))
    }
}

fn content_hash_of_file(path: &Path) -> std::io::Result<u64> {
    let bytes = std::fs::read(path)?;
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    Ok(hasher.finish())
}

fn copy_tree_excluding(src: &Path, dst: &Path, exclude: &Path) -> std::io::Result<()> {
    if src == exclude {
        return Ok(());
    }
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        if path == exclude {
            continue;
        }
        let dst_path = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree_excluding(&path, &dst_path, exclude)?;
        } else {
            std::fs::copy(&path, &dst_path)?;
        }
    }
    Ok(())
}

fn clear_tree_excluding(root: &Path, exclude: &Path) -> std::io::Result<()> {
    if !root.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if path == exclude {
            continue;
        }
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Used by callers that want a quick "has anything changed" signal without a
/// full snapshot (e.g. deciding whether a checkpoint would be a no-op).
pub fn tree_content_hash(root: &Path, exclude: &Path) -> std::io::Result<u64> {
    let mut combined = 0u64;
    if root == exclude || !root.exists() {
        return Ok(combined);
    }
    let mut entries: Vec<_> = std::fs::read_dir(root)?.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let path = entry.path();
        if path == exclude {
            continue;
        }
        let component_hash = if entry.file_type()?.is_dir() {
            tree_content_hash(&path, exclude)?
        } else {
            content_hash_of_file(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "tree_content_hash: unreadable file");
                0
            })
        };
        combined ^= component_hash.wrapping_add(0x9e3779b97f4a7c15);
    }
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_then_rollback_restores_prior_content() {
        let work = tempfile::tempdir().unwrap();
        let agent = work.path().join(".agent");
        std::fs::create_dir_all(&agent).unwrap();
        std::fs::write(work.path().join("PROMPT.md"), "version 1").unwrap();

        let mut store = CheckpointStore::new(&agent);
        let checkpoint = store.take(work.path(), &agent, 1).unwrap();

        std::fs::write(work.path().join("PROMPT.md"), "version 2 (bad edit)").unwrap();
        store.rollback(&checkpoint, work.path(), &agent).unwrap();

        let restored = std::fs::read_to_string(work.path().join("PROMPT.md")).unwrap();
        assert_eq!(restored, "version 1");
    }

    #[test]
    fn most_recent_before_excludes_equal_and_later_iterations() {
        let work = tempfile::tempdir().unwrap();
        let agent = work.path().join(".agent");
        std::fs::create_dir_all(&agent).unwrap();

        let mut store = CheckpointStore::new(&agent);
        store.take(work.path(), &agent, 5).unwrap();
        store.take(work.path(), &agent, 10).unwrap();

        let found = store.most_recent_before(10).unwrap();
        assert_eq!(found.iteration, 5);
        assert!(store.most_recent_before(5).is_none());
    }
}
