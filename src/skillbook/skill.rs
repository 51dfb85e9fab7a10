//! Skill and Skillbook data types, plus atomic load/persist (spec.md §3 "Skill",
//! "Skillbook", §4.4 "Persistence").

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::util::atomic_write_json;

use super::dedup::jaccard_similarity;
use super::SkillbookError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub usage_count: u32,
    pub success_correlation: f64,
}

impl Skill {
    pub fn new(title: impl Into<String>, body: impl Into<String>, tags: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            body: body.into(),
            tags,
            created_at: now,
            last_used_at: now,
            usage_count: 0,
            success_correlation: 0.5,
        }
    }

    pub fn touch(&mut self) {
        self.last_used_at = Utc::now();
        self.usage_count += 1;
    }
}

const SKILLBOOK_VERSION: &str = "1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillbookDocument {
    pub version: String,
    pub skills: Vec<Skill>,
}

/// In-memory skillbook. Invariants (spec.md §3): `len() <= max_skills`; no two
/// skills exceed the configured similarity threshold (enforced by
/// [`super::dedup`] before insertion, not by this type itself).
#[derive(Debug, Clone, Default)]
pub struct Skillbook {
    path: PathBuf,
    skills: Vec<Skill>,
}

impl Skillbook {
    pub fn new(path: PathBuf) -> Self {
        Self { path, skills: Vec::new() }
    }

    /// Load from disk, starting empty and preserving a corrupt file as
    /// `skillbook.json.broken-<ts>` if it cannot be parsed (spec.md §4.4
    /// "Failure semantics").
    pub fn load(path: PathBuf) -> Self {
        debug!(path = %path.display(), "Skillbook::load: called");
        if !path.exists() {
            return Self::new(path);
        }

        let mut file = match std::fs::File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "failed to open skillbook file, starting empty");
                return Self::new(path);
            }
        };
        // Shared lock so a concurrent persist() (which takes an exclusive
        // lock) cannot be read mid-write; best-effort, not fatal if the
        // platform/filesystem doesn't support advisory locking.
        if let Err(e) = file.lock_shared() {
            warn!(error = %e, "failed to acquire shared lock on skillbook file; reading unlocked");
        }

        let mut raw = Vec::new();
        let read_result = std::io::Read::read_to_end(&mut file, &mut raw);
        let _ = file.unlock();

        if let Err(e) = read_result {
            warn!(error = %e, "failed to read skillbook file, starting empty");
            return Self::new(path);
        }

        match serde_json::from_slice::<SkillbookDocument>(&raw) {
            Ok(doc) => Self { path, skills: upgrade(doc) },
            Err(e) => {
                warn!(error = %e, "skillbook file corrupt, preserving and starting empty");
                preserve_broken_file(&path, &raw);
                Self::new(path)
            }
        }
    }

    pub fn skills(&self) -> &[Skill] {
        &self.skills
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    pub fn insert(&mut self, skill: Skill) {
        self.skills.push(skill);
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Skill> {
        self.skills.iter_mut().find(|s| s.id == id)
    }

    pub fn remove(&mut self, id: &str) -> Option<Skill> {
        let idx = self.skills.iter().position(|s| s.id == id)?;
        Some(self.skills.remove(idx))
    }

    /// Drop the lowest-scoring skills (ascending score) until `len() <=
    /// threshold`, per spec §4.4's pruning score.
    pub fn prune_to(&mut self, threshold: usize, scorer: impl Fn(&Skill) -> f64) {
        if self.skills.len() <= threshold {
            return;
        }
        self.skills.sort_by(|a, b| scorer(a).partial_cmp(&scorer(b)).unwrap());
        let excess = self.skills.len() - threshold;
        self.skills.drain(0..excess);
    }

    /// Rank skills for Top-K injection (spec.md §4.4 "Injection"): token
    /// overlap with the current prompt, tag intersection with the current
    /// task's tags, and recent success correlation. Emits at most `k` skills
    /// whose cumulative rendered cost fits `token_budget`, touching each
    /// selected skill's usage metadata.
    pub fn select_top_k(
        &mut self,
        prompt: &str,
        task_tags: &[String],
        k: usize,
        token_budget: u64,
        count_tokens: &dyn Fn(&str) -> u64,
    ) -> Vec<Skill> {
        let mut scored: Vec<(usize, f64)> = self
            .skills
            .iter()
            .enumerate()
            .map(|(idx, skill)| (idx, retrieval_score(skill, prompt, task_tags)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());

        let mut selected = Vec::new();
        let mut used_tokens = 0u64;

        for (idx, _score) in scored.into_iter().take(k) {
            let entry_tokens = count_tokens(&self.skills[idx].body);
            if used_tokens + entry_tokens > token_budget && !selected.is_empty() {
                break;
            }
            used_tokens += entry_tokens;
            self.skills[idx].touch();
            selected.push(self.skills[idx].clone());
        }

        selected
    }

    pub fn persist(&self) -> Result<(), SkillbookError> {
        let doc = SkillbookDocument {
            version: SKILLBOOK_VERSION.to_string(),
            skills: self.skills.clone(),
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SkillbookError::Persistence(e.to_string()))?;
        }
        // Exclusive lock on the target path for the duration of the write so
        // a concurrent `load()` never observes a half-written file (the
        // rename in `atomic_write_json` already prevents torn reads; the
        // lock additionally serializes would-be concurrent writers).
        let lock_file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| SkillbookError::Persistence(e.to_string()))?;
        if let Err(e) = lock_file.lock_exclusive() {
            warn!(error = %e, "failed to acquire exclusive lock on skillbook file; writing unlocked");
        }

        let result = atomic_write_json(&self.path, &doc).map_err(|e| SkillbookError::Persistence(e.to_string()));
        let _ = lock_file.unlock();
        result
    }
}

fn retrieval_score(skill: &Skill, prompt: &str, task_tags: &[String]) -> f64 {
    let overlap = jaccard_similarity(&skill.body, prompt);
    let tag_hit = if task_tags.is_empty() {
        0.0
    } else {
        let hits = skill.tags.iter().filter(|t| task_tags.contains(t)).count();
        hits as f64 / task_tags.len() as f64
    };
    0.5 * overlap + 0.3 * tag_hit + 0.2 * skill.success_correlation
}

fn upgrade(doc: SkillbookDocument) -> Vec<Skill> {
    // Only version "1" currently exists; a future version bump would map
    // fields here with best-effort defaults, per spec.md §4.4.
    doc.skills
}

fn preserve_broken_file(path: &Path, raw: &[u8]) {
    let ts = Utc::now().format("%Y%m%dT%H%M%SZ");
    let broken_path = path.with_file_name(format!(
        "{}.broken-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("skillbook.json"),
        ts
    ));
    if let Err(e) = std::fs::write(&broken_path, raw) {
        warn!(error = %e, "failed to preserve corrupt skillbook file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_skill_starts_with_zero_usage() {
        let skill = Skill::new("t", "b", vec!["tag".to_string()]);
        assert_eq!(skill.usage_count, 0);
    }

    #[test]
    fn touch_increments_usage_and_timestamp() {
        let mut skill = Skill::new("t", "b", vec![]);
        let before = skill.last_used_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        skill.touch();
        assert_eq!(skill.usage_count, 1);
        assert!(skill.last_used_at >= before);
    }

    #[test]
    fn select_top_k_prefers_tag_and_body_overlap_and_touches_selected() {
        let dir = tempfile::tempdir().unwrap();
        let mut book = Skillbook::new(dir.path().join("skillbook.json"));
        let mut relevant = Skill::new("retry logic", "retry network calls with backoff", vec!["networking".to_string()]);
        relevant.success_correlation = 0.9;
        let irrelevant = Skill::new("unrelated", "completely different topic entirely", vec!["ui".to_string()]);
        book.insert(relevant);
        book.insert(irrelevant);

        let selected = book.select_top_k(
            "please retry the network call with backoff",
            &["networking".to_string()],
            1,
            10_000,
            &|s: &str| s.len() as u64,
        );

        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].title, "retry logic");
        assert_eq!(book.skills()[0].usage_count, 1);
    }

    #[test]
    fn load_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let book = Skillbook::load(dir.path().join("skillbook.json"));
        assert!(book.is_empty());
    }

    #[test]
    fn corrupt_file_is_preserved_and_book_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skillbook.json");
        std::fs::write(&path, b"not json").unwrap();

        let book = Skillbook::load(path.clone());
        assert!(book.is_empty());

        let broken_files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".broken-"))
            .collect();
        assert_eq!(broken_files.len(), 1);
    }

    #[test]
    fn persist_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skillbook.json");
        let mut book = Skillbook::new(path.clone());
        book.insert(Skill::new("title", "body", vec!["a".to_string()]));
        book.persist().unwrap();

        let reloaded = Skillbook::load(path);
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.skills()[0].title, "title");
    }

    #[test]
    fn prune_to_drops_lowest_scoring_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut book = Skillbook::new(dir.path().join("skillbook.json"));
        for i in 0..5 {
            let mut s = Skill::new(format!("s{i}"), "b", vec![]);
            s.success_correlation = i as f64;
            book.insert(s);
        }
        book.prune_to(2, |s| s.success_correlation);
        assert_eq!(book.len(), 2);
        let titles: Vec<_> = book.skills().iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["s3", "s4"]);
    }
}
