//! Completion-marker detection and the optional validation-evidence check
//! (spec.md §4.1 "Completion detection"). Grounded on the teacher's
//! `loop::validation` (run an external check, interpret a `ValidationResult`)
//! adapted to spec's line-anchored textual markers.

use std::path::Path;
use std::sync::OnceLock;
use std::time::SystemTime;

use regex::Regex;
use tracing::{debug, warn};

const FORBIDDEN_SUBSTRINGS: &[&str] = &[
    "network request failed",
    "connection refused",
    "econnrefused",
    "timeout",
    "error:",
    "fatal error",
];

/// The six supported marker shapes (spec.md §4.1), matched against a single
/// trimmed line. Case-sensitive on the token itself; `LOOP_COMPLETE` may
/// appear anywhere in the line, the `TASK_COMPLETE` variants are anchored to
/// the whole line.
fn marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(?:- \[x\] TASK_COMPLETE|\[x\] TASK_COMPLETE|\*\*TASK_COMPLETE\*\*|TASK_COMPLETE.*|.*: TASK_COMPLETE)$|LOOP_COMPLETE",
        )
        .expect("marker_pattern: static regex must compile")
    })
}

fn line_has_marker(line: &str) -> bool {
    marker_pattern().is_match(line.trim())
}

fn text_has_marker(text: &str) -> bool {
    text.lines().any(line_has_marker)
}

/// Scan the post-execution prompt file content and the LLM response text for
/// a completion marker.
pub fn detect_completion_marker(response_text: &str, prompt_text: &str) -> bool {
    text_has_marker(response_text) || text_has_marker(prompt_text)
}

/// Validation-evidence check (spec.md §4.1): at least 3 files under
/// `validation_dir` created strictly after `start_time`, none of which
/// contain any forbidden substring (case-insensitive).
pub fn validation_evidence_satisfied(validation_dir: &Path, start_time: SystemTime) -> bool {
    debug!(dir = %validation_dir.display(), "validation_evidence_satisfied: called");
    let entries = match std::fs::read_dir(validation_dir) {
        Ok(entries) => entries,
        Err(_) => return false,
    };

    let mut fresh_count = 0;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let created = match entry.metadata().and_then(|m| m.created().or_else(|_| m.modified())) {
            Ok(t) => t,
            Err(_) => continue,
        };
        if created <= start_time {
            continue;
        }

        let contents = std::fs::read_to_string(&path).unwrap_or_default().to_lowercase();
        if FORBIDDEN_SUBSTRINGS.iter().any(|s| contents.contains(s)) {
            warn!(path = %path.display(), "validation evidence contains a forbidden substring");
            return false;
        }
        fresh_count += 1;
    }

    fresh_count >= 3
}

/// Full completion decision, folding in the optional validation-evidence
/// requirement. A marker present but validation failing is a warning, not a
/// completion (spec.md §4.1).
pub fn is_complete(
    response_text: &str,
    prompt_text: &str,
    enable_validation: bool,
    validation_dir: &Path,
    start_time: SystemTime,
) -> bool {
    if !detect_completion_marker(response_text, prompt_text) {
        return false;
    }
    if !enable_validation {
        return true;
    }
    if validation_evidence_satisfied(validation_dir, start_time) {
        true
    } else {
        warn!("completion marker present but validation evidence insufficient; continuing loop");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn detects_all_supported_marker_variants() {
        assert!(detect_completion_marker("- [x] TASK_COMPLETE", ""));
        assert!(detect_completion_marker("[x] TASK_COMPLETE", ""));
        assert!(detect_completion_marker("**TASK_COMPLETE**", ""));
        assert!(detect_completion_marker("TASK_COMPLETE and more", ""));
        assert!(detect_completion_marker("status: TASK_COMPLETE", ""));
        assert!(detect_completion_marker("some text LOOP_COMPLETE embedded", ""));
    }

    #[test]
    fn match_is_case_sensitive_on_the_token() {
        assert!(!detect_completion_marker("task_complete", ""));
        assert!(!detect_completion_marker("loop_complete", ""));
    }

    #[test]
    fn prompt_file_markers_also_count() {
        assert!(detect_completion_marker("", "- [x] TASK_COMPLETE"));
    }

    #[test]
    fn no_marker_is_incomplete() {
        assert!(!detect_completion_marker("still working on it", "- [ ] remaining task"));
    }

    #[test]
    fn validation_requires_at_least_three_fresh_clean_files() {
        let dir = tempfile::tempdir().unwrap();
        let start = SystemTime::now();
        std::thread::sleep(Duration::from_millis(10));

        for i in 0..2 {
            std::fs::write(dir.path().join(format!("evidence{i}.txt")), "all good").unwrap();
        }
        assert!(!validation_evidence_satisfied(dir.path(), start));

        std::fs::write(dir.path().join("evidence2.txt"), "all good").unwrap();
        assert!(validation_evidence_satisfied(dir.path(), start));
    }

    #[test]
    fn validation_rejects_files_containing_forbidden_substrings() {
        let dir = tempfile::tempdir().unwrap();
        let start = SystemTime::now();
        std::thread::sleep(Duration::from_millis(10));

        for i in 0..3 {
            std::fs::write(dir.path().join(format!("evidence{i}.txt")), "all good").unwrap();
        }
        std::fs::write(dir.path().join("bad.txt"), "Connection refused while calling API").unwrap();
        assert!(!validation_evidence_satisfied(dir.path(), start));
    }

    #[test]
    fn marker_without_satisfied_validation_is_not_complete() {
        let dir = tempfile::tempdir().unwrap();
        let start = SystemTime::now();
        let complete = is_complete("TASK_COMPLETE", "", true, dir.path(), start);
        assert!(!complete);
    }
}
