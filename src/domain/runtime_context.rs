//! RuntimeContext - absolute working directory, prompt-file path, and
//! scratchpad path, computed once at startup and injected verbatim into every
//! prompt as a bounded header (spec.md §3, §9).

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct RuntimeContext {
    pub working_dir: PathBuf,
    pub prompt_path: PathBuf,
    pub scratchpad_path: PathBuf,
}

impl RuntimeContext {
    pub fn new(working_dir: impl Into<PathBuf>, prompt_path: impl Into<PathBuf>, agent_dir: &Path) -> Self {
        Self {
            working_dir: working_dir.into(),
            prompt_path: prompt_path.into(),
            scratchpad_path: agent_dir.join("scratchpad.md"),
        }
    }

    /// Render as the literal header block injected by the context pipeline.
    /// Must be byte-identical across iterations (spec.md §4.3 prefix-stable
    /// caching) — this function is pure and takes no time-varying input.
    pub fn render(&self) -> String {
        format!(
            "<!-- SECTION: RUNTIME -->\nWorking directory: {}\nPrompt file: {}\nScratchpad: {}\n",
            self.working_dir.display(),
            self.prompt_path.display(),
            self.scratchpad_path.display(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_is_byte_stable_across_calls() {
        let ctx = RuntimeContext::new("/work", "/work/PROMPT.md", Path::new("/work/.agent"));
        assert_eq!(ctx.render(), ctx.render());
    }

    #[test]
    fn render_contains_all_three_paths() {
        let ctx = RuntimeContext::new("/work", "/work/PROMPT.md", Path::new("/work/.agent"));
        let rendered = ctx.render();
        assert!(rendered.contains("/work"));
        assert!(rendered.contains("/work/PROMPT.md"));
        assert!(rendered.contains("/work/.agent/scratchpad.md"));
    }
}
