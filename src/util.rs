//! Small filesystem helpers shared across persistence-touching modules
//! (skillbook, context tracker): write-to-temp-then-rename, matching the
//! teacher's atomic-save pattern for its own state files.

use std::io;
use std::path::Path;

use serde::Serialize;

pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    let serialized = serde_json::to_vec_pretty(value)?;
    std::fs::write(&tmp_path, serialized)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
