//! Crash-safe file replacement
//!
//! Content is written to a temporary file in the destination directory,
//! synced, then renamed over the target. Readers see the old file or the new
//! one, never a partial write.

use std::io::Write;
use std::path::Path;

/// Atomically replace `path` with `bytes`, creating parent directories
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other(format!("{} has no parent", path.display())))?;
    std::fs::create_dir_all(parent)?;

    let mut temp = tempfile::Builder::new()
        .prefix(".tmp-")
        .tempfile_in(parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
