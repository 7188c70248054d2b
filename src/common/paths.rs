//! Path checks and sibling path helpers.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{IoResultExt, Result};

/// Ensure all parent directories of a file exist.
///
/// A path without a parent is not an error.
pub fn ensure_parent_exists(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).during("creating", parent)?;
        }
    }
    Ok(())
}

/// True if `dir` has no entries.
pub fn is_dir_empty(dir: &Path) -> Result<bool> {
    let mut entries = fs::read_dir(dir).during("reading", dir)?;
    Ok(entries.next().is_none())
}

/// `path` with `suffix` appended to its final component
/// (`rootfs.img` + `.work` -> `rootfs.img.work`).
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
