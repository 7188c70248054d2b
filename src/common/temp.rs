//! Fresh work directories for staging.

use std::fs;
use std::path::Path;

use crate::error::{IoResultExt, Result};

/// Prepare a work directory, removing whatever is at `work_dir` and
/// creating it fresh.
///
/// # Example
/// ```ignore
/// prepare_work_dir(&with_suffix(&staging, ".work"))?;
/// // the work directory is empty and ready to use
/// ```
pub fn prepare_work_dir(work_dir: &Path) -> Result<()> {
    if let Ok(meta) = work_dir.symlink_metadata() {
        if meta.is_dir() {
            fs::remove_dir_all(work_dir).during("removing", work_dir)?;
        } else {
            fs::remove_file(work_dir).during("removing", work_dir)?;
        }
    }
    fs::create_dir_all(work_dir).during("creating", work_dir)
}

/// Remove a work directory; a missing directory is fine.
pub fn cleanup_work_dir(path: &Path) {
    let _ = fs::remove_dir_all(path);
}
