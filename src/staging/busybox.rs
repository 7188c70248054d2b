//! Copying a BusyBox `make install` tree into the staging directory.

use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{IoResultExt, PackagingError, Result};

/// What [`copy_tree`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub dirs: usize,
    pub files: usize,
    pub symlinks: usize,
    /// Sockets, fifos and device nodes are not copied.
    pub skipped: usize,
}

/// The install tree must be a directory holding `bin/busybox`.
pub fn check_install_tree(dir: &Path) -> Result<()> {
    if !dir.is_dir() || !dir.join("bin/busybox").is_file() {
        return Err(PackagingError::BusyboxNotFound {
            path: dir.to_path_buf(),
        });
    }
    Ok(())
}

/// Copy `src` into `dst`, keeping modes and symlinks as they are.
///
/// Applet links from `make install` are relative (`../bin/busybox`) and
/// stay valid inside the image.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<CopyStats> {
    let mut stats = CopyStats::default();
    let mut dir_modes: Vec<(PathBuf, u32)> = Vec::new();

    for entry in WalkDir::new(src).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            match e.into_io_error() {
                Some(source) => PackagingError::io("reading", &path, source),
                None => PackagingError::io(
                    "reading",
                    &path,
                    std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop"),
                ),
            }
        })?;
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(rel);
        let ft = entry.file_type();

        if ft.is_dir() {
            fs::create_dir_all(&target).during("creating", &target)?;
            let mode = entry
                .metadata()
                .map(|m| m.permissions().mode() & 0o7777)
                .unwrap_or(0o755);
            dir_modes.push((target, mode));
            stats.dirs += 1;
        } else if ft.is_symlink() {
            let link = fs::read_link(entry.path()).during("reading link", entry.path())?;
            symlink(&link, &target).during("creating", &target)?;
            stats.symlinks += 1;
        } else if ft.is_file() {
            fs::copy(entry.path(), &target).during("copying", entry.path())?;
            stats.files += 1;
        } else {
            tracing::warn!(path = %entry.path().display(), "skipping special file in install tree");
            stats.skipped += 1;
        }
    }

    // deepest first so read-only directories do not block their children
    for (dir, mode) in dir_modes.iter().rev() {
        fs::set_permissions(dir, fs::Permissions::from_mode(*mode))
            .during("setting permissions of", dir)?;
    }

    Ok(stats)
}
