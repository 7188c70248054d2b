//! Reading an image back and checking it against its staging tree.
//!
//! Nothing is mounted. File data comes out through `debugfs rdump`; kinds,
//! modes and ownership come from the image's own inode listing, so device
//! nodes and root-owned files are checked without privilege.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{IoResultExt, PackagingError, Result};
use crate::image::debugfs::{self, ListedEntry};
use crate::image::ext::require_tool;
use crate::image::LOST_AND_FOUND;
use crate::manifest::{DiffOptions, Difference, EntryKind, Manifest, ManifestEntry};
use crate::staging::DeviceNode;

fn check_image(image: &Path) -> Result<()> {
    let meta = fs::metadata(image).during("reading", image)?;
    if !meta.is_file() {
        return Err(PackagingError::Io {
            context: format!("{} is not a regular file", image.display()),
            source: io::Error::from(io::ErrorKind::InvalidInput),
        });
    }
    require_tool(debugfs::TOOL)
}

/// Copy files, directories and symlinks out of `image` into `dest`.
///
/// Returns the number of top-level entries extracted.
pub fn extract_image(image: &Path, dest: &Path) -> Result<usize> {
    check_image(image)?;
    fs::create_dir_all(dest).during("creating", dest)?;
    let count = debugfs::extract(image, dest)?;
    tracing::info!(image = %image.display(), dest = %dest.display(), count, "extracted");
    Ok(count)
}

/// Manifest of what `image` contains.
///
/// Contents are extracted to a scratch directory and hashed; type, mode
/// and ownership of every inode are then taken from the image listing.
pub fn image_manifest(image: &Path) -> Result<Manifest> {
    check_image(image)?;

    let scratch = tempfile::Builder::new()
        .prefix("rootpack-verify-")
        .tempdir()
        .during("creating", &std::env::temp_dir())?;
    let dest = scratch.path().join("root");
    fs::create_dir(&dest).during("creating", &dest)?;

    let result = (|| -> Result<Manifest> {
        debugfs::extract(image, &dest)?;
        let extracted = Manifest::scan_with_contents(&dest)?;
        let listed = debugfs::list_image(image)?;
        Ok(overlay(extracted, &listed, image))
    })();

    make_removable(&dest);
    result
}

/// Replace host-side metadata with what the image records.
fn overlay(extracted: Manifest, listed: &[ListedEntry], image: &Path) -> Manifest {
    let mut entries = extracted.entries;
    for item in listed {
        let Some(kind) = EntryKind::from_mode(item.mode) else {
            continue;
        };
        match entries.iter_mut().find(|e| e.path == item.path) {
            Some(entry) => {
                entry.kind = kind;
                entry.mode = item.mode & 0o7777;
                entry.uid = item.uid;
                entry.gid = item.gid;
                if item.rdev.is_some() {
                    entry.rdev = item.rdev;
                }
            }
            // rdump skips special files
            None => entries.push(ManifestEntry {
                path: item.path.clone(),
                kind,
                mode: item.mode & 0o7777,
                uid: item.uid,
                gid: item.gid,
                size: if kind == EntryKind::File {
                    item.size.unwrap_or(0)
                } else {
                    0
                },
                target: None,
                rdev: item.rdev,
                sha256: None,
                inode: None,
                host_path: PathBuf::new(),
            }),
        }
    }
    Manifest::from_entries(image.to_path_buf(), entries)
}

/// rdump restores read-only directory modes; undo that so the scratch
/// tree can be deleted.
fn make_removable(root: &Path) {
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_dir() {
            let _ = fs::set_permissions(entry.path(), fs::Permissions::from_mode(0o755));
        }
    }
}

/// Options for [`verify_image`].
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Image was packed with every inode owned by root.
    pub all_root: bool,
    /// Device nodes the packager was told to inject.
    pub devices: Vec<DeviceNode>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            all_root: true,
            devices: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub image: PathBuf,
    pub staging: PathBuf,
    pub expected_entries: usize,
    pub actual_entries: usize,
    pub differences: Vec<Difference>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.differences.is_empty()
    }
}

/// What the image should contain after packing `staging` with `opts`.
pub fn expected_manifest(staging: &Path, opts: &VerifyOptions) -> Result<Manifest> {
    let scanned = Manifest::scan_with_contents(staging)?;
    let mut entries = scanned.entries;
    for node in &opts.devices {
        if entries.iter().any(|e| e.path == node.path) {
            continue;
        }
        entries.push(ManifestEntry {
            path: node.path.clone(),
            kind: node.kind,
            mode: node.mode & 0o7777,
            uid: node.uid,
            gid: node.gid,
            size: 0,
            target: None,
            rdev: Some((node.major, node.minor)),
            sha256: None,
            inode: None,
            host_path: PathBuf::new(),
        });
    }
    let manifest = Manifest::from_entries(staging.to_path_buf(), entries);
    Ok(if opts.all_root {
        manifest.with_root_ownership()
    } else {
        manifest
    })
}

/// Compare `image` with the staging tree it was packed from.
pub fn verify_image(image: &Path, staging: &Path, opts: &VerifyOptions) -> Result<VerifyReport> {
    crate::image::check_staging(staging)?;
    let expected = expected_manifest(staging, opts)?;
    let actual = image_manifest(image)?;

    let mut diff_opts = DiffOptions::default();
    if !expected.contains(LOST_AND_FOUND) {
        diff_opts.ignore.push(LOST_AND_FOUND.to_string());
    }
    let differences = expected.diff(&actual, &diff_opts);

    for diff in &differences {
        tracing::warn!("{}", diff);
    }

    Ok(VerifyReport {
        image: image.to_path_buf(),
        staging: staging.to_path_buf(),
        expected_entries: expected.entries.len(),
        actual_entries: actual.entries.len(),
        differences,
    })
}
