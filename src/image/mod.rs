//! Image packager: staging directory in, one size-bounded ext image out.
//!
//! # Atomicity
//!
//! The image is built as `<output>.work` and renamed onto the output path
//! only after formatting, post-processing and the final size check all
//! passed. On any failure the work file is removed and an existing image
//! at the output path is left untouched.

pub mod debugfs;
pub mod ext;
pub mod plan;

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::common::{ensure_parent_exists, is_dir_empty, with_suffix};
use crate::config::{ImageFormat, Sizing, DEFAULT_EPOCH, DEFAULT_LABEL};
use crate::error::{IoResultExt, PackagingError, Result};
use crate::manifest::{Manifest, TreeStats};
use crate::staging::DeviceNode;

pub use ext::Identity;
pub use plan::ImagePlan;

pub const LOST_AND_FOUND: &str = "/lost+found";

/// Everything one packaging run needs.
#[derive(Debug, Clone)]
pub struct PackRequest {
    pub staging: PathBuf,
    pub output: PathBuf,
    /// Upper bound for the image file, in bytes.
    pub max_size: u64,
    pub format: ImageFormat,
    pub sizing: Sizing,
    /// Store every inode as uid/gid 0.
    pub all_root: bool,
    /// Nodes written into the image when the staging tree lacks them.
    pub devices: Vec<DeviceNode>,
    pub epoch: u64,
    pub label: String,
}

impl PackRequest {
    pub fn new(staging: impl Into<PathBuf>, output: impl Into<PathBuf>, max_size: u64) -> Self {
        Self {
            staging: staging.into(),
            output: output.into(),
            max_size,
            format: ImageFormat::Ext4,
            sizing: Sizing::Fit,
            all_root: true,
            devices: Vec::new(),
            epoch: DEFAULT_EPOCH,
            label: DEFAULT_LABEL.to_string(),
        }
    }
}

/// What a successful run produced.
#[derive(Debug, Clone, Serialize)]
pub struct PackReport {
    pub output: PathBuf,
    /// Length of the image file.
    pub image_size: u64,
    /// Size the filesystem was projected to need.
    pub projected: u64,
    pub max_size: u64,
    pub inodes: u64,
    pub uuid: String,
    /// SHA-256 of the staging manifest, file contents included.
    pub digest: String,
    pub stats: TreeStats,
    pub devices_injected: usize,
}

/// Staging directory must exist, be a directory, and have content.
pub fn check_staging(staging: &Path) -> Result<()> {
    match fs::metadata(staging) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(PackagingError::StagingDirNotFound {
                path: staging.to_path_buf(),
            })
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(PackagingError::StagingDirNotFound {
                path: staging.to_path_buf(),
            })
        }
        Err(e) => return Err(PackagingError::io("reading", staging, e)),
    }
    if is_dir_empty(staging)? {
        return Err(PackagingError::StagingDirEmpty {
            path: staging.to_path_buf(),
        });
    }
    Ok(())
}

/// Absolute form of `path` with symlinks resolved, where trailing
/// components may not exist yet.
///
/// The deepest existing ancestor is canonicalized and the rest is
/// appended lexically.
fn resolve_partial(path: &Path) -> Result<PathBuf> {
    let mut existing = path;
    let mut tail = Vec::new();
    let mut base = loop {
        let candidate = if existing.as_os_str().is_empty() {
            Path::new(".")
        } else {
            existing
        };
        match fs::canonicalize(candidate) {
            Ok(base) => break base,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let (Some(parent), Some(last)) = (existing.parent(), existing.components().next_back())
                else {
                    return Err(PackagingError::io("resolving", path, e));
                };
                tail.push(last);
                existing = parent;
            }
            Err(e) => return Err(PackagingError::io("resolving", path, e)),
        }
    };
    for component in tail.into_iter().rev() {
        match component {
            Component::ParentDir => {
                base.pop();
            }
            Component::Normal(name) => base.push(name),
            _ => {}
        }
    }
    Ok(base)
}

/// mkfs would copy the half-written image into itself.
///
/// The output's directory need not exist yet; its nearest existing
/// ancestor decides where it lands.
fn check_output_outside(staging: &Path, output: &Path) -> Result<()> {
    let staging = fs::canonicalize(staging).during("resolving", staging)?;
    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if resolve_partial(parent)?.starts_with(&staging) {
        return Err(PackagingError::Io {
            context: format!(
                "output image {} is inside the staging directory",
                output.display()
            ),
            source: io::Error::from(io::ErrorKind::InvalidInput),
        });
    }
    Ok(())
}

/// Build the image described by `req`.
pub fn package(req: &PackRequest) -> Result<PackReport> {
    check_staging(&req.staging)?;
    check_output_outside(&req.staging, &req.output)?;

    let manifest = Manifest::scan(&req.staging)?;
    debugfs::check_names(&manifest)?;
    let missing: Vec<DeviceNode> = req
        .devices
        .iter()
        .filter(|node| !manifest.contains(&node.path))
        .cloned()
        .collect();

    // Fails with SizeExceeded before anything is written.
    let plan = ImagePlan::new(&manifest, &missing, req.max_size, req.sizing)?;
    tracing::info!(
        projected = plan.projected,
        image_size = plan.image_size,
        inodes = plan.inodes,
        "size plan"
    );

    ext::require_tool(req.format.mkfs_tool())?;
    ext::require_tool(debugfs::TOOL)?;

    let mut script = debugfs::Script::new();
    if let Some(root) = manifest.get("/") {
        script.add_root_dir(root, req.all_root);
    }
    let devices_injected = script.add_devices(&missing, &manifest);
    if req.all_root {
        script.add_root_ownership(&manifest);
    }
    // mke2fs creates lost+found itself; the script may create /dev
    let lost_found = (!manifest.contains(LOST_AND_FOUND)).then_some(LOST_AND_FOUND);
    let created_dirs: BTreeSet<&str> = missing
        .iter()
        .map(|n| n.parent())
        .filter(|dir| !manifest.contains(dir))
        .collect();
    script.pin_timestamps(
        manifest
            .entries
            .iter()
            .map(|e| e.path.as_str())
            .chain(created_dirs)
            .chain(missing.iter().map(|n| n.path.as_str()))
            .chain(lost_found),
        req.epoch,
    );

    let manifest = manifest.with_contents()?;
    let digest_source = if req.all_root {
        manifest.clone().with_root_ownership()
    } else {
        manifest.clone()
    };
    let identity = Identity::from_digest(&digest_source.digest(), req.epoch);

    ensure_parent_exists(&req.output)?;
    let work = with_suffix(&req.output, ".work");
    let _ = fs::remove_file(&work);

    let built = build_image(req, &plan, &identity, &script, &work).and_then(|()| {
        fs::rename(&work, &req.output).during("renaming image onto", &req.output)
    });
    if let Err(e) = built {
        let _ = fs::remove_file(&work);
        return Err(e);
    }

    let image_size = fs::metadata(&req.output)
        .during("reading", &req.output)?
        .len();
    tracing::info!(output = %req.output.display(), image_size, "image written");

    Ok(PackReport {
        output: req.output.clone(),
        image_size,
        projected: plan.projected,
        max_size: req.max_size,
        inodes: plan.inodes,
        uuid: identity.uuid,
        digest: manifest.digest_hex(),
        stats: manifest.stats(),
        devices_injected,
    })
}

fn build_image(
    req: &PackRequest,
    plan: &ImagePlan,
    identity: &Identity,
    script: &debugfs::Script,
    work: &Path,
) -> Result<()> {
    // mkfs sizes the filesystem from the file length
    let file = fs::File::create(work).during("creating", work)?;
    file.set_len(plan.image_size).during("sizing", work)?;
    drop(file);

    ext::format_image(
        &req.staging,
        work,
        &ext::FormatOptions {
            format: req.format,
            label: &req.label,
            all_root: req.all_root,
            plan,
            identity,
        },
    )?;

    tracing::debug!(commands = script.len(), "post-processing image");
    script.apply(work, identity)?;

    let len = fs::metadata(work).during("reading", work)?.len();
    if len > req.max_size {
        return Err(PackagingError::SizeExceeded {
            projected: len,
            max: req.max_size,
        });
    }
    Ok(())
}
